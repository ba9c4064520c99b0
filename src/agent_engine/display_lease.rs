use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

use crate::errors::{ChartPilotError, ChartPilotResult};

fn owned_displays() -> &'static Mutex<HashSet<String>> {
    static OWNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    OWNED.get_or_init(|| Mutex::new(HashSet::new()))
}

/// Exclusive ownership of one display and its input queue for the lifetime of a run.
/// Released on drop.
#[derive(Debug)]
pub struct DisplayLease {
    display_id: String,
}

impl DisplayLease {
    pub fn acquire(display_id: &str) -> ChartPilotResult<Self> {
        let mut owned = owned_displays()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !owned.insert(display_id.to_string()) {
            return Err(ChartPilotError::DisplayBusy(display_id.to_string()));
        }
        tracing::debug!(display = display_id, "display lease acquired");
        Ok(Self {
            display_id: display_id.to_string(),
        })
    }

    pub fn display_id(&self) -> &str {
        &self.display_id
    }
}

impl Drop for DisplayLease {
    fn drop(&mut self) {
        let mut owned = owned_displays()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        owned.remove(&self.display_id);
        tracing::debug!(display = %self.display_id, "display lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lease_on_same_display_is_refused() {
        let first = DisplayLease::acquire("lease-test-a").unwrap();
        assert!(matches!(
            DisplayLease::acquire("lease-test-a"),
            Err(ChartPilotError::DisplayBusy(_))
        ));
        // independent displays are fine
        let other = DisplayLease::acquire("lease-test-b").unwrap();
        drop(first);
        let again = DisplayLease::acquire("lease-test-a").unwrap();
        assert_eq!(again.display_id(), "lease-test-a");
        drop(other);
    }
}
