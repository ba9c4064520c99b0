use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotMeta {
    pub monitor_index: u32,
    pub scale_factor: f64,
    pub physical_width: u32,
    pub physical_height: u32,
}

/// One encoded capture of the controlled display. Opaque to everything but the
/// decision service adapter, which ships it as a data URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerceptionPayload {
    /// PNG bytes, base64 (standard alphabet, padded).
    pub image_base64: String,
    pub meta: ScreenshotMeta,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl PerceptionPayload {
    pub fn data_url(&self) -> String {
        format!("data:image/png;base64,{}", self.image_base64)
    }

    /// Content hash of the encoded image; timestamps are not part of it.
    pub fn fingerprint(&self) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        self.image_base64.hash(&mut hasher);
        self.meta.physical_width.hash(&mut hasher);
        self.meta.physical_height.hash(&mut hasher);
        hasher.finish()
    }

    /// Same display content, regardless of when it was captured.
    pub fn is_equivalent(&self, other: &PerceptionPayload) -> bool {
        self.meta == other.meta && self.image_base64 == other.image_base64
    }
}
