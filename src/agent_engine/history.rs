use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub ts: i64,
    pub turn: u32,
    pub kind: TranscriptKind,
    pub detail: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptKind {
    Proposal,
    Authorization,
    Action,
    Report,
    Outcome,
}

/// Ordered record of one run, kept in memory and handed back in the run report.
pub struct RunTranscript {
    pub run_id: String,
    entries: Vec<TranscriptEntry>,
}

impl RunTranscript {
    pub fn new() -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, turn: u32, kind: TranscriptKind, detail: serde_json::Value) {
        self.entries.push(TranscriptEntry {
            ts: chrono::Utc::now().timestamp_millis(),
            turn,
            kind,
            detail,
        });
    }

    pub fn into_entries(self) -> Vec<TranscriptEntry> {
        self.entries
    }
}

impl Default for RunTranscript {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entries_come_back_in_recording_order() {
        let mut transcript = RunTranscript::new();
        transcript.record(0, TranscriptKind::Proposal, json!({ "response_id": "resp-1" }));
        transcript.record(0, TranscriptKind::Action, json!({ "action": "click" }));
        transcript.record(1, TranscriptKind::Outcome, json!({ "state": "succeeded" }));

        let entries = transcript.into_entries();
        let order: Vec<_> = entries.iter().map(|e| (e.turn, e.kind)).collect();
        assert_eq!(
            order,
            vec![
                (0, TranscriptKind::Proposal),
                (0, TranscriptKind::Action),
                (1, TranscriptKind::Outcome),
            ]
        );
        assert_eq!(entries[0].detail["response_id"], "resp-1");
        assert!(entries.windows(2).all(|w| w[0].ts <= w[1].ts));
    }

    #[test]
    fn each_transcript_gets_its_own_run_id() {
        let a = RunTranscript::new();
        let b = RunTranscript::default();
        assert!(!a.run_id.is_empty());
        assert_ne!(a.run_id, b.run_id);
    }
}
