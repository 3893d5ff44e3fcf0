//! Conversation transcript assembly
//!
//! Merges the user speech-to-text stream and the assistant caption stream
//! into one log ordered by first-delta arrival. Entries grow while streaming
//! and are frozen once their done event arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signaling::Role;

/// One turn's text in the conversation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub text: String,
    /// Arrival time of the first delta
    pub timestamp: DateTime<Utc>,
    pub is_streaming: bool,
}

#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a streaming delta for `role`
    ///
    /// Appends to the last entry when it is still streaming for the same
    /// role, otherwise opens a new entry. Empty deltas are ignored.
    pub fn append_delta(&mut self, role: Role, delta: &str) {
        if delta.is_empty() {
            return;
        }

        match self.entries.last_mut() {
            Some(last) if last.role == role && last.is_streaming => last.text.push_str(delta),
            _ => self.entries.push(TranscriptEntry {
                role,
                text: delta.to_string(),
                timestamp: Utc::now(),
                is_streaming: true,
            }),
        }
    }

    /// Finalize the streaming entries of `role`
    ///
    /// A final transcript that extends the streamed text is adopted before
    /// freezing; one that doesn't is ignored. With nothing streaming, a
    /// non-empty final transcript becomes a finished entry of its own.
    pub fn complete(&mut self, role: Role, final_text: Option<&str>) {
        let latest = self
            .entries
            .iter()
            .rposition(|entry| entry.role == role && entry.is_streaming);

        let Some(latest) = latest else {
            if let Some(text) = final_text.filter(|t| !t.is_empty()) {
                self.push_final(role, text);
            }
            return;
        };

        if let Some(text) = final_text {
            let entry = &mut self.entries[latest];
            if text.len() > entry.text.len() && text.starts_with(entry.text.as_str()) {
                entry.text = text.to_string();
            }
        }

        // Older streaming entries of this role can no longer receive deltas
        for entry in self.entries[..=latest].iter_mut() {
            if entry.role == role {
                entry.is_streaming = false;
            }
        }
    }

    /// Append an already finished entry (typed turns)
    pub fn push_final(&mut self, role: Role, text: &str) {
        self.entries.push(TranscriptEntry {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
            is_streaming: false,
        });
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deltas_merge_into_last_streaming_entry() {
        let mut transcript = TranscriptAssembler::new();
        transcript.append_delta(Role::Assistant, "Hel");
        transcript.append_delta(Role::Assistant, "lo");
        transcript.append_delta(Role::Assistant, "");

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].text, "Hello");
        assert!(transcript.entries()[0].is_streaming);
    }

    #[test]
    fn test_done_freezes_entry() {
        let mut transcript = TranscriptAssembler::new();
        transcript.append_delta(Role::User, "turn on");
        transcript.complete(Role::User, Some("turn on the lights"));
        transcript.append_delta(Role::User, " again");

        let entries = transcript.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].text, "turn on the lights");
        assert!(!entries[0].is_streaming);
        assert_eq!(entries[1].text, " again");
        assert!(entries[1].is_streaming);
    }

    #[test]
    fn test_conflicting_final_text_is_ignored() {
        let mut transcript = TranscriptAssembler::new();
        transcript.append_delta(Role::Assistant, "Sure thing");
        transcript.complete(Role::Assistant, Some("Something else"));

        assert_eq!(transcript.entries()[0].text, "Sure thing");
        assert!(!transcript.entries()[0].is_streaming);
    }

    #[test]
    fn test_interleaved_roles_keep_arrival_order() {
        let mut transcript = TranscriptAssembler::new();
        transcript.append_delta(Role::Assistant, "Let me");
        transcript.append_delta(Role::User, "wait");
        transcript.complete(Role::User, None);
        transcript.append_delta(Role::Assistant, " check");
        transcript.complete(Role::Assistant, None);

        let roles: Vec<Role> = transcript.entries().iter().map(|e| e.role).collect();
        assert_eq!(roles, vec![Role::Assistant, Role::User, Role::Assistant]);
        assert!(transcript.entries().iter().all(|e| !e.is_streaming));
        assert_eq!(transcript.entries()[0].text, "Let me");
        assert_eq!(transcript.entries()[2].text, " check");
    }

    #[test]
    fn test_completed_without_deltas_appends_finished_entry() {
        let mut transcript = TranscriptAssembler::new();
        transcript.complete(Role::User, Some("what time is it"));
        transcript.complete(Role::User, Some(""));

        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].text, "what time is it");
        assert!(!transcript.entries()[0].is_streaming);
    }
}
