use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::signaling::Role;

/// One user or assistant turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationItem {
    pub item_id: String,
    pub role: Role,
    pub is_complete: bool,
}

/// Conversation items seen during one session
#[derive(Debug, Default)]
pub struct ConversationItems {
    items: HashMap<String, ConversationItem>,
}

impl ConversationItems {
    /// Register the item on first sight
    pub fn observe(&mut self, item_id: &str, role: Role) -> Result<&ConversationItem> {
        let item = self
            .items
            .entry(item_id.to_string())
            .or_insert_with(|| ConversationItem {
                item_id: item_id.to_string(),
                role,
                is_complete: false,
            });

        if item.role != role {
            return Err(Error::Protocol(format!(
                "item {item_id} is a {:?} item, not {:?}",
                item.role, role
            )));
        }

        Ok(item)
    }

    /// Accept an assistant audio delta for the item
    ///
    /// Audio for an item already marked complete is out of sequence.
    pub fn accept_audio(&mut self, item_id: &str) -> Result<()> {
        let item = self.observe(item_id, Role::Assistant)?;
        if item.is_complete {
            return Err(Error::Protocol(format!(
                "audio delta for completed item {item_id}"
            )));
        }
        Ok(())
    }

    pub fn complete(&mut self, item_id: &str) {
        if let Some(item) = self.items.get_mut(item_id) {
            item.is_complete = true;
        }
    }

    pub fn get(&self, item_id: &str) -> Option<&ConversationItem> {
        self.items.get(item_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_after_completion_is_protocol_error() {
        let mut items = ConversationItems::default();
        items.accept_audio("r1").unwrap();
        items.accept_audio("r1").unwrap();
        items.complete("r1");

        assert!(matches!(items.accept_audio("r1"), Err(Error::Protocol(_))));
        assert!(items.get("r1").unwrap().is_complete);
    }

    #[test]
    fn test_role_mismatch_is_protocol_error() {
        let mut items = ConversationItems::default();
        items.observe("u1", Role::User).unwrap();
        assert!(matches!(items.accept_audio("u1"), Err(Error::Protocol(_))));
        assert_eq!(items.len(), 1);
    }
}
