//! Per-model conversation history for visually-grounded follow-up calls.

use crate::provider::{ImageRef, Turn};

/// Ordered turn history for one target model.
///
/// Turns come in user/assistant pairs: a user turn opens an exchange and the
/// assistant turn closes it, so a history with no exchange in flight always
/// has even length. Created lazily on first turn, cleared explicitly between
/// tasks.
#[derive(Debug, Default)]
pub struct ConversationSession {
    turns: Vec<Turn>,
    pending_user: bool,
}

impl ConversationSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_user_turn(&mut self, text: impl Into<String>, image: Option<ImageRef>) {
        debug_assert!(!self.pending_user, "user turn already awaiting a reply");
        let text = text.into();
        self.turns.push(match image {
            Some(img) => Turn::user_with_image(text, img),
            None => Turn::user(text),
        });
        self.pending_user = true;
    }

    pub fn append_assistant_turn(&mut self, text: impl Into<String>) {
        debug_assert!(self.pending_user, "assistant turn without a user turn");
        self.turns.push(Turn::assistant(text));
        self.pending_user = false;
    }

    /// Immutable ordered view of the history.
    pub fn snapshot(&self) -> &[Turn] {
        &self.turns
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.pending_user = false;
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Role;

    #[test]
    fn completed_exchanges_keep_even_length() {
        let mut session = ConversationSession::new();
        assert!(session.is_empty());

        session.append_user_turn("build a page", None);
        session.append_assistant_turn("<html></html>");
        assert_eq!(session.len(), 2);

        session.append_user_turn("improve it", Some(ImageRef::new("/tmp/v1.png")));
        session.append_assistant_turn("<html>better</html>");
        assert_eq!(session.len(), 4);
        assert_eq!(session.len() % 2, 0);
    }

    #[test]
    fn snapshot_preserves_order_and_images() {
        let mut session = ConversationSession::new();
        session.append_user_turn("first", None);
        session.append_assistant_turn("reply");
        session.append_user_turn("second", Some(ImageRef::new("/tmp/shot.png")));
        session.append_assistant_turn("reply 2");

        let turns = session.snapshot();
        assert_eq!(turns[0].role, Role::User);
        assert_eq!(turns[1].role, Role::Assistant);
        assert!(turns[0].image.is_none());
        assert!(turns[2].image.is_some());
    }

    #[test]
    fn clear_resets_history() {
        let mut session = ConversationSession::new();
        session.append_user_turn("hello", None);
        session.append_assistant_turn("hi");
        session.clear();
        assert!(session.is_empty());
    }
}
