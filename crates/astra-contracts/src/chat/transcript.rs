use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const WELCOME_TEXT: &str = "Welcome, I'm Astra. What can I help you with today?";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub from_user: bool,
    pub timestamp: String,
    pub expanded: bool,
    pub centered: bool,
}

/// Ordered, session-scoped message list. Ids are opaque to the rest of
/// the system; visualization tasks key off them. Ordinals are 1-based
/// display positions, which is what the REPL commands address.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    /// A fresh transcript opens with the centered welcome message.
    pub fn with_welcome() -> Self {
        Self {
            messages: vec![ChatMessage {
                id: "welcome".to_string(),
                text: WELCOME_TEXT.to_string(),
                from_user: false,
                timestamp: now_utc_iso(),
                expanded: false,
                centered: true,
            }],
        }
    }

    pub fn push_user(&mut self, text: &str) -> &ChatMessage {
        self.push(text, true)
    }

    pub fn push_assistant(&mut self, text: &str) -> &ChatMessage {
        self.push(text, false)
    }

    fn push(&mut self, text: &str, from_user: bool) -> &ChatMessage {
        self.messages.push(ChatMessage {
            id: Uuid::new_v4().to_string(),
            text: text.to_string(),
            from_user,
            timestamp: now_utc_iso(),
            expanded: false,
            centered: false,
        });
        self.messages.last().expect("message just pushed")
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|message| message.id == id)
    }

    /// 1-based position as printed by the REPL.
    pub fn by_ordinal(&self, ordinal: usize) -> Option<&ChatMessage> {
        if ordinal == 0 {
            return None;
        }
        self.messages.get(ordinal - 1)
    }

    pub fn latest_assistant(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|message| !message.from_user && !message.centered)
    }

    pub fn toggle_expansion(&mut self, id: &str) -> bool {
        let Some(message) = self
            .messages
            .iter_mut()
            .find(|message| message.id == id)
        else {
            return false;
        };
        message.expanded = !message.expanded;
        true
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use super::{Transcript, WELCOME_TEXT};

    #[test]
    fn fresh_transcript_opens_with_centered_welcome() {
        let transcript = Transcript::with_welcome();
        assert_eq!(transcript.len(), 1);

        let welcome = &transcript.messages()[0];
        assert_eq!(welcome.text, WELCOME_TEXT);
        assert!(!welcome.from_user);
        assert!(welcome.centered);
    }

    #[test]
    fn push_assigns_unique_ids_and_preserves_order() {
        let mut transcript = Transcript::with_welcome();
        let user_id = transcript.push_user("hello").id.clone();
        let reply_id = transcript.push_assistant("hi there").id.clone();

        assert_ne!(user_id, reply_id);
        let texts: Vec<&str> = transcript
            .messages()
            .iter()
            .map(|message| message.text.as_str())
            .collect();
        assert_eq!(texts, vec![WELCOME_TEXT, "hello", "hi there"]);
    }

    #[test]
    fn ordinals_are_one_based_display_positions() {
        let mut transcript = Transcript::with_welcome();
        transcript.push_user("hello");
        transcript.push_assistant("hi there");

        assert_eq!(transcript.by_ordinal(0), None);
        assert_eq!(transcript.by_ordinal(1).map(|m| m.text.as_str()), Some(WELCOME_TEXT));
        assert_eq!(transcript.by_ordinal(3).map(|m| m.text.as_str()), Some("hi there"));
        assert_eq!(transcript.by_ordinal(4), None);
    }

    #[test]
    fn latest_assistant_skips_user_messages_and_the_welcome() {
        let mut transcript = Transcript::with_welcome();
        assert_eq!(transcript.latest_assistant(), None);

        transcript.push_user("question one");
        transcript.push_assistant("answer one");
        transcript.push_user("question two");
        assert_eq!(
            transcript.latest_assistant().map(|m| m.text.as_str()),
            Some("answer one")
        );
    }

    #[test]
    fn toggle_expansion_flips_and_reports_misses() {
        let mut transcript = Transcript::with_welcome();
        let id = transcript.push_assistant("a long reply").id.clone();

        assert!(transcript.toggle_expansion(&id));
        assert!(transcript.get(&id).map(|m| m.expanded).unwrap_or(false));
        assert!(transcript.toggle_expansion(&id));
        assert!(!transcript.get(&id).map(|m| m.expanded).unwrap_or(true));
        assert!(!transcript.toggle_expansion("missing"));
    }
}
