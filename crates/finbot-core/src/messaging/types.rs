use chrono::{DateTime, Utc};

use crate::domain::SenderId;

/// Everything a transport can report to the bot.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    Connected,
    Disconnected { reason: Option<String> },
    MessageReceived(InboundEvent),
}

/// Where a message was posted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    Direct,
    Group,
}

/// Protocol-neutral view of an inbound message body.
///
/// Transports fill whichever slots their protocol has; the pipeline decides
/// which one to use via [`MessagePayload::extract_text`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessagePayload {
    /// Plain conversational body.
    pub conversation: Option<String>,
    /// Extended text: quoted replies, link previews, media captions.
    pub extended_text: Option<String>,
    /// Label of a pressed button / quick reply.
    pub button_reply: Option<String>,
}

impl MessagePayload {
    pub fn conversation(text: impl Into<String>) -> Self {
        Self {
            conversation: Some(text.into()),
            ..Default::default()
        }
    }

    /// Pick the text to classify: conversation, then extended text, then the
    /// button label. Whitespace-only candidates are skipped.
    pub fn extract_text(&self) -> Option<String> {
        [&self.conversation, &self.extended_text, &self.button_reply]
            .into_iter()
            .filter_map(|slot| slot.as_deref())
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// A single inbound message, immutable once built by the transport.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub sender: SenderId,
    pub payload: MessagePayload,
    pub origin: Origin,
    /// Authored by the bot's own account.
    pub from_self: bool,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn direct(sender: SenderId, payload: MessagePayload) -> Self {
        Self {
            sender,
            payload,
            origin: Origin::Direct,
            from_self: false,
            received_at: Utc::now(),
        }
    }

    pub fn is_group(&self) -> bool {
        self.origin == Origin::Group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(conv: Option<&str>, ext: Option<&str>, button: Option<&str>) -> MessagePayload {
        MessagePayload {
            conversation: conv.map(str::to_string),
            extended_text: ext.map(str::to_string),
            button_reply: button.map(str::to_string),
        }
    }

    #[test]
    fn conversation_wins_over_everything() {
        let p = payload(Some("almoço 25"), Some("quoted"), Some("Sim"));
        assert_eq!(p.extract_text().as_deref(), Some("almoço 25"));
    }

    #[test]
    fn falls_back_to_extended_text() {
        let p = payload(None, Some("uber 18 reais"), Some("Sim"));
        assert_eq!(p.extract_text().as_deref(), Some("uber 18 reais"));

        let p = payload(Some(""), Some("uber 18 reais"), None);
        assert_eq!(p.extract_text().as_deref(), Some("uber 18 reais"));
    }

    #[test]
    fn falls_back_to_button_label() {
        let p = payload(None, None, Some("Recebi 100"));
        assert_eq!(p.extract_text().as_deref(), Some("Recebi 100"));
    }

    #[test]
    fn nothing_usable_is_empty() {
        assert_eq!(MessagePayload::default().extract_text(), None);
        assert_eq!(payload(Some("  "), Some("\n"), Some("")).extract_text(), None);
    }

    #[test]
    fn extracted_text_is_trimmed() {
        let p = MessagePayload::conversation("  gasolina 200  ");
        assert_eq!(p.extract_text().as_deref(), Some("gasolina 200"));
    }
}
