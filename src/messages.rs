//! Wire codec for the streaming protocol
//!
//! Inbound frames are JSON envelopes `{"type": ..., "body": ...}`. The set of
//! types the server may send is open: unrecognized top-level types decode to
//! [`StreamMessage::Other`] and unrecognized channel body types decode to
//! [`ChannelMessage::Unknown`], both carrying the raw payload untouched.
//! Outbound control frames use the same envelope, serialized from
//! [`OutboundMessage`].
//!
//! Channel and note ids are opaque strings end to end. They are never parsed
//! as numbers and compare byte-for-byte.

use crate::error::{NotebusError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outbound WebSocket frame type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Text,
    Binary,
}

/// A user as embedded in notes and notifications
///
/// Every field is optional; servers omit fields freely and the decoder never
/// substitutes placeholder text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct User {
    pub id: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
}

/// A note as delivered on timeline channels
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Note {
    pub id: Option<String>,
    /// Body text; absent for image-only notes and pure renotes
    pub text: Option<String>,
    /// Content warning
    pub cw: Option<String>,
    pub user: Option<User>,
    /// The renoted note, when this note is a renote or quote
    pub renote: Option<Box<Note>>,
    pub reply_id: Option<String>,
}

/// A notification as delivered on the `main` channel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Notification {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub user: Option<User>,
    pub note: Option<Note>,
}

/// Decoded body of a `channel` frame
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Note(Note),
    Notification(Notification),
    /// A channel body type this client does not know. `raw` is the complete
    /// nested envelope (discriminator included) for caller introspection.
    Unknown { kind: Option<String>, raw: Value },
}

/// One decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    /// A message for one logical channel, tagged with its channel id
    Channel { id: String, body: ChannelMessage },
    /// Acknowledgement of a note subscription; `id` is the note id
    Connected { id: String },
    /// An update for a subscribed note
    NoteUpdated { id: String, body: Value },
    /// A top-level frame type this client does not know
    Other { raw: Value },
}

impl StreamMessage {
    /// Decode one inbound frame.
    ///
    /// Fails only when the frame is not JSON at all, or when a `channel`
    /// frame is missing the fields needed to route it. Everything else
    /// decodes, falling back to [`StreamMessage::Other`] /
    /// [`ChannelMessage::Unknown`] for unrecognized types.
    pub fn decode(frame: &str) -> Result<StreamMessage> {
        let raw: Value =
            serde_json::from_str(frame).map_err(|e| NotebusError::Decode(e.to_string()))?;

        let kind = raw.get("type").and_then(Value::as_str).map(str::to_string);
        let body_id = raw
            .get("body")
            .and_then(|b| b.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match kind.as_deref() {
            Some("channel") => {
                let id = body_id
                    .ok_or_else(|| NotebusError::Decode("channel frame without id".into()))?;
                let envelope = raw
                    .get("body")
                    .ok_or_else(|| NotebusError::Decode("channel frame without body".into()))?;
                Ok(StreamMessage::Channel {
                    id,
                    body: decode_channel_body(envelope),
                })
            }
            Some("connected") => match body_id {
                Some(id) => Ok(StreamMessage::Connected { id }),
                None => Ok(StreamMessage::Other { raw }),
            },
            Some("noteUpdated") => match body_id {
                Some(id) => {
                    let body = raw
                        .get("body")
                        .and_then(|b| b.get("body"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    Ok(StreamMessage::NoteUpdated { id, body })
                }
                None => Ok(StreamMessage::Other { raw }),
            },
            _ => Ok(StreamMessage::Other { raw }),
        }
    }

    /// Channel id of a [`StreamMessage::Channel`] frame
    pub fn channel_id(&self) -> Option<&str> {
        match self {
            StreamMessage::Channel { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Decode the nested body of a channel frame.
///
/// A recognized type whose payload does not fit the typed shape falls back to
/// `Unknown` rather than failing, so newer servers stay readable.
fn decode_channel_body(envelope: &Value) -> ChannelMessage {
    let kind = envelope.get("type").and_then(Value::as_str);
    let payload = envelope.get("body").cloned().unwrap_or(Value::Null);

    match kind {
        Some("note") => match serde_json::from_value::<Note>(payload) {
            Ok(note) => ChannelMessage::Note(note),
            Err(_) => ChannelMessage::Unknown {
                kind: Some("note".to_string()),
                raw: envelope.clone(),
            },
        },
        Some("notification") => match serde_json::from_value::<Notification>(payload) {
            Ok(notification) => ChannelMessage::Notification(notification),
            Err(_) => ChannelMessage::Unknown {
                kind: Some("notification".to_string()),
                raw: envelope.clone(),
            },
        },
        other => ChannelMessage::Unknown {
            kind: other.map(str::to_string),
            raw: envelope.clone(),
        },
    }
}

/// Outbound control frames, serialized as `{"type": ..., "body": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Open a logical channel of the named kind under a fresh id
    Connect {
        channel: String,
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        params: Option<Value>,
    },
    /// Close a logical channel
    Disconnect { id: String },
    /// Subscribe to updates for one note; `id` is the note id
    SubNote { id: String },
    /// Unsubscribe from a note
    UnsubNote { id: String },
}

impl OutboundMessage {
    /// Serialize to the JSON wire form
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connect_serialization() {
        let msg = OutboundMessage::Connect {
            channel: "globalTimeline".to_string(),
            id: "ch1".to_string(),
            params: None,
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"connect","body":{"channel":"globalTimeline","id":"ch1"}}"#
        );
    }

    #[test]
    fn test_disconnect_serialization() {
        let msg = OutboundMessage::Disconnect {
            id: "ch1".to_string(),
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"disconnect","body":{"id":"ch1"}}"#
        );
    }

    #[test]
    fn test_sub_note_serialization() {
        let msg = OutboundMessage::SubNote {
            id: "abc123".to_string(),
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"subNote","body":{"id":"abc123"}}"#
        );
    }

    #[test]
    fn test_unsub_note_serialization() {
        let msg = OutboundMessage::UnsubNote {
            id: "abc123".to_string(),
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"unsubNote","body":{"id":"abc123"}}"#
        );
    }

    #[test]
    fn test_decode_channel_note() {
        let frame = r#"{"type":"channel","body":{"id":"ch1","type":"note","body":{"text":"hello","user":{"name":"alice"},"renote":null}}}"#;
        let msg = StreamMessage::decode(frame).unwrap();

        let StreamMessage::Channel { id, body } = msg else {
            panic!("expected channel message");
        };
        assert_eq!(id, "ch1");

        let ChannelMessage::Note(note) = body else {
            panic!("expected note body");
        };
        assert_eq!(note.text.as_deref(), Some("hello"));
        assert_eq!(note.user.unwrap().name.as_deref(), Some("alice"));
        assert!(note.renote.is_none());
    }

    #[test]
    fn test_decode_channel_renote() {
        let frame = r#"{"type":"channel","body":{"id":"ch1","type":"note","body":{"text":null,"renote":{"text":"original"}}}}"#;
        let msg = StreamMessage::decode(frame).unwrap();

        let StreamMessage::Channel {
            body: ChannelMessage::Note(note),
            ..
        } = msg
        else {
            panic!("expected note");
        };
        assert!(note.text.is_none());
        assert_eq!(note.renote.unwrap().text.as_deref(), Some("original"));
    }

    #[test]
    fn test_decode_channel_notification() {
        let frame = r#"{"type":"channel","body":{"id":"main1","type":"notification","body":{"id":"n1","type":"follow","user":{"username":"bob"}}}}"#;
        let msg = StreamMessage::decode(frame).unwrap();

        let StreamMessage::Channel {
            body: ChannelMessage::Notification(notification),
            ..
        } = msg
        else {
            panic!("expected notification");
        };
        assert_eq!(notification.id.as_deref(), Some("n1"));
        assert_eq!(notification.kind.as_deref(), Some("follow"));
        assert_eq!(notification.user.unwrap().username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_decode_channel_unknown_body_type() {
        let frame = r#"{"type":"channel","body":{"id":"ch1","type":"typers","body":{"users":[]}}}"#;
        let msg = StreamMessage::decode(frame).unwrap();

        let StreamMessage::Channel {
            body: ChannelMessage::Unknown { kind, raw },
            ..
        } = msg
        else {
            panic!("expected unknown body");
        };
        assert_eq!(kind.as_deref(), Some("typers"));
        assert_eq!(raw.get("body"), Some(&json!({"users": []})));
    }

    #[test]
    fn test_decode_unknown_top_level_type() {
        let frame = r#"{"type":"emojiAdded","body":{"emoji":{"name":"blob"}}}"#;
        let msg = StreamMessage::decode(frame).unwrap();

        let StreamMessage::Other { raw } = msg else {
            panic!("expected other");
        };
        assert_eq!(
            raw.get("type").and_then(Value::as_str),
            Some("emojiAdded")
        );
    }

    #[test]
    fn test_decode_missing_type_is_other() {
        let msg = StreamMessage::decode(r#"{"body":{"id":"x"}}"#).unwrap();
        assert!(matches!(msg, StreamMessage::Other { .. }));
    }

    #[test]
    fn test_decode_connected() {
        let frame = r#"{"type":"connected","body":{"id":"abc123"}}"#;
        let msg = StreamMessage::decode(frame).unwrap();
        assert_eq!(
            msg,
            StreamMessage::Connected {
                id: "abc123".to_string()
            }
        );
    }

    #[test]
    fn test_decode_note_updated() {
        let frame = r#"{"type":"noteUpdated","body":{"id":"abc123","type":"reacted","body":{"reaction":":blob:"}}}"#;
        let msg = StreamMessage::decode(frame).unwrap();

        let StreamMessage::NoteUpdated { id, body } = msg else {
            panic!("expected noteUpdated");
        };
        assert_eq!(id, "abc123");
        assert_eq!(
            body.get("reaction").and_then(Value::as_str),
            Some(":blob:")
        );
    }

    #[test]
    fn test_decode_channel_without_id_fails() {
        let frame = r#"{"type":"channel","body":{"type":"note","body":{}}}"#;
        let result = StreamMessage::decode(frame);
        assert!(matches!(result, Err(NotebusError::Decode(_))));
    }

    #[test]
    fn test_decode_not_json_fails() {
        let result = StreamMessage::decode("not json at all");
        assert!(matches!(result, Err(NotebusError::Decode(_))));
    }

    #[test]
    fn test_id_preserved_byte_for_byte() {
        // Numeric-looking ids must stay strings, leading zeros intact
        let frame = r#"{"type":"connected","body":{"id":"007"}}"#;
        let msg = StreamMessage::decode(frame).unwrap();
        assert_eq!(
            msg,
            StreamMessage::Connected {
                id: "007".to_string()
            }
        );
    }

    #[test]
    fn test_note_optional_fields_stay_absent() {
        let frame = r#"{"type":"channel","body":{"id":"ch1","type":"note","body":{"id":"n1"}}}"#;
        let msg = StreamMessage::decode(frame).unwrap();

        let StreamMessage::Channel {
            body: ChannelMessage::Note(note),
            ..
        } = msg
        else {
            panic!("expected note");
        };
        assert!(note.text.is_none());
        assert!(note.user.is_none());
        assert!(note.cw.is_none());
        assert!(note.reply_id.is_none());
    }
}
