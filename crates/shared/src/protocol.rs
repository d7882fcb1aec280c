use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{Identity, MessageId, MessageKind};

/// One message document as stored by the remote feed. Field names follow the
/// store's camelCase document shape, so this struct is the wire contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: MessageId,
    pub text: String,
    pub sender: Identity,
    /// Server-assigned order key; subscribers observe records sorted by it.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_gif: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_url: Option<String>,
    #[serde(default)]
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

impl RemoteRecord {
    pub fn kind(&self) -> MessageKind {
        if self.is_image {
            MessageKind::Image
        } else if self.is_gif {
            MessageKind::Gif
        } else {
            MessageKind::Plain
        }
    }
}

/// Append payload: a [`RemoteRecord`] minus the fields the store assigns
/// (`id` and `timestamp`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub text: String,
    pub sender: Identity,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub is_gif: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_url: Option<String>,
    #[serde(default)]
    pub is_image: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_path: Option<String>,
}

/// Patch applied by an edit. Sender, timestamp and kind are immutable and
/// deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    pub text: String,
    pub edited: bool,
    pub edited_at: DateTime<Utc>,
}

/// Local-only transport between the upload flow and the composer. Never
/// persisted; serialized to JSON and fed through the normal send path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ComposerPayload {
    #[serde(rename = "image", rename_all = "camelCase")]
    Image {
        image_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        storage_path: Option<String>,
    },
}

/// Result of storing a binary object in the blob store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBlob {
    pub url: String,
    pub path: String,
}

/// What a feed subscription yields. The stream is snapshot-based: every
/// change delivers the full ordered set, not a diff. `Lost` is terminal.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Snapshot(Vec<RemoteRecord>),
    Lost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_record_uses_camel_case_document_fields() {
        let raw = r#"{
            "id": "abc123",
            "text": "check this",
            "sender": "He",
            "timestamp": "2024-03-01T12:00:00Z",
            "edited": false,
            "isGif": true,
            "gifUrl": "https://media.giphy.com/a.gif"
        }"#;
        let record: RemoteRecord = serde_json::from_str(raw).expect("parse record");
        assert_eq!(record.id, MessageId("abc123".into()));
        assert_eq!(record.sender, Identity::He);
        assert_eq!(record.kind(), MessageKind::Gif);
        assert_eq!(record.gif_url.as_deref(), Some("https://media.giphy.com/a.gif"));
        assert!(record.edited_at.is_none());
    }

    #[test]
    fn missing_optional_fields_default_to_plain() {
        let raw = r#"{
            "id": "m1",
            "text": "hi",
            "sender": "She",
            "timestamp": "2024-03-01T12:00:00Z"
        }"#;
        let record: RemoteRecord = serde_json::from_str(raw).expect("parse record");
        assert_eq!(record.kind(), MessageKind::Plain);
        assert!(!record.edited);
    }

    #[test]
    fn composer_payload_is_tagged_with_type_image() {
        let raw = r#"{"type":"image","imageUrl":"https://x/y.png","fileName":"cat.png"}"#;
        let payload: ComposerPayload = serde_json::from_str(raw).expect("parse payload");
        let ComposerPayload::Image {
            image_url,
            file_name,
            ..
        } = payload;
        assert_eq!(image_url, "https://x/y.png");
        assert_eq!(file_name.as_deref(), Some("cat.png"));
    }

    #[test]
    fn unknown_payload_tag_is_rejected() {
        let raw = r#"{"type":"video","imageUrl":"https://x/y.mp4"}"#;
        assert!(serde_json::from_str::<ComposerPayload>(raw).is_err());
    }
}
