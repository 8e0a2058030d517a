//! Change records and the other persisted editor items.
//!
//! A [`Change`] is the atomic description of one edit. Editing widgets build
//! one per edit and hand it to the store; nothing mutates it afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of edited element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Text,
    Image,
    Video,
    Background,
    Color,
    Link,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::Text => write!(f, "text"),
            ChangeKind::Image => write!(f, "image"),
            ChangeKind::Video => write!(f, "video"),
            ChangeKind::Background => write!(f, "background"),
            ChangeKind::Color => write!(f, "color"),
            ChangeKind::Link => write!(f, "link"),
        }
    }
}

/// The new side of a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NewValue {
    /// Asset replacement. `new_data` holds an inline base64 data URL until
    /// the asset is uploaded.
    Asset {
        #[serde(rename = "newFile")]
        new_file: String,
        #[serde(rename = "newData", default, skip_serializing_if = "Option::is_none")]
        new_data: Option<String>,
    },

    /// Scalar value: text, color, link target, background.
    Value {
        #[serde(rename = "newVal")]
        new_val: String,
    },
}

impl NewValue {
    /// Value that replaces `orig`: the new text, or the new asset file name.
    pub fn as_str(&self) -> &str {
        match self {
            NewValue::Value { new_val } => new_val,
            NewValue::Asset { new_file, .. } => new_file,
        }
    }
}

/// One edit to one element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,

    #[serde(rename = "type")]
    pub kind: ChangeKind,

    /// Session-stable identity of the edited element.
    pub idx: String,

    /// Value before the edit.
    pub orig: String,

    #[serde(flatten)]
    pub new: NewValue,

    /// Page the element lives on.
    pub page: String,

    pub timestamp: DateTime<Utc>,
}

impl Change {
    /// Scalar edit (`newVal`).
    pub fn value(
        kind: ChangeKind,
        idx: impl Into<String>,
        orig: impl Into<String>,
        new_val: impl Into<String>,
        page: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            idx: idx.into(),
            orig: orig.into(),
            new: NewValue::Value {
                new_val: new_val.into(),
            },
            page: page.into(),
            timestamp: Utc::now(),
        }
    }

    /// Text edit.
    pub fn text(
        idx: impl Into<String>,
        orig: impl Into<String>,
        new_val: impl Into<String>,
        page: impl Into<String>,
    ) -> Self {
        Self::value(ChangeKind::Text, idx, orig, new_val, page)
    }

    /// Asset replacement (`newFile`, optional inline `newData`).
    pub fn asset(
        kind: ChangeKind,
        idx: impl Into<String>,
        orig: impl Into<String>,
        new_file: impl Into<String>,
        new_data: Option<String>,
        page: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            idx: idx.into(),
            orig: orig.into(),
            new: NewValue::Asset {
                new_file: new_file.into(),
                new_data,
            },
            page: page.into(),
            timestamp: Utc::now(),
        }
    }

    /// Inline asset data still waiting for upload, with its target file.
    pub fn pending_upload(&self) -> Option<(&str, &str)> {
        match &self.new {
            NewValue::Asset {
                new_file,
                new_data: Some(data),
            } => Some((new_file.as_str(), data.as_str())),
            _ => None,
        }
    }

    /// A fresh change that reverts this one on the same element.
    pub fn inverse(&self) -> Self {
        let new = match &self.new {
            NewValue::Value { .. } => NewValue::Value {
                new_val: self.orig.clone(),
            },
            NewValue::Asset { .. } => NewValue::Asset {
                new_file: self.orig.clone(),
                new_data: None,
            },
        };
        Self {
            id: Uuid::new_v4(),
            kind: self.kind,
            idx: self.idx.clone(),
            orig: self.new.as_str().to_string(),
            new,
            page: self.page.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Work recorded while offline, replayed once connectivity returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineQueueItem {
    #[serde(rename = "type")]
    pub kind: QueueItemKind,
    pub page: String,
    pub changes: Vec<Change>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueItemKind {
    Save,
}

impl OfflineQueueItem {
    pub fn save(page: impl Into<String>, changes: Vec<Change>) -> Self {
        Self {
            kind: QueueItemKind::Save,
            page: page.into(),
            changes,
            timestamp: Utc::now(),
        }
    }
}

/// A deleted element, kept so it can be put back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashItem {
    pub id: Uuid,
    pub page: String,
    pub idx: String,
    /// Serialized markup of the removed element.
    pub content: String,
    pub deleted_at: DateTime<Utc>,
}

impl TrashItem {
    pub fn new(page: impl Into<String>, idx: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            page: page.into(),
            idx: idx.into(),
            content: content.into(),
            deleted_at: Utc::now(),
        }
    }
}

/// Sticky note pinned on a page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    /// `None` for notes that show on every page.
    pub page: Option<String>,
    pub text: String,
    pub x: i32,
    pub y: i32,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub minimized: bool,
}

impl Note {
    pub fn new(page: Option<String>, x: i32, y: i32, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            page,
            text: text.into(),
            x,
            y,
            created: Utc::now(),
            minimized: false,
        }
    }
}
