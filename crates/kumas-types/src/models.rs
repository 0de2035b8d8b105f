use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ChatId = i64;
pub type MessageId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M => "M",
            Self::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "M" => Some(Self::M),
            "F" => Some(Self::F),
            _ => None,
        }
    }
}

/// Lifecycle of a user account. `Deleted` is terminal; deleted users are
/// invisible to every lookup but their rows are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    #[default]
    Active,
    Deleted,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Public profile of a user. Password hash and refresh token never leave the
/// store layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub gender: Gender,
    pub profile_image: Option<String>,
    #[serde(skip, default)]
    pub status: UserStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    #[serde(rename = "group")]
    pub is_group: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's participation in a chat. `title` is private to that member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMember {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub title: Option<String>,
}

/// Soft-delete state of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Active,
    Deleted,
}

impl MessageState {
    pub fn from_flag(deleted: bool) -> Self {
        if deleted { Self::Deleted } else { Self::Active }
    }

    /// `Active -> Deleted`. Returns `None` when already deleted; there is no
    /// transition out of `Deleted`.
    pub fn delete(self) -> Option<Self> {
        match self {
            Self::Active => Some(Self::Deleted),
            Self::Deleted => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub author: UserSummary,
    pub content: Option<String>,
    pub image: Option<String>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
}
