//! Database row types. These map directly to SQLite rows and are kept
//! distinct from the kumas-types models so the store layer stays independent.

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::warn;

use kumas_types::api::LastMessage;
use kumas_types::models::{
    Chat, ChatMember, Gender, Message, MessageState, User, UserId, UserStatus, UserSummary,
};

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub email: String,
    pub password: String,
    pub name: String,
    pub gender: String,
    pub profile_image: Option<String>,
    pub refresh_token: Option<String>,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct ChatRow {
    pub id: i64,
    pub is_group: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// A membership row joined with the member's display name.
#[derive(Debug, Clone)]
pub struct ChatMemberRow {
    pub chat_id: i64,
    pub user_id: i64,
    pub title: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: i64,
    pub chat_id: i64,
    pub author_id: i64,
    pub author_name: String,
    pub content: Option<String>,
    pub image: Option<String>,
    pub deleted: bool,
    pub created_at: String,
}

impl UserRow {
    pub fn into_user(self) -> User {
        let gender = Gender::parse(&self.gender).unwrap_or_else(|| {
            warn!("Corrupt gender '{}' on user {}", self.gender, self.id);
            Gender::M
        });
        let status = UserStatus::parse(&self.status).unwrap_or_else(|| {
            warn!("Corrupt status '{}' on user {}", self.status, self.id);
            UserStatus::Active
        });
        User {
            id: self.id,
            email: self.email,
            name: self.name,
            gender,
            profile_image: self.profile_image,
            status,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

impl ChatRow {
    pub fn into_chat(self) -> Chat {
        Chat {
            id: self.id,
            is_group: self.is_group,
            created_at: parse_timestamp(&self.created_at),
            updated_at: parse_timestamp(&self.updated_at),
        }
    }
}

impl ChatMemberRow {
    pub fn chat_member(&self) -> ChatMember {
        ChatMember {
            chat_id: self.chat_id,
            user_id: self.user_id,
            title: self.title.clone(),
        }
    }

    pub fn summary(&self) -> UserSummary {
        UserSummary {
            id: self.user_id,
            name: self.name.clone(),
        }
    }
}

impl MessageRow {
    pub fn state(&self) -> MessageState {
        MessageState::from_flag(self.deleted)
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            chat_id: self.chat_id,
            author: UserSummary {
                id: self.author_id,
                name: self.author_name,
            },
            content: self.content,
            image: self.image,
            deleted: self.deleted,
            created_at: parse_timestamp(&self.created_at),
        }
    }

    pub fn into_last_message(self) -> LastMessage {
        LastMessage {
            id: self.id,
            content: self.content,
            image: self.image,
            deleted: self.deleted,
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

/// User ids of a membership list.
pub fn member_ids(rows: &[ChatMemberRow]) -> Vec<UserId> {
    rows.iter().map(|r| r.user_id).collect()
}

/// Timestamps are written as RFC 3339 with millisecond precision. Rows
/// inserted by hand may carry SQLite's `datetime('now')` format instead.
pub fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc()))
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", raw, e);
            DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp_formats() {
        let a = parse_timestamp("2024-03-01T10:20:30.123Z");
        let b = parse_timestamp("2024-03-01 10:20:30");
        assert_eq!(a.timestamp(), b.timestamp());
        assert_eq!(parse_timestamp("garbage"), DateTime::<Utc>::default());
    }
}
