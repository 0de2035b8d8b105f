//! Repository queries. Free functions take a `&Connection` so services can
//! compose several of them inside one `Database::with_tx` transaction; the
//! `Database` methods at the bottom are single-statement shortcuts.

use crate::Database;
use crate::models::{ChatMemberRow, ChatRow, MessageRow, UserRow};
use anyhow::Result;
use kumas_types::models::{ChatId, Gender, MessageId, UserId, UserStatus};
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str =
    "u.id, u.email, u.password, u.name, u.gender, u.profile_image, u.refresh_token, u.status, u.created_at, u.updated_at";

const MESSAGE_COLUMNS: &str =
    "m.id, m.chat_id, m.author_id, u.name, m.content, m.image, m.deleted, m.created_at";

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

// -- Users --

pub fn insert_user(
    conn: &Connection,
    email: &str,
    password_hash: &str,
    name: &str,
    gender: Gender,
) -> Result<UserId> {
    conn.execute(
        "INSERT INTO users (email, password, name, gender) VALUES (?1, ?2, ?3, ?4)",
        (email, password_hash, name, gender.as_str()),
    )?;
    Ok(conn.last_insert_rowid())
}

/// Active users only; soft-deleted rows are invisible.
pub fn find_user_by_id(conn: &Connection, id: UserId) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users u WHERE u.id = ?1 AND u.status = 'active'");
    let row = conn.query_row(&sql, [id], user_from_row).optional()?;
    Ok(row)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<UserRow>> {
    let sql =
        format!("SELECT {USER_COLUMNS} FROM users u WHERE u.email = ?1 AND u.status = 'active'");
    let row = conn.query_row(&sql, [email], user_from_row).optional()?;
    Ok(row)
}

/// True if any row (deleted or not) already uses `email`.
pub fn email_taken(conn: &Connection, email: &str, except: Option<UserId>) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE email = ?1 AND id IS NOT ?2",
        rusqlite::params![email, except],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Partial update; `None` fields are left untouched.
pub fn update_user(
    conn: &Connection,
    id: UserId,
    email: Option<&str>,
    password_hash: Option<&str>,
    name: Option<&str>,
) -> Result<usize> {
    let sql = format!(
        "UPDATE users SET
            email = COALESCE(?2, email),
            password = COALESCE(?3, password),
            name = COALESCE(?4, name),
            updated_at = {NOW}
         WHERE id = ?1 AND status = 'active'"
    );
    let n = conn.execute(&sql, rusqlite::params![id, email, password_hash, name])?;
    Ok(n)
}

pub fn set_profile_image(conn: &Connection, id: UserId, image: Option<&str>) -> Result<usize> {
    let sql = format!(
        "UPDATE users SET profile_image = ?2, updated_at = {NOW} WHERE id = ?1 AND status = 'active'"
    );
    let n = conn.execute(&sql, rusqlite::params![id, image])?;
    Ok(n)
}

/// Replaces (or clears) the single live refresh token of a user.
pub fn set_refresh_token(conn: &Connection, id: UserId, token: Option<&str>) -> Result<usize> {
    let n = conn.execute(
        "UPDATE users SET refresh_token = ?2 WHERE id = ?1",
        rusqlite::params![id, token],
    )?;
    Ok(n)
}

/// `Active -> Deleted`. Returns false if the user was not active.
pub fn soft_delete_user(conn: &Connection, id: UserId) -> Result<bool> {
    let sql = format!(
        "UPDATE users SET status = ?2, refresh_token = NULL, deleted_at = {NOW}, updated_at = {NOW}
         WHERE id = ?1 AND status = 'active'"
    );
    let n = conn.execute(&sql, rusqlite::params![id, UserStatus::Deleted.as_str()])?;
    Ok(n == 1)
}

// -- Friends --

pub fn list_friends(conn: &Connection, user_id: UserId) -> Result<Vec<UserRow>> {
    let sql = format!(
        "SELECT {USER_COLUMNS}
         FROM friends f
         JOIN users u ON u.id = f.target_id
         WHERE f.user_id = ?1 AND u.status = 'active'
         ORDER BY f.created_at, u.id"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], user_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn friend_exists(conn: &Connection, user_id: UserId, target_id: UserId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM friends WHERE user_id = ?1 AND target_id = ?2",
            [user_id, target_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn insert_friend(conn: &Connection, user_id: UserId, target_id: UserId) -> Result<()> {
    conn.execute(
        "INSERT INTO friends (user_id, target_id) VALUES (?1, ?2)",
        [user_id, target_id],
    )?;
    Ok(())
}

pub fn delete_friend(conn: &Connection, user_id: UserId, target_id: UserId) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM friends WHERE user_id = ?1 AND target_id = ?2",
        [user_id, target_id],
    )?;
    Ok(n)
}

// -- Chats --

pub fn find_chat(conn: &Connection, chat_id: ChatId) -> Result<Option<ChatRow>> {
    let row = conn
        .query_row(
            "SELECT id, is_group, created_at, updated_at FROM chats WHERE id = ?1",
            [chat_id],
            chat_from_row,
        )
        .optional()?;
    Ok(row)
}

/// The caller's existing non-group chat whose members include `target_id`.
pub fn find_pair_chat(
    conn: &Connection,
    user_id: UserId,
    target_id: UserId,
) -> Result<Option<ChatRow>> {
    let row = conn
        .query_row(
            "SELECT c.id, c.is_group, c.created_at, c.updated_at
             FROM chats c
             JOIN chat_members me ON me.chat_id = c.id AND me.user_id = ?1
             JOIN chat_members other ON other.chat_id = c.id AND other.user_id = ?2
             WHERE c.is_group = 0
             ORDER BY c.id
             LIMIT 1",
            [user_id, target_id],
            chat_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn insert_chat(conn: &Connection, is_group: bool) -> Result<ChatId> {
    conn.execute("INSERT INTO chats (is_group) VALUES (?1)", [is_group])?;
    Ok(conn.last_insert_rowid())
}

pub fn touch_chat(conn: &Connection, chat_id: ChatId) -> Result<()> {
    let sql = format!("UPDATE chats SET updated_at = {NOW} WHERE id = ?1");
    conn.execute(&sql, [chat_id])?;
    Ok(())
}

pub fn insert_member(
    conn: &Connection,
    chat_id: ChatId,
    user_id: UserId,
    title: Option<&str>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO chat_members (chat_id, user_id, title) VALUES (?1, ?2, ?3)",
        rusqlite::params![chat_id, user_id, title],
    )?;
    Ok(())
}

pub fn find_member(
    conn: &Connection,
    chat_id: ChatId,
    user_id: UserId,
) -> Result<Option<ChatMemberRow>> {
    let row = conn
        .query_row(
            "SELECT cm.chat_id, cm.user_id, cm.title, u.name
             FROM chat_members cm
             JOIN users u ON u.id = cm.user_id
             WHERE cm.chat_id = ?1 AND cm.user_id = ?2",
            [chat_id, user_id],
            member_from_row,
        )
        .optional()?;
    Ok(row)
}

pub fn list_members(conn: &Connection, chat_id: ChatId) -> Result<Vec<ChatMemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT cm.chat_id, cm.user_id, cm.title, u.name
         FROM chat_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.chat_id = ?1
         ORDER BY cm.id",
    )?;
    let rows = stmt
        .query_map([chat_id], member_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Every membership row of every chat `user_id` belongs to.
pub fn list_members_of_user_chats(conn: &Connection, user_id: UserId) -> Result<Vec<ChatMemberRow>> {
    let mut stmt = conn.prepare(
        "SELECT cm.chat_id, cm.user_id, cm.title, u.name
         FROM chat_members cm
         JOIN users u ON u.id = cm.user_id
         WHERE cm.chat_id IN (SELECT chat_id FROM chat_members WHERE user_id = ?1)
         ORDER BY cm.chat_id, cm.id",
    )?;
    let rows = stmt
        .query_map([user_id], member_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_chats_of_user(conn: &Connection, user_id: UserId) -> Result<Vec<ChatRow>> {
    let mut stmt = conn.prepare(
        "SELECT c.id, c.is_group, c.created_at, c.updated_at
         FROM chats c
         JOIN chat_members cm ON cm.chat_id = c.id
         WHERE cm.user_id = ?1
         ORDER BY c.id",
    )?;
    let rows = stmt
        .query_map([user_id], chat_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn update_member_title(
    conn: &Connection,
    chat_id: ChatId,
    user_id: UserId,
    title: &str,
) -> Result<usize> {
    let n = conn.execute(
        "UPDATE chat_members SET title = ?3 WHERE chat_id = ?1 AND user_id = ?2",
        rusqlite::params![chat_id, user_id, title],
    )?;
    Ok(n)
}

pub fn delete_member(conn: &Connection, chat_id: ChatId, user_id: UserId) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM chat_members WHERE chat_id = ?1 AND user_id = ?2",
        [chat_id, user_id],
    )?;
    Ok(n)
}

// -- Messages --

pub fn insert_message(
    conn: &Connection,
    chat_id: ChatId,
    author_id: UserId,
    content: Option<&str>,
    image: Option<&str>,
) -> Result<MessageId> {
    conn.execute(
        "INSERT INTO messages (chat_id, author_id, content, image) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![chat_id, author_id, content, image],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_message(
    conn: &Connection,
    chat_id: ChatId,
    message_id: MessageId,
) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         LEFT JOIN users u ON u.id = m.author_id
         WHERE m.id = ?1 AND m.chat_id = ?2"
    );
    let row = conn.query_row(&sql, [message_id, chat_id], message_from_row).optional()?;
    Ok(row)
}

/// One page of a chat's messages, oldest first.
pub fn list_messages(
    conn: &Connection,
    chat_id: ChatId,
    limit: u32,
    skip: u32,
) -> Result<Vec<MessageRow>> {
    // JOIN users to fetch the author name in a single query (no N+1)
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         LEFT JOIN users u ON u.id = m.author_id
         WHERE m.chat_id = ?1
         ORDER BY m.created_at ASC, m.id ASC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(rusqlite::params![chat_id, limit, skip], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Most recent message (deleted or not) of every chat `user_id` belongs to.
/// Ties on `created_at` go to the higher id.
pub fn last_messages_of_user_chats(conn: &Connection, user_id: UserId) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT f.id, f.chat_id, f.author_id, f.author_name, f.content, f.image, f.deleted, f.created_at
         FROM (
             SELECT m.id, m.chat_id, m.author_id, u.name AS author_name,
                    m.content, m.image, m.deleted, m.created_at,
                    ROW_NUMBER() OVER (
                        PARTITION BY m.chat_id ORDER BY m.created_at DESC, m.id DESC
                    ) AS row_idx
             FROM messages m
             LEFT JOIN users u ON u.id = m.author_id
             WHERE m.chat_id IN (SELECT chat_id FROM chat_members WHERE user_id = ?1)
         ) f
         WHERE f.row_idx = 1",
    )?;
    let rows = stmt
        .query_map([user_id], message_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn last_message(conn: &Connection, chat_id: ChatId) -> Result<Option<MessageRow>> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         LEFT JOIN users u ON u.id = m.author_id
         WHERE m.chat_id = ?1
         ORDER BY m.created_at DESC, m.id DESC
         LIMIT 1"
    );
    let row = conn.query_row(&sql, [chat_id], message_from_row).optional()?;
    Ok(row)
}

/// Clears content and image and sets the deleted flag. Only touches active
/// messages; returns the number of rows changed (0 or 1).
pub fn mark_message_deleted(conn: &Connection, message_id: MessageId) -> Result<usize> {
    let n = conn.execute(
        "UPDATE messages SET content = NULL, image = NULL, deleted = 1
         WHERE id = ?1 AND deleted = 0",
        [message_id],
    )?;
    Ok(n)
}

impl Database {
    pub fn get_user_by_id(&self, id: UserId) -> Result<Option<UserRow>> {
        self.with_conn(|conn| find_user_by_id(conn, id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| find_user_by_email(conn, email))
    }

    pub fn save_refresh_token(&self, id: UserId, token: Option<&str>) -> Result<()> {
        self.with_conn(|conn| set_refresh_token(conn, id, token).map(|_| ()))
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        password: row.get(2)?,
        name: row.get(3)?,
        gender: row.get(4)?,
        profile_image: row.get(5)?,
        refresh_token: row.get(6)?,
        status: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<ChatRow> {
    Ok(ChatRow {
        id: row.get(0)?,
        is_group: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn member_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMemberRow> {
    Ok(ChatMemberRow {
        chat_id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        name: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        image: row.get(5)?,
        deleted: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
