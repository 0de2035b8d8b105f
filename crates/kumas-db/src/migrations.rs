use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            email           TEXT NOT NULL UNIQUE,
            password        TEXT NOT NULL,
            name            TEXT NOT NULL,
            gender          TEXT NOT NULL CHECK (gender IN ('M', 'F')),
            profile_image   TEXT,
            refresh_token   TEXT,
            status          TEXT NOT NULL DEFAULT 'active'
                                CHECK (status IN ('active', 'deleted')),
            created_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            deleted_at      TEXT
        );

        CREATE TABLE IF NOT EXISTS friends (
            user_id     INTEGER NOT NULL REFERENCES users(id),
            target_id   INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            PRIMARY KEY (user_id, target_id),
            CHECK (user_id <> target_id)
        );

        CREATE TABLE IF NOT EXISTS chats (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            is_group    INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            updated_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS chat_members (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            title       TEXT,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            UNIQUE (chat_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_chat_members_user
            ON chat_members(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chats(id),
            author_id   INTEGER NOT NULL REFERENCES users(id),
            content     TEXT,
            image       TEXT,
            deleted     INTEGER NOT NULL DEFAULT 0,
            created_at  TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
            CHECK (deleted = 0 OR (content IS NULL AND image IS NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at, id);

        -- Soft deletion of a message is one-way
        CREATE TRIGGER IF NOT EXISTS trg_messages_deleted_terminal
            BEFORE UPDATE OF deleted ON messages
            WHEN OLD.deleted = 1 AND NEW.deleted = 0
        BEGIN
            SELECT RAISE(ABORT, 'message deletion is terminal');
        END;
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
