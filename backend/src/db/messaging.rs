//! Chat rooms, memberships and messages.
//!
//! Unread counts use the id of the last message a member has read, so
//! messages posted within the same second as a read marker are still counted.

use sqlx::{sqlite::SqliteRow, Row};

use super::repository::{clean, flag, Repository};
use crate::errors::AppError;
use crate::models::{
    now_timestamp, ChatRoom, ChatRoomMember, MemberRole, Message, MessageType, OnlineUser,
    RoomType,
};

/// Room columns with the member count and the unread count of the member
/// bound to the first parameter.
const ROOM_SELECT: &str = "SELECT r.id, r.name, r.description, r.quartier_id, r.room_type, r.created_by, r.is_active, r.created_at, r.updated_at, \
     (SELECT COUNT(*) FROM chat_room_members c WHERE c.chat_room_id = r.id) AS member_count, \
     (SELECT COUNT(*) FROM messages msg WHERE msg.chat_room_id = r.id AND msg.is_deleted = 0 AND me.user_id IS NOT NULL \
        AND msg.id > me.last_read_message_id AND (msg.sender_id IS NULL OR msg.sender_id != me.user_id)) AS unread_count \
     FROM chat_rooms r LEFT JOIN chat_room_members me ON me.chat_room_id = r.id AND me.user_id = ?";

const MESSAGE_SELECT: &str = "SELECT m.id, m.chat_room_id, m.sender_id, u.nom AS sender_nom, u.prenom AS sender_prenom, m.content, m.message_type, m.reply_to_id, m.is_edited, m.is_deleted, m.deleted_at, m.created_at, m.updated_at FROM messages m LEFT JOIN users u ON u.id = m.sender_id";

/// Validated fields of a new room.
#[derive(Debug, Clone)]
pub struct NewRoom {
    pub name: String,
    pub description: Option<String>,
    pub quartier_id: i64,
    pub room_type: RoomType,
    pub created_by: i64,
    pub member_ids: Vec<i64>,
}

/// Normalized message history window.
#[derive(Debug, Clone)]
pub struct MessageWindow {
    pub page: i64,
    pub limit: i64,
    pub before: Option<String>,
    pub after: Option<String>,
}

impl MessageWindow {
    /// Rows skipped before this page, or `None` when the page is out of range.
    pub fn offset(&self) -> Option<i64> {
        self.page.checked_sub(1)?.checked_mul(self.limit)
    }
}

impl Repository {
    // ==================== ROOM OPERATIONS ====================

    /// Create a room with its creator as admin and the listed users as members.
    pub async fn create_room(&self, room: &NewRoom) -> Result<ChatRoom, AppError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO chat_rooms (name, description, quartier_id, room_type, created_by, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 1, ?, ?)"
        )
        .bind(room.name.trim())
        .bind(clean(room.description.as_ref()))
        .bind(room.quartier_id)
        .bind(room.room_type.as_str())
        .bind(room.created_by)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let room_id = result.last_insert_rowid();

        sqlx::query(
            "INSERT INTO chat_room_members (chat_room_id, user_id, role, joined_at, last_read_at, last_read_message_id, is_muted) VALUES (?, ?, 'admin', ?, ?, 0, 0)"
        )
        .bind(room_id)
        .bind(room.created_by)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for member_id in room.member_ids.iter().filter(|id| **id != room.created_by) {
            // Unknown user ids are skipped
            sqlx::query(
                "INSERT OR IGNORE INTO chat_room_members (chat_room_id, user_id, role, joined_at, last_read_at, last_read_message_id, is_muted) SELECT ?, id, 'member', ?, ?, 0, 0 FROM users WHERE id = ?"
            )
            .bind(room_id)
            .bind(&now)
            .bind(&now)
            .bind(member_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        self.get_room(room_id, room.created_by)
            .await?
            .ok_or_else(|| AppError::Internal("Room vanished after insert".to_string()))
    }

    /// Active rooms the user belongs to, most recently updated first.
    pub async fn rooms_for_user(&self, user_id: i64) -> Result<Vec<ChatRoom>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE me.user_id IS NOT NULL AND r.is_active = 1 ORDER BY r.updated_at DESC, r.id DESC",
            ROOM_SELECT
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        self.rooms_with_last_message(&rows).await
    }

    /// Active group rooms of a quartier the user has not joined.
    pub async fn available_rooms(&self, user_id: i64, quartier_id: i64) -> Result<Vec<ChatRoom>, AppError> {
        let rows = sqlx::query(&format!(
            "{} WHERE me.user_id IS NULL AND r.quartier_id = ? AND r.is_active = 1 AND r.room_type = 'group' ORDER BY r.name, r.id",
            ROOM_SELECT
        ))
        .bind(user_id)
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        self.rooms_with_last_message(&rows).await
    }

    /// Get an active room, with the unread count of `user_id`.
    pub async fn get_room(&self, room_id: i64, user_id: i64) -> Result<Option<ChatRoom>, AppError> {
        let row = sqlx::query(&format!(
            "{} WHERE r.id = ? AND r.is_active = 1",
            ROOM_SELECT
        ))
        .bind(user_id)
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.rooms_with_last_message(&[row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn rooms_with_last_message(&self, rows: &[SqliteRow]) -> Result<Vec<ChatRoom>, AppError> {
        let mut rooms = Vec::with_capacity(rows.len());
        for row in rows {
            let mut room = room_from_row(row);
            room.last_message = self.latest_message(room.id).await?;
            rooms.push(room);
        }
        Ok(rooms)
    }

    /// Role of the user in the room, or `None` when not a member.
    pub async fn member_role(&self, room_id: i64, user_id: i64) -> Result<Option<MemberRole>, AppError> {
        let row = sqlx::query(
            "SELECT role FROM chat_room_members WHERE chat_room_id = ? AND user_id = ?",
        )
        .bind(room_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let role: String = row.get("role");
            MemberRole::from_str(&role).unwrap_or(MemberRole::Member)
        }))
    }

    /// Add the user as a member. History before joining counts as read.
    pub async fn join_room(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        let now = now_timestamp();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO chat_room_members (chat_room_id, user_id, role, joined_at, last_read_at, last_read_message_id, is_muted) VALUES (?, ?, 'member', ?, ?, (SELECT COALESCE(MAX(id), 0) FROM messages WHERE chat_room_id = ?), 0)"
        )
        .bind(room_id)
        .bind(user_id)
        .bind(&now)
        .bind(&now)
        .bind(room_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove the user from a room. Returns false when not a member.
    pub async fn leave_room(&self, room_id: i64, user_id: i64) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM chat_room_members WHERE chat_room_id = ? AND user_id = ?")
                .bind(room_id)
                .bind(user_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Members of a room, admins first.
    pub async fn room_members(&self, room_id: i64) -> Result<Vec<ChatRoomMember>, AppError> {
        let rows = sqlx::query(
            "SELECT m.chat_room_id, m.user_id, u.nom, u.prenom, m.role, m.joined_at, m.last_read_at, m.is_muted FROM chat_room_members m JOIN users u ON u.id = m.user_id WHERE m.chat_room_id = ? ORDER BY CASE m.role WHEN 'admin' THEN 0 WHEN 'moderator' THEN 1 ELSE 2 END, u.nom, u.prenom"
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let role: String = row.get("role");
                ChatRoomMember {
                    chat_room_id: row.get("chat_room_id"),
                    user_id: row.get("user_id"),
                    nom: row.get("nom"),
                    prenom: row.get("prenom"),
                    role: MemberRole::from_str(&role).unwrap_or(MemberRole::Member),
                    joined_at: row.get("joined_at"),
                    last_read_at: row.get("last_read_at"),
                    is_muted: flag(row.get("is_muted")),
                }
            })
            .collect())
    }

    /// Number of messages from others the member has not read.
    pub async fn unread_count(&self, room_id: i64, user_id: i64) -> Result<i64, AppError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count FROM messages msg JOIN chat_room_members me ON me.chat_room_id = msg.chat_room_id AND me.user_id = ? WHERE msg.chat_room_id = ? AND msg.is_deleted = 0 AND msg.id > me.last_read_message_id AND (msg.sender_id IS NULL OR msg.sender_id != me.user_id)"
        )
        .bind(user_id)
        .bind(room_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("count"))
    }

    /// Mark every message of the room as read by the member.
    pub async fn mark_read(&self, room_id: i64, user_id: i64) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE chat_room_members SET last_read_at = ?, last_read_message_id = (SELECT COALESCE(MAX(id), 0) FROM messages WHERE chat_room_id = ?) WHERE chat_room_id = ? AND user_id = ?"
        )
        .bind(now_timestamp())
        .bind(room_id)
        .bind(room_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // ==================== MESSAGE OPERATIONS ====================

    /// A page of room history in chronological order. Page 1 holds the newest messages.
    pub async fn list_messages(&self, room_id: i64, window: &MessageWindow) -> Result<Vec<Message>, AppError> {
        let offset = window
            .offset()
            .ok_or_else(|| AppError::Validation("page hors limites".to_string()))?;
        let rows = sqlx::query(&format!(
            "{} WHERE m.chat_room_id = ? AND m.is_deleted = 0 AND (? IS NULL OR m.created_at < ?) AND (? IS NULL OR m.created_at > ?) ORDER BY m.id DESC LIMIT ? OFFSET ?",
            MESSAGE_SELECT
        ))
        .bind(room_id)
        .bind(&window.before)
        .bind(&window.before)
        .bind(&window.after)
        .bind(&window.after)
        .bind(window.limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<Message> = rows.iter().map(message_from_row).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Latest visible message of a room.
    pub async fn latest_message(&self, room_id: i64) -> Result<Option<Message>, AppError> {
        let row = sqlx::query(&format!(
            "{} WHERE m.chat_room_id = ? AND m.is_deleted = 0 ORDER BY m.id DESC LIMIT 1",
            MESSAGE_SELECT
        ))
        .bind(room_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(message_from_row))
    }

    /// Get a message by ID.
    pub async fn get_message(&self, id: i64) -> Result<Option<Message>, AppError> {
        let row = sqlx::query(&format!("{} WHERE m.id = ?", MESSAGE_SELECT))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(message_from_row))
    }

    /// Post a message and bump the room. The sender's read marker moves past it.
    pub async fn create_message(
        &self,
        room_id: i64,
        sender_id: i64,
        content: &str,
        message_type: MessageType,
        reply_to_id: Option<i64>,
    ) -> Result<Message, AppError> {
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO messages (chat_room_id, sender_id, content, message_type, reply_to_id, is_edited, is_deleted, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)"
        )
        .bind(room_id)
        .bind(sender_id)
        .bind(content.trim())
        .bind(message_type.as_str())
        .bind(reply_to_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let message_id = result.last_insert_rowid();

        sqlx::query("UPDATE chat_rooms SET updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(room_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "UPDATE chat_room_members SET last_read_at = ?, last_read_message_id = ? WHERE chat_room_id = ? AND user_id = ?",
        )
        .bind(&now)
        .bind(message_id)
        .bind(room_id)
        .bind(sender_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        self.get_message(message_id)
            .await?
            .ok_or_else(|| AppError::Internal("Message vanished after insert".to_string()))
    }

    /// Replace the content of a message.
    pub async fn edit_message(&self, id: i64, content: &str) -> Result<Message, AppError> {
        sqlx::query("UPDATE messages SET content = ?, is_edited = 1, updated_at = ? WHERE id = ?")
            .bind(content.trim())
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.get_message(id)
            .await?
            .ok_or_else(|| AppError::NotFound("Message non trouvé".to_string()))
    }

    /// Soft-delete a message.
    pub async fn soft_delete_message(&self, id: i64) -> Result<bool, AppError> {
        let now = now_timestamp();
        let result = sqlx::query(
            "UPDATE messages SET is_deleted = 1, deleted_at = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Users of a quartier among `user_ids`.
    pub async fn users_in_quartier(
        &self,
        quartier_id: i64,
        user_ids: &[i64],
    ) -> Result<Vec<OnlineUser>, AppError> {
        let rows = sqlx::query(
            "SELECT id, nom, prenom FROM users WHERE quartier_id = ? ORDER BY nom, prenom, id",
        )
        .bind(quartier_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| OnlineUser {
                id: row.get("id"),
                nom: row.get("nom"),
                prenom: row.get("prenom"),
            })
            .filter(|u| user_ids.contains(&u.id))
            .collect())
    }
}

fn room_from_row(row: &SqliteRow) -> ChatRoom {
    let room_type: String = row.get("room_type");
    ChatRoom {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        quartier_id: row.get("quartier_id"),
        room_type: RoomType::from_str(&room_type).unwrap_or(RoomType::Group),
        created_by: row.get("created_by"),
        is_active: flag(row.get("is_active")),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        member_count: row.get("member_count"),
        unread_count: row.get("unread_count"),
        last_message: None,
    }
}

fn message_from_row(row: &SqliteRow) -> Message {
    let message_type: String = row.get("message_type");
    Message {
        id: row.get("id"),
        chat_room_id: row.get("chat_room_id"),
        sender_id: row.get("sender_id"),
        sender_nom: row.get("sender_nom"),
        sender_prenom: row.get("sender_prenom"),
        content: row.get("content"),
        message_type: MessageType::from_str(&message_type).unwrap_or(MessageType::Text),
        reply_to_id: row.get("reply_to_id"),
        is_edited: flag(row.get("is_edited")),
        is_deleted: flag(row.get("is_deleted")),
        deleted_at: row.get("deleted_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
