//! Messaging API endpoints and the real-time WebSocket.

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
    Extension, Json,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

use super::{created, message, success, ApiResult, MessageBody};
use crate::auth::{authenticate, CurrentUser};
use crate::db::{MessageWindow, NewRoom};
use crate::errors::AppError;
use crate::models::{
    non_empty, timestamp_field, ChatRoom, ChatRoomMember, CreateRoomRequest, EditMessageRequest,
    HubEvent, MemberRole, Message, MessageType, MessagesQuery, OnlineUser, RoomType,
    SendMessageRequest, UnreadCount,
};
use crate::AppState;

const MAX_ROOM_NAME: usize = 255;
const MAX_ROOM_DESCRIPTION: usize = 1000;
const DEFAULT_PAGE_SIZE: i64 = 50;
const MAX_PAGE_SIZE: i64 = 100;

async fn load_room(state: &AppState, room_id: i64, user_id: i64) -> Result<ChatRoom, AppError> {
    state
        .repo
        .get_room(room_id, user_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Salon non trouvé".to_string()))
}

/// The caller's role in an existing room; 403 for non-members.
async fn ensure_member(
    state: &AppState,
    room_id: i64,
    user_id: i64,
) -> Result<MemberRole, AppError> {
    load_room(state, room_id, user_id).await?;
    state
        .repo
        .member_role(room_id, user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("Vous n'êtes pas membre de ce salon".to_string()))
}

async fn load_message(state: &AppState, id: i64) -> Result<Message, AppError> {
    match state.repo.get_message(id).await? {
        Some(message) if !message.is_deleted => Ok(message),
        _ => Err(AppError::NotFound("Message non trouvé".to_string())),
    }
}

fn message_content(content: &str) -> Result<&str, AppError> {
    non_empty(Some(content))
        .ok_or_else(|| AppError::Validation("Le message ne peut pas être vide".to_string()))
}

// ==================== ROOMS ====================

/// GET /api/messaging/rooms - The user's rooms, most recently active first.
pub async fn list_rooms(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<ChatRoom>> {
    success(state.repo.rooms_for_user(current.id()).await?)
}

/// GET /api/messaging/rooms/available - Group rooms of the user's quartier not yet joined.
pub async fn available_rooms(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<ChatRoom>> {
    let quartier_id = current.require_quartier()?;
    success(state.repo.available_rooms(current.id(), quartier_id).await?)
}

/// GET /api/messaging/rooms/{id}
pub async fn get_room(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
) -> ApiResult<ChatRoom> {
    ensure_member(&state, room_id, current.id()).await?;
    success(load_room(&state, room_id, current.id()).await?)
}

/// POST /api/messaging/rooms - Create a room in the user's quartier.
pub async fn create_room(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreateRoomRequest>,
) -> ApiResult<ChatRoom> {
    let quartier_id = current.require_quartier()?;

    let name = request.name.trim();
    if name.is_empty() || name.chars().count() > MAX_ROOM_NAME {
        return Err(AppError::Validation(
            "Le nom du salon doit contenir entre 1 et 255 caractères".to_string(),
        ));
    }
    if request
        .description
        .as_deref()
        .is_some_and(|d| d.chars().count() > MAX_ROOM_DESCRIPTION)
    {
        return Err(AppError::Validation(
            "La description ne peut pas dépasser 1000 caractères".to_string(),
        ));
    }

    let room = state
        .repo
        .create_room(&NewRoom {
            name: name.to_string(),
            description: request.description.clone(),
            quartier_id,
            room_type: request.room_type.unwrap_or(RoomType::Group),
            created_by: current.id(),
            member_ids: request.member_ids.clone(),
        })
        .await?;

    tracing::info!(room_id = room.id, quartier_id, "Chat room created");
    created(room)
}

/// POST /api/messaging/rooms/{id}/join - Join a group room of the user's quartier.
pub async fn join_room(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
) -> ApiResult<MessageBody> {
    let room = load_room(&state, room_id, current.id()).await?;

    if current.0.quartier_id != Some(room.quartier_id) {
        return Err(AppError::Forbidden(
            "Ce salon n'appartient pas à votre quartier".to_string(),
        ));
    }
    if room.room_type == RoomType::Direct {
        return Err(AppError::Forbidden(
            "Impossible de rejoindre une conversation privée".to_string(),
        ));
    }

    state.repo.join_room(room_id, current.id()).await?;
    message("Salon rejoint")
}

/// POST /api/messaging/rooms/{id}/leave
pub async fn leave_room(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
) -> ApiResult<MessageBody> {
    if !state.repo.leave_room(room_id, current.id()).await? {
        return Err(AppError::NotFound(
            "Vous n'êtes pas membre de ce salon".to_string(),
        ));
    }
    message("Salon quitté")
}

/// GET /api/messaging/rooms/{id}/members
pub async fn room_members(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
) -> ApiResult<Vec<ChatRoomMember>> {
    ensure_member(&state, room_id, current.id()).await?;
    success(state.repo.room_members(room_id).await?)
}

/// GET /api/messaging/rooms/{id}/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
) -> ApiResult<UnreadCount> {
    ensure_member(&state, room_id, current.id()).await?;
    success(UnreadCount {
        unread_count: state.repo.unread_count(room_id, current.id()).await?,
    })
}

/// POST /api/messaging/rooms/{id}/mark-read
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
) -> ApiResult<MessageBody> {
    ensure_member(&state, room_id, current.id()).await?;
    state.repo.mark_read(room_id, current.id()).await?;
    message("Messages marqués comme lus")
}

// ==================== MESSAGES ====================

/// GET /api/messaging/rooms/{id}/messages - A page of history, oldest first.
pub async fn list_messages(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Vec<Message>> {
    ensure_member(&state, room_id, current.id()).await?;

    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(AppError::Validation(
            "limit doit être compris entre 1 et 100".to_string(),
        ));
    }
    let page = query.page.unwrap_or(1);
    if page < 1 {
        return Err(AppError::Validation("page doit être ≥ 1".to_string()));
    }

    let window = MessageWindow {
        page,
        limit,
        before: timestamp_field("before", query.before.as_deref())?,
        after: timestamp_field("after", query.after.as_deref())?,
    };
    if window.offset().is_none() {
        return Err(AppError::Validation("page hors limites".to_string()));
    }
    success(state.repo.list_messages(room_id, &window).await?)
}

/// POST /api/messaging/rooms/{id}/messages - Post and broadcast a message.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(room_id): Path<i64>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Message> {
    ensure_member(&state, room_id, current.id()).await?;
    let content = message_content(&request.content)?;

    if let Some(reply_to_id) = request.reply_to_id {
        let original = load_message(&state, reply_to_id).await?;
        if original.chat_room_id != room_id {
            return Err(AppError::BadRequest(
                "Le message cité n'appartient pas à ce salon".to_string(),
            ));
        }
    }

    let message = state
        .repo
        .create_message(
            room_id,
            current.id(),
            content,
            request.message_type.unwrap_or(MessageType::Text),
            request.reply_to_id,
        )
        .await?;

    state.hub.publish(HubEvent::MessageReceived {
        message: message.clone(),
    });
    created(message)
}

/// PUT /api/messaging/messages/{id} - Edit one's own message.
pub async fn edit_message(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(message_id): Path<i64>,
    Json(request): Json<EditMessageRequest>,
) -> ApiResult<Message> {
    let existing = load_message(&state, message_id).await?;
    if existing.sender_id != Some(current.id()) {
        return Err(AppError::Forbidden(
            "Vous ne pouvez modifier que vos propres messages".to_string(),
        ));
    }
    let content = message_content(&request.content)?;

    let message = state.repo.edit_message(message_id, content).await?;
    state.hub.publish(HubEvent::MessageUpdated {
        message: message.clone(),
    });
    success(message)
}

/// DELETE /api/messaging/messages/{id} - Soft-delete (sender or room moderator).
pub async fn delete_message(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(message_id): Path<i64>,
) -> ApiResult<MessageBody> {
    let existing = load_message(&state, message_id).await?;

    if existing.sender_id != Some(current.id()) {
        let role = state
            .repo
            .member_role(existing.chat_room_id, current.id())
            .await?;
        if !role.is_some_and(|r| r.can_moderate()) {
            return Err(AppError::Forbidden(
                "Vous ne pouvez pas supprimer ce message".to_string(),
            ));
        }
    }

    if state.repo.soft_delete_message(message_id).await? {
        state.hub.publish(HubEvent::MessageDeleted {
            message_id,
            chat_room_id: existing.chat_room_id,
        });
    }
    message("Message supprimé")
}

/// GET /api/messaging/users/online - Connected users of the caller's quartier.
pub async fn online_users(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
) -> ApiResult<Vec<OnlineUser>> {
    let quartier_id = current.require_quartier()?;
    let online = state.hub.online_ids().await;
    success(state.repo.users_in_quartier(quartier_id, &online).await?)
}

// ==================== WEBSOCKET ====================

#[derive(Debug, Deserialize)]
pub struct SocketQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// GET /api/messaging/ws?token= - Upgrade to a WebSocket pushing room events.
pub async fn messaging_socket(
    State(state): State<AppState>,
    Query(query): Query<SocketQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = non_empty(query.token.as_deref())
        .ok_or_else(|| AppError::Unauthorized("Token d'authentification requis".to_string()))?;
    let user = authenticate(&state, token).await?;

    Ok(ws.on_upgrade(move |socket| serve_socket(state, user.id, socket)))
}

async fn serve_socket(state: AppState, user_id: i64, socket: WebSocket) {
    // Subscribed before the user shows as online
    let mut events = state.hub.subscribe();
    state.hub.connect(user_id).await;

    let (mut sender, mut receiver) = socket.split();
    let push_state = state.clone();

    let mut push = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(user_id, skipped, "WebSocket client lagging");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            match push_state.repo.member_role(event.room_id(), user_id).await {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Failed to check room membership: {}", e);
                    continue;
                }
            }

            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!("Failed to encode hub event: {}", e);
                    continue;
                }
            };
            if sender.send(WsMessage::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Client frames are ignored until close
    let mut recv = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            if matches!(frame, WsMessage::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut push => recv.abort(),
        _ = &mut recv => push.abort(),
    }

    state.hub.disconnect(user_id).await;
}
