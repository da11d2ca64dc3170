//! Event API endpoints.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};

use super::{
    created, ensure_quartier, message, reindex, search_term, success, unindex, ApiResult,
    MessageBody, SEARCH_LIMIT,
};
use crate::auth::CurrentUser;
use crate::db::NewEvenement;
use crate::errors::AppError;
use crate::models::{
    non_empty, now_timestamp, timestamp_field, CreateEvenementRequest, Evenement,
    EvenementSearchQuery, Participant, ParticipationStatus, UpdateEvenementRequest,
};
use crate::search::ListingKind;
use crate::AppState;

async fn load(state: &AppState, id: i64) -> Result<Evenement, AppError> {
    state
        .repo
        .get_evenement(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Événement {} non trouvé", id)))
}

fn ensure_organizer(current: &CurrentUser, event: &Evenement) -> Result<(), AppError> {
    if event.organisateur_id == current.id() || current.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(
            "Seul l'organisateur peut modifier cet événement".to_string(),
        ))
    }
}

/// GET /api/evenements - All events, latest date first.
pub async fn list_evenements(State(state): State<AppState>) -> ApiResult<Vec<Evenement>> {
    success(state.repo.list_evenements().await?)
}

/// GET /api/evenements/upcoming - Upcoming events, soonest first.
pub async fn upcoming_evenements(State(state): State<AppState>) -> ApiResult<Vec<Evenement>> {
    success(state.repo.upcoming_evenements(&now_timestamp(), None).await?)
}

/// GET /api/evenements/upcoming/{quartier_id}
pub async fn upcoming_evenements_by_quartier(
    State(state): State<AppState>,
    Path(quartier_id): Path<i64>,
) -> ApiResult<Vec<Evenement>> {
    success(
        state
            .repo
            .upcoming_evenements(&now_timestamp(), Some(quartier_id))
            .await?,
    )
}

/// GET /api/evenements/past - Past events, most recent first.
pub async fn past_evenements(State(state): State<AppState>) -> ApiResult<Vec<Evenement>> {
    success(state.repo.past_evenements(&now_timestamp(), None).await?)
}

/// GET /api/evenements/past/{quartier_id}
pub async fn past_evenements_by_quartier(
    State(state): State<AppState>,
    Path(quartier_id): Path<i64>,
) -> ApiResult<Vec<Evenement>> {
    success(
        state
            .repo
            .past_evenements(&now_timestamp(), Some(quartier_id))
            .await?,
    )
}

/// GET /api/evenements/quartier/{quartier_id}
pub async fn evenements_by_quartier(
    State(state): State<AppState>,
    Path(quartier_id): Path<i64>,
) -> ApiResult<Vec<Evenement>> {
    success(state.repo.evenements_by_quartier(quartier_id).await?)
}

/// GET /api/evenements/search?q=&quartier_id= - Full-text event search.
pub async fn search_evenements(
    State(state): State<AppState>,
    Query(query): Query<EvenementSearchQuery>,
) -> ApiResult<Vec<Evenement>> {
    let term = search_term(query.q.as_deref())?;
    let ids = state.search.search(
        ListingKind::Evenement,
        term,
        query.quartier_id,
        SEARCH_LIMIT,
        0,
    )?;

    let mut events = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(event) = state.repo.get_evenement(id).await? {
            events.push(event);
        }
    }
    success(events)
}

/// GET /api/evenements/{id} - Get a single event.
pub async fn get_evenement(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Evenement> {
    success(load(&state, id).await?)
}

/// GET /api/evenements/organisateur/{id} - Events organized by a user.
pub async fn evenements_by_organisateur(
    State(state): State<AppState>,
    Path(organisateur_id): Path<i64>,
) -> ApiResult<Vec<Evenement>> {
    success(state.repo.evenements_by_organisateur(organisateur_id).await?)
}

/// POST /api/evenements - Create an event in the organizer's quartier by default.
pub async fn create_evenement(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Json(request): Json<CreateEvenementRequest>,
) -> ApiResult<Evenement> {
    let nom = non_empty(Some(request.nom.as_str()))
        .ok_or_else(|| AppError::Validation("Le nom est requis".to_string()))?;
    let lieu = non_empty(Some(request.lieu.as_str()))
        .ok_or_else(|| AppError::Validation("Le lieu est requis".to_string()))?;
    let date_evenement = timestamp_field("date_evenement", request.date_evenement.as_deref())?
        .ok_or_else(|| AppError::Validation("La date est requise".to_string()))?;

    let quartier_id = request.quartier_id.or(current.0.quartier_id);
    if let Some(quartier_id) = quartier_id {
        ensure_quartier(&state, quartier_id).await?;
    }

    let event = state
        .repo
        .create_evenement(&NewEvenement {
            organisateur_id: current.id(),
            nom: nom.to_string(),
            description: request.description.clone(),
            date_evenement,
            lieu: lieu.to_string(),
            type_evenement: request.type_evenement.clone(),
            photo_url: request.photo_url.clone(),
            quartier_id,
        })
        .await?;

    reindex(&state, &event).await;
    tracing::info!(evenement_id = event.id, organisateur_id = current.id(), "Event created");
    created(event)
}

/// PUT /api/evenements/{id} - Update an event (organizer or admin).
pub async fn update_evenement(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
    Json(mut request): Json<UpdateEvenementRequest>,
) -> ApiResult<Evenement> {
    let existing = load(&state, id).await?;
    ensure_organizer(&current, &existing)?;

    if request.date_evenement.is_some() {
        request.date_evenement = Some(
            timestamp_field("date_evenement", request.date_evenement.as_deref())?
                .ok_or_else(|| AppError::Validation("La date est requise".to_string()))?,
        );
    }
    if let Some(quartier_id) = request.quartier_id {
        ensure_quartier(&state, quartier_id).await?;
    }

    let event = state.repo.update_evenement(id, &request).await?;
    reindex(&state, &event).await;
    success(event)
}

/// DELETE /api/evenements/{id} - Delete an event and its participations.
pub async fn delete_evenement(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<MessageBody> {
    let existing = load(&state, id).await?;
    ensure_organizer(&current, &existing)?;

    state.repo.delete_evenement(id).await?;
    unindex(&state, ListingKind::Evenement, id).await;

    tracing::info!(evenement_id = id, by = current.id(), "Event deleted");
    message("Événement supprimé")
}

/// GET /api/evenements/{id}/participants
pub async fn list_participants(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Participant>> {
    load(&state, id).await?;
    success(state.repo.list_participants(id).await?)
}

/// POST /api/evenements/{id}/participate - Register for an upcoming event.
pub async fn participate(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<MessageBody> {
    let event = load(&state, id).await?;
    if event.date_evenement < now_timestamp() {
        return Err(AppError::BadRequest(
            "Impossible de participer à un événement passé".to_string(),
        ));
    }

    state.repo.add_participation(id, current.id()).await?;
    message("Participation enregistrée")
}

/// DELETE /api/evenements/{id}/participate - Withdraw from an event.
pub async fn cancel_participation(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<MessageBody> {
    load(&state, id).await?;

    if !state.repo.remove_participation(id, current.id()).await? {
        return Err(AppError::BadRequest(
            "Vous ne participez pas à cet événement".to_string(),
        ));
    }
    message("Participation annulée")
}

/// GET /api/evenements/{id}/check-participation
pub async fn check_participation(
    State(state): State<AppState>,
    Extension(current): Extension<CurrentUser>,
    Path(id): Path<i64>,
) -> ApiResult<ParticipationStatus> {
    load(&state, id).await?;
    success(ParticipationStatus {
        is_participant: state.repo.is_participant(id, current.id()).await?,
    })
}
