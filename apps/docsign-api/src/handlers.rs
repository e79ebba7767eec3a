//! HTTP handlers for DocSign API

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use docsign_core::{
    build_trail, AuditTrail, Contact, ContentRef, Effect, EngineError, OtpIssued, Outcome,
    PackageStatus, ParticipantView, QuotaLedger, Receiver,
};
use sha2::{Digest, Sha256};
use shared_types::{ContactId, FieldId, InitiatorId, PackageId, ParticipantAssignmentId};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::*;
use crate::state::AppState;

type PackagePath = Path<PackageId>;
type ParticipantPath = Path<(PackageId, ParticipantAssignmentId)>;

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// First address in `X-Forwarded-For`, recorded in the audit chain as a hash
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Write a finished operation through to sqlite. An expired package was
/// already committed by the engine before the error surfaced, so mirror it.
async fn settle<T>(
    state: &AppState,
    id: &PackageId,
    result: docsign_core::Result<Outcome<T>>,
) -> Result<Outcome<T>, ApiError> {
    match result {
        Ok(outcome) => {
            state.persist(&outcome.package).await?;
            Ok(outcome)
        }
        Err(e) => {
            if matches!(
                e,
                EngineError::InvalidState {
                    status: PackageStatus::Expired
                }
            ) {
                state.mirror(id).await?;
            }
            Err(e.into())
        }
    }
}

/// Add or update a directory contact
pub async fn upsert_contact(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ContactRequest>,
) -> Result<Json<Contact>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::InvalidRequest("contact name is required".into()));
    }
    if !req.email.contains('@') {
        return Err(ApiError::InvalidRequest(format!(
            "invalid email address: {}",
            req.email
        )));
    }

    let contact = Contact {
        id: req.id.unwrap_or_else(ContactId::generate),
        owner: req.owner,
        name: req.name.trim().to_string(),
        email: req.email.trim().to_string(),
        phone: req.phone.filter(|p| !p.trim().is_empty()),
        language: req.language.unwrap_or_else(|| "en".to_string()),
    };

    state.welcome(&contact.owner).await?;
    state.save_contact(&contact).await?;

    tracing::info!("Saved contact {} for {}", contact.id, contact.owner);
    Ok(Json(contact))
}

pub async fn grant_credits(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GrantCreditsRequest>,
) -> Result<Json<CreditsResponse>, ApiError> {
    if req.credits == 0 {
        return Err(ApiError::InvalidRequest("credits must be positive".into()));
    }
    state.welcome(&req.initiator_id).await?;
    state.ledger.grant(&req.initiator_id, req.credits);
    let balance = state.sync_balance(&req.initiator_id).await?;

    tracing::info!(
        "Granted {} credits to {}, balance {}",
        req.credits,
        req.initiator_id,
        balance
    );
    Ok(Json(CreditsResponse {
        initiator_id: req.initiator_id,
        balance,
    }))
}

pub async fn get_credits(
    State(state): State<Arc<AppState>>,
    Path(initiator): Path<InitiatorId>,
) -> Result<Json<CreditsResponse>, ApiError> {
    let balance = state
        .ledger
        .balance(&initiator)
        .map_err(|e| ApiError::Internal(e.into()))?;
    Ok(Json(CreditsResponse {
        initiator_id: initiator,
        balance,
    }))
}

/// Create a package, optionally sending it straight away
pub async fn create_package(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreatePackageRequest>,
) -> Result<(StatusCode, Json<PackageResponse>), ApiError> {
    state.welcome(&req.initiator_id).await?;

    let content = match (&req.pdf_base64, &req.content) {
        (Some(encoded), _) => {
            let pdf_data = BASE64
                .decode(encoded)
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid PDF base64: {}", e)))?;
            let sha256 = hex::encode(Sha256::digest(&pdf_data));
            let storage_key = format!("packages/{}.pdf", Uuid::new_v4());
            state.store_document(&storage_key, &sha256, &pdf_data).await?;
            ContentRef {
                storage_key,
                sha256,
            }
        }
        (None, Some(content)) => content.clone(),
        (None, None) => {
            return Err(ApiError::InvalidRequest(
                "either pdf_base64 or content is required".into(),
            ))
        }
    };

    let initiator = req.initiator_id.clone();
    let outcome = state.engine.create_package(req.into_new_package(content))?;
    state.persist(&outcome.package).await?;
    state.sync_balance(&initiator).await?;

    tracing::info!(
        "Created package {} ({})",
        outcome.value,
        outcome.package.status
    );
    Ok((
        StatusCode::CREATED,
        Json(PackageResponse::from(&outcome.package)),
    ))
}

pub async fn get_package(
    State(state): State<Arc<AppState>>,
    Path(id): PackagePath,
) -> Result<Json<PackageResponse>, ApiError> {
    let package = state.engine.get_package(&id)?;
    // Reading may have expired it
    state.persist(&package).await?;
    Ok(Json(PackageResponse::from(&package)))
}

/// Get the source PDF of a package
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Path(id): PackagePath,
) -> Result<(StatusCode, [(String, String); 2], Vec<u8>), ApiError> {
    let package = state.engine.get_package(&id)?;
    let pdf_data = state
        .load_document(&package.content.storage_key)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("document {}", package.content.storage_key))
        })?;

    Ok((
        StatusCode::OK,
        [
            ("Content-Type".to_string(), "application/pdf".to_string()),
            (
                "Content-Disposition".to_string(),
                format!("inline; filename=\"{}.pdf\"", package.name),
            ),
        ],
        pdf_data,
    ))
}

pub async fn send_package(
    State(state): State<Arc<AppState>>,
    Path(id): PackagePath,
    Json(req): Json<SendRequest>,
) -> Result<Json<ActionResponse<u32>>, ApiError> {
    let result = state.engine.send_package(&id, &req.initiator_id);
    let outcome = settle(&state, &id, result).await?;
    state.sync_balance(&req.initiator_id).await?;

    tracing::info!("Sent package {} for {} credits", id, outcome.value);
    Ok(Json(ActionResponse::new(outcome.value, &outcome.package)))
}

pub async fn revoke_package(
    State(state): State<Arc<AppState>>,
    Path(id): PackagePath,
    headers: HeaderMap,
    Json(req): Json<RevokeRequest>,
) -> Result<Json<ActionResponse<()>>, ApiError> {
    let ip = client_ip(&headers);
    let result = state.engine.revoke_package(
        &id,
        &req.initiator_id,
        req.reason.as_deref(),
        ip.as_deref(),
    );
    let outcome = settle(&state, &id, result).await?;
    Ok(Json(ActionResponse::new((), &outcome.package)))
}

/// Structured audit trail, available in any state
pub async fn get_audit(
    State(state): State<Arc<AppState>>,
    Path(id): PackagePath,
) -> Result<Json<AuditTrail>, ApiError> {
    let package = state.engine.get_package(&id)?;
    state.persist(&package).await?;
    Ok(Json(build_trail(&package)))
}

pub async fn participant_view(
    State(state): State<Arc<AppState>>,
    Path((id, participant)): ParticipantPath,
) -> Result<Json<ParticipantView>, ApiError> {
    let view = state.engine.participant_view(&id, &participant)?;
    if view.status == PackageStatus::Expired {
        state.mirror(&id).await?;
    }
    Ok(Json(view))
}

pub async fn submit_fields(
    State(state): State<Arc<AppState>>,
    Path((id, participant)): ParticipantPath,
    headers: HeaderMap,
    Json(req): Json<SubmitFieldsRequest>,
) -> Result<Json<ActionResponse<Vec<FieldId>>>, ApiError> {
    let ip = client_ip(&headers);
    let result = state
        .engine
        .submit_fields(&id, &participant, req.values, ip.as_deref());
    let outcome = settle(&state, &id, result).await?;
    Ok(Json(ActionResponse::new(outcome.value, &outcome.package)))
}

pub async fn issue_otp(
    State(state): State<Arc<AppState>>,
    Path((id, participant)): ParticipantPath,
    Json(req): Json<IssueOtpRequest>,
) -> Result<Json<ActionResponse<OtpIssued>>, ApiError> {
    let result = state.engine.issue_otp(
        &id,
        &req.field_id,
        &participant,
        req.channel,
        &req.destination,
    );
    let outcome = settle(&state, &id, result).await?;
    Ok(Json(ActionResponse::new(outcome.value, &outcome.package)))
}

pub async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path((id, participant)): ParticipantPath,
    headers: HeaderMap,
    Json(req): Json<VerifyOtpRequest>,
) -> Result<Json<ActionResponse<Vec<FieldId>>>, ApiError> {
    let ip = client_ip(&headers);
    let result =
        state
            .engine
            .verify_otp(&id, &req.field_id, &participant, &req.code, ip.as_deref());
    let outcome = settle(&state, &id, result).await?;

    tracing::info!(
        "Participant {} signed {} fields on {}",
        participant,
        outcome.value.len(),
        id
    );
    Ok(Json(ActionResponse::new(outcome.value, &outcome.package)))
}

pub async fn reject_package(
    State(state): State<Arc<AppState>>,
    Path((id, participant)): ParticipantPath,
    headers: HeaderMap,
    Json(req): Json<RejectRequest>,
) -> Result<Json<ActionResponse<()>>, ApiError> {
    let ip = client_ip(&headers);
    let result = state
        .engine
        .reject_package(&id, &participant, &req.reason, ip.as_deref());
    let outcome = settle(&state, &id, result).await?;
    Ok(Json(ActionResponse::new((), &outcome.package)))
}

pub async fn reassign(
    State(state): State<Arc<AppState>>,
    Path((id, participant)): ParticipantPath,
    headers: HeaderMap,
    Json(req): Json<ReassignRequest>,
) -> Result<Json<ActionResponse<ParticipantAssignmentId>>, ApiError> {
    let ip = client_ip(&headers);
    let result = state.engine.reassign(
        &id,
        &participant,
        &req.contact_id,
        req.reason.as_deref(),
        ip.as_deref(),
    );
    let outcome = settle(&state, &id, result).await?;
    Ok(Json(ActionResponse::new(outcome.value, &outcome.package)))
}

pub async fn add_receiver(
    State(state): State<Arc<AppState>>,
    Path((id, participant)): ParticipantPath,
    headers: HeaderMap,
    Json(req): Json<AddReceiverRequest>,
) -> Result<Json<ActionResponse<Receiver>>, ApiError> {
    let ip = client_ip(&headers);
    let result = state
        .engine
        .add_receiver(&id, &participant, &req.contact_id, ip.as_deref());
    let outcome = settle(&state, &id, result).await?;
    Ok(Json(ActionResponse::new(outcome.value, &outcome.package)))
}

/// Sweep every sent package for due reminders and lapsed expiry
pub async fn run_reminders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<RemindersResponse>, ApiError> {
    let effects = state.engine.due_reminders()?;
    state.mirror_all().await?;

    let notifications = effects
        .iter()
        .filter(|e| matches!(e, Effect::Notify(_)))
        .count();
    tracing::info!("Reminder sweep sent {} notifications", notifications);
    Ok(Json(RemindersResponse { notifications }))
}
