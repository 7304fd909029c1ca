use std::collections::HashMap;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use common::storage::{BlobStore, ContentHash};
use sea_orm::*;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use uuid::Uuid;

use crate::attachments;
use crate::entity::{delivery, delivery_file, user};
use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::delivery_form::DeliveryForm;
use crate::models::delivery::{
    DeliveryChanges, DeliveryRequest, DeliveryResponse, FileSlot, UploadedFile,
    parse_delivery_fields, validate_uploads,
};
use crate::models::shared::FieldErrors;
use crate::reference;
use crate::state::AppState;
use crate::utils::filename::content_disposition_value;

/// Room for three attachments plus the text fields.
pub fn delivery_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(200 * 1024 * 1024) // 200 MB
}

#[utoipa::path(
    get,
    path = "/",
    tag = "Deliveries",
    operation_id = "listDeliveries",
    summary = "List deliveries",
    description = "Returns every delivery, newest first (`created_at` descending, ties by id descending).",
    responses(
        (status = 200, description = "All deliveries", body = Vec<DeliveryResponse>),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user))]
pub async fn list_deliveries(
    _auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<DeliveryResponse>>, AppError> {
    let deliveries = delivery::Entity::find()
        .order_by_desc(delivery::Column::CreatedAt)
        .order_by_desc(delivery::Column::Id)
        .all(&state.db)
        .await?;

    Ok(Json(load_responses(&state.db, deliveries).await?))
}

#[utoipa::path(
    post,
    path = "/",
    tag = "Deliveries",
    operation_id = "createDelivery",
    summary = "Create a delivery",
    description = "Accepts JSON or `multipart/form-data`. File parts `file`, `media_file` (PDF only) \
        and `log_file` (CSV only) are optional. The creator is always the authenticated user; \
        any `created_by` in the payload is ignored. Body limit: 200 MB.",
    request_body(
        content((DeliveryRequest = "application/json"), (DeliveryRequest = "multipart/form-data"))
    ),
    responses(
        (status = 201, description = "Delivery created", body = DeliveryResponse),
        (status = 400, description = "Invalid fields (VALIDATION_ERROR) or storage failure (PERSISTENCE_FAILED)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, form), fields(user_id = auth_user.user_id))]
pub async fn create_delivery(
    auth_user: AuthUser,
    State(state): State<AppState>,
    form: DeliveryForm,
) -> Result<impl IntoResponse, AppError> {
    let (changes, files) = validate_payload(&state.db, form, false).await?;

    let model = async {
        let txn = state.db.begin().await?;

        let mut active = delivery::ActiveModel {
            travel_time: Set(None),
            from_address: Set(String::new()),
            to_address: Set(String::new()),
            comment: Set(String::new()),
            created_by_id: Set(Some(auth_user.user_id)),
            created_at: Set(Utc::now()),
            ..Default::default()
        };
        apply_changes(&mut active, &changes);
        let model = active.insert(&txn).await?;

        store_uploads(&*state.blob_store, &txn, model.id, files).await?;
        txn.commit().await?;
        Ok::<_, AppError>(model)
    }
    .await
    .map_err(|e| e.or_persistence("create delivery"))?;

    tracing::info!(delivery_id = model.id, "Delivery created");
    let response = load_response(&state.db, model).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/{id}",
    tag = "Deliveries",
    operation_id = "getDelivery",
    summary = "Get a delivery by ID",
    params(("id" = i32, Path, description = "Delivery ID")),
    responses(
        (status = 200, description = "Delivery details", body = DeliveryResponse),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Delivery not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user), fields(id))]
pub async fn get_delivery(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<DeliveryResponse>, AppError> {
    let model = find_delivery(&state.db, id).await?;
    Ok(Json(load_response(&state.db, model).await?))
}

#[utoipa::path(
    put,
    path = "/{id}",
    tag = "Deliveries",
    operation_id = "replaceDelivery",
    summary = "Replace a delivery",
    description = "Requires the same fields as create. File parts replace their slot and a JSON \
        `null` clears it; slots not mentioned are kept. `created_by` is never changed, except \
        that a missing creator is filled in with the current user.",
    params(("id" = i32, Path, description = "Delivery ID")),
    request_body(
        content((DeliveryRequest = "application/json"), (DeliveryRequest = "multipart/form-data"))
    ),
    responses(
        (status = 200, description = "Delivery updated", body = DeliveryResponse),
        (status = 400, description = "Invalid fields (VALIDATION_ERROR) or storage failure (PERSISTENCE_FAILED)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Delivery not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, form), fields(id, user_id = auth_user.user_id))]
pub async fn replace_delivery(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    form: DeliveryForm,
) -> Result<Json<DeliveryResponse>, AppError> {
    update_delivery(&state, &auth_user, id, form, false).await
}

#[utoipa::path(
    patch,
    path = "/{id}",
    tag = "Deliveries",
    operation_id = "updateDelivery",
    summary = "Partially update a delivery",
    description = "Like PUT, but only the fields present in the payload are validated and changed.",
    params(("id" = i32, Path, description = "Delivery ID")),
    request_body(
        content((DeliveryRequest = "application/json"), (DeliveryRequest = "multipart/form-data"))
    ),
    responses(
        (status = 200, description = "Delivery updated", body = DeliveryResponse),
        (status = 400, description = "Invalid fields (VALIDATION_ERROR) or storage failure (PERSISTENCE_FAILED)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Delivery not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, form), fields(id, user_id = auth_user.user_id))]
pub async fn patch_delivery(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
    form: DeliveryForm,
) -> Result<Json<DeliveryResponse>, AppError> {
    update_delivery(&state, &auth_user, id, form, true).await
}

#[utoipa::path(
    delete,
    path = "/{id}",
    tag = "Deliveries",
    operation_id = "deleteDelivery",
    summary = "Delete a delivery",
    description = "Removes the delivery and its attachments.",
    params(("id" = i32, Path, description = "Delivery ID")),
    responses(
        (status = 204, description = "Delivery deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Delivery not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user), fields(id))]
pub async fn delete_delivery(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let stale = async {
        let txn = state.db.begin().await?;
        find_delivery_for_update(&txn, id).await?;

        let files = delivery_file::Entity::find()
            .filter(delivery_file::Column::DeliveryId.eq(id))
            .all(&txn)
            .await?;
        delivery_file::Entity::delete_many()
            .filter(delivery_file::Column::DeliveryId.eq(id))
            .exec(&txn)
            .await?;
        delivery::Entity::delete_by_id(id).exec(&txn).await?;

        txn.commit().await?;
        Ok::<_, AppError>(files.into_iter().map(|f| f.content_hash).collect())
    }
    .await
    .map_err(|e| e.or_persistence("delete delivery"))?;

    attachments::collect_garbage(&state.db, &*state.blob_store, stale).await;
    tracing::info!(delivery_id = id, "Delivery deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/{id}/files/{slot}",
    tag = "Deliveries",
    operation_id = "downloadDeliveryFile",
    summary = "Download a delivery attachment",
    description = "Streams the file stored in `slot` (`file`, `media_file` or `log_file`). \
        Supports conditional requests via `If-None-Match`.",
    params(
        ("id" = i32, Path, description = "Delivery ID"),
        ("slot" = String, Path, description = "Attachment slot"),
    ),
    responses(
        (status = 200, description = "File content"),
        (status = 304, description = "Not modified"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 404, description = "Delivery, slot or file not found (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, _auth_user, headers), fields(id, slot))]
pub async fn download_file(
    _auth_user: AuthUser,
    State(state): State<AppState>,
    Path((id, slot)): Path<(i32, String)>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let slot = FileSlot::parse(&slot)
        .ok_or_else(|| AppError::NotFound(format!("Unknown file slot '{slot}'")))?;
    find_delivery(&state.db, id).await?;

    let file = delivery_file::Entity::find()
        .filter(delivery_file::Column::DeliveryId.eq(id))
        .filter(delivery_file::Column::Slot.eq(slot.as_str()))
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("No file stored in this slot".into()))?;

    build_file_response(&file, &headers, &*state.blob_store).await
}

async fn update_delivery(
    state: &AppState,
    auth_user: &AuthUser,
    id: i32,
    form: DeliveryForm,
    partial: bool,
) -> Result<Json<DeliveryResponse>, AppError> {
    find_delivery(&state.db, id).await?;
    let (changes, files) = validate_payload(&state.db, form, partial).await?;

    let stale = async {
        let txn = state.db.begin().await?;
        let existing = find_delivery_for_update(&txn, id).await?;

        let backfill = existing.created_by_id.is_none();
        let mut active: delivery::ActiveModel = existing.into();
        if backfill {
            tracing::warn!(
                delivery_id = id,
                user_id = auth_user.user_id,
                "Delivery has no creator; assigning the current user"
            );
            active.created_by_id = Set(Some(auth_user.user_id));
        }
        apply_changes(&mut active, &changes);
        if active.is_changed() {
            active.update(&txn).await?;
        }

        let mut stale = clear_slots(&txn, id, &changes.cleared).await?;
        stale.extend(store_uploads(&*state.blob_store, &txn, id, files).await?);

        txn.commit().await?;
        Ok::<_, AppError>(stale)
    }
    .await
    .map_err(|e| e.or_persistence("update delivery"))?;

    attachments::collect_garbage(&state.db, &*state.blob_store, stale).await;

    let model = find_delivery(&state.db, id).await?;
    Ok(Json(load_response(&state.db, model).await?))
}

/// Validate fields, uploads and foreign keys, reporting every problem at once.
async fn validate_payload(
    db: &DatabaseConnection,
    form: DeliveryForm,
    partial: bool,
) -> Result<(DeliveryChanges, Vec<UploadedFile>), AppError> {
    let mut errors = validate_uploads(&form.files);
    let changes = match parse_delivery_fields(&form.fields, partial) {
        Ok(changes) => changes,
        Err(field_errors) => {
            errors.merge(field_errors);
            return Err(errors.into());
        }
    };
    errors.merge(check_references(db, &changes).await?);
    Ok(errors.into_result((changes, form.files))?)
}

async fn check_references<C: ConnectionTrait>(
    db: &C,
    changes: &DeliveryChanges,
) -> Result<FieldErrors, DbErr> {
    let mut errors = FieldErrors::new();
    for (kind, id) in changes.references() {
        if !reference::exists(db, kind, id).await? {
            errors.add(
                kind.delivery_field(),
                format!("Invalid pk \"{id}\" - object does not exist."),
            );
        }
    }
    Ok(errors)
}

fn apply_changes(active: &mut delivery::ActiveModel, changes: &DeliveryChanges) {
    if let Some(v) = changes.transport_model {
        active.transport_model_id = Set(v);
    }
    if let Some(v) = &changes.vehicle_number {
        active.vehicle_number = Set(v.clone());
    }
    if let Some(v) = changes.packaging {
        active.packaging_id = Set(v);
    }
    if let Some(v) = changes.service {
        active.service_id = Set(v);
    }
    if let Some(v) = changes.tech_state {
        active.tech_state_id = Set(v);
    }
    if let Some(v) = changes.status {
        active.status_id = Set(v);
    }
    if let Some(v) = changes.distance_km {
        active.distance_km = Set(v);
    }
    if let Some(v) = changes.send_time {
        active.send_time = Set(v);
    }
    if let Some(v) = changes.delivery_time {
        active.delivery_time = Set(v);
    }
    if let Some(v) = changes.travel_time {
        active.travel_time = Set(v);
    }
    if let Some(v) = &changes.from_address {
        active.from_address = Set(v.clone());
    }
    if let Some(v) = &changes.to_address {
        active.to_address = Set(v.clone());
    }
    if let Some(v) = &changes.comment {
        active.comment = Set(v.clone());
    }
}

/// Write uploads to the blob store and point their slots at them.
/// Returns the hashes of the attachments they replaced.
async fn store_uploads(
    blob_store: &dyn BlobStore,
    txn: &DatabaseTransaction,
    delivery_id: i32,
    files: Vec<UploadedFile>,
) -> Result<Vec<String>, AppError> {
    let mut replaced = Vec::new();

    for upload in files {
        attachments::pin_blob(txn, &ContentHash::compute(&upload.bytes)).await?;
        let hash = blob_store.put(&upload.bytes).await?;

        let previous = delivery_file::Entity::find()
            .filter(delivery_file::Column::DeliveryId.eq(delivery_id))
            .filter(delivery_file::Column::Slot.eq(upload.slot.as_str()))
            .one(txn)
            .await?;
        if let Some(previous) = previous {
            delivery_file::Entity::delete_by_id(previous.id)
                .exec(txn)
                .await?;
            replaced.push(previous.content_hash);
        }

        delivery_file::ActiveModel {
            id: Set(Uuid::now_v7()),
            delivery_id: Set(delivery_id),
            slot: Set(upload.slot.as_str().to_string()),
            content_hash: Set(hash.to_hex()),
            filename: Set(upload.filename.trim().to_string()),
            content_type: Set(upload.content_type),
            size: Set(i64::try_from(upload.bytes.len()).unwrap_or(i64::MAX)),
            created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await?;
    }

    Ok(replaced)
}

/// Empty the given slots. Returns the hashes of the removed attachments.
async fn clear_slots(
    txn: &DatabaseTransaction,
    delivery_id: i32,
    slots: &[FileSlot],
) -> Result<Vec<String>, DbErr> {
    if slots.is_empty() {
        return Ok(Vec::new());
    }
    let names: Vec<&str> = slots.iter().map(|s| s.as_str()).collect();
    let condition = Condition::all()
        .add(delivery_file::Column::DeliveryId.eq(delivery_id))
        .add(delivery_file::Column::Slot.is_in(names));

    let removed = delivery_file::Entity::find()
        .filter(condition.clone())
        .all(txn)
        .await?;
    delivery_file::Entity::delete_many()
        .filter(condition)
        .exec(txn)
        .await?;

    Ok(removed.into_iter().map(|f| f.content_hash).collect())
}

async fn find_delivery<C: ConnectionTrait>(db: &C, id: i32) -> Result<delivery::Model, AppError> {
    delivery::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery not found".into()))
}

async fn find_delivery_for_update(
    txn: &DatabaseTransaction,
    id: i32,
) -> Result<delivery::Model, AppError> {
    use sea_orm::sea_query::LockType;
    delivery::Entity::find_by_id(id)
        .lock(LockType::Update)
        .one(txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Delivery not found".into()))
}

async fn load_response<C: ConnectionTrait>(
    db: &C,
    model: delivery::Model,
) -> Result<DeliveryResponse, DbErr> {
    let mut responses = load_responses(db, vec![model]).await?;
    responses
        .pop()
        .ok_or_else(|| DbErr::Custom("delivery vanished while loading".into()))
}

/// Attach files and creator names with one query each.
async fn load_responses<C: ConnectionTrait>(
    db: &C,
    deliveries: Vec<delivery::Model>,
) -> Result<Vec<DeliveryResponse>, DbErr> {
    if deliveries.is_empty() {
        return Ok(Vec::new());
    }

    let ids: Vec<i32> = deliveries.iter().map(|d| d.id).collect();
    let mut creator_ids: Vec<i32> = deliveries.iter().filter_map(|d| d.created_by_id).collect();
    creator_ids.sort_unstable();
    creator_ids.dedup();

    let mut files_by_delivery: HashMap<i32, Vec<delivery_file::Model>> = HashMap::new();
    for file in delivery_file::Entity::find()
        .filter(delivery_file::Column::DeliveryId.is_in(ids))
        .all(db)
        .await?
    {
        files_by_delivery.entry(file.delivery_id).or_default().push(file);
    }

    let names: HashMap<i32, String> = if creator_ids.is_empty() {
        HashMap::new()
    } else {
        user::Entity::find()
            .filter(user::Column::Id.is_in(creator_ids))
            .all(db)
            .await?
            .into_iter()
            .map(|u| (u.id, u.display_name()))
            .collect()
    };

    Ok(deliveries
        .into_iter()
        .map(|d| {
            let files = files_by_delivery.remove(&d.id).unwrap_or_default();
            let name = d.created_by_id.and_then(|uid| names.get(&uid).cloned());
            DeliveryResponse::new(d, &files, name)
        })
        .collect())
}

async fn build_file_response(
    file: &delivery_file::Model,
    headers: &HeaderMap,
    blob_store: &dyn BlobStore,
) -> Result<Response, AppError> {
    let etag_value = format!("\"{}\"", file.content_hash);
    if let Some(if_none_match) = headers.get(header::IF_NONE_MATCH)
        && let Ok(val) = if_none_match.to_str()
        && (val == etag_value || val == "*")
    {
        return Ok(StatusCode::NOT_MODIFIED.into_response());
    }

    let hash = ContentHash::from_hex(&file.content_hash)?;
    let reader = blob_store.get_stream(&hash).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, &file.content_type)
        .header(header::CONTENT_LENGTH, file.size.to_string())
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition_value(&file.filename),
        )
        .header(header::ETAG, &etag_value)
        .header(header::CACHE_CONTROL, "private, max-age=3600")
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))
}
