use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::Json;
use common::transfer::{self, ArchiveLimits, Table};
use sea_orm::{DbErr, SqlErr, TransactionTrait};
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::handlers::reference::resolve_kind;
use crate::models::reference::{ImportSummary, ReferenceItem, ReferenceNameRequest};
use crate::models::shared::{FieldErrors, validate_name};
use crate::reference::{self, ImportRow, ReferenceKind, parse_import_rows};
use crate::seed::REFERENCE_MANAGE;
use crate::state::AppState;

pub const EXPORT_FILENAME: &str = "all_reference_export.zip";

pub fn import_body_limit() -> DefaultBodyLimit {
    DefaultBodyLimit::max(64 * 1024 * 1024) // 64 MB
}

#[utoipa::path(
    post,
    path = "/mass-export",
    tag = "Bulk Transfer",
    operation_id = "exportReferenceData",
    summary = "Export all reference tables as a ZIP of CSV files",
    description = "Returns `all_reference_export.zip` with the entries `TransportModel.csv`, \
        `PackagingType.csv`, `ServiceType.csv`, `TechState.csv` and `DeliveryStatus.csv`, in that \
        order. Each has the header `id,name` and one row per record ordered by id. \
        Requires `reference:manage` permission.",
    responses(
        (status = 200, description = "ZIP archive", content_type = "application/zip"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user_id = auth_user.user_id))]
pub async fn mass_export(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require_permission(REFERENCE_MANAGE)?;

    let tables = reference::export_tables(&state.db).await?;
    let archive = transfer::write_archive(&tables)
        .map_err(|e| AppError::Internal(format!("Failed to build export archive: {e}")))?;

    let rows: usize = tables.iter().map(|t| t.rows.len()).sum();
    tracing::info!(rows, bytes = archive.len(), "Exported reference data");

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{EXPORT_FILENAME}\""),
            ),
        ],
        archive,
    ))
}

#[utoipa::path(
    post,
    path = "/mass-import",
    tag = "Bulk Transfer",
    operation_id = "importReferenceData",
    summary = "Import reference tables from a ZIP archive or a single CSV",
    description = "Multipart upload with a `file` part: either an archive in the export layout or \
        one CSV named after its table (e.g. `TechState.csv`). Each CSV needs a `name` column; `id` \
        is optional. A row whose id exists renames that row; otherwise a row with the same name is \
        left alone; otherwise a new row is inserted. Entries not named after a table are skipped. \
        The whole upload is applied in one transaction. Requires `reference:manage` permission. \
        Body limit: 64 MB.",
    request_body(content_type = "multipart/form-data", description = "Archive or CSV in the `file` part"),
    responses(
        (status = 200, description = "Import applied", body = ImportSummary),
        (status = 400, description = "Malformed upload (VALIDATION_ERROR) or storage failure (PERSISTENCE_FAILED)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart), fields(user_id = auth_user.user_id))]
pub async fn mass_import(
    auth_user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ImportSummary>, AppError> {
    auth_user.require_permission(REFERENCE_MANAGE)?;

    let mut upload: Option<(Option<String>, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?;
        upload = Some((filename, bytes.to_vec()));
    }
    let (filename, data) =
        upload.ok_or_else(|| AppError::Validation("Missing 'file' field".into()))?;

    let tables = if transfer::is_zip(&data) {
        transfer::read_archive(&data, ArchiveLimits::default())?
    } else {
        let filename = filename
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| {
                AppError::Validation("A CSV upload must be named after its table".into())
            })?;
        vec![transfer::read_csv(&filename, &data)?]
    };

    let (plan, skipped) = plan_import(&tables)?;
    for entry in &skipped {
        tracing::warn!(entry = %entry, "Skipping import entry that names no reference table");
    }

    let summaries = async {
        let txn = state.db.begin().await?;
        let mut summaries = Vec::with_capacity(plan.len());
        for (kind, rows) in plan {
            summaries.push(reference::import_rows(&txn, kind, rows).await?);
        }
        txn.commit().await?;
        Ok::<_, AppError>(summaries)
    }
    .await
    .map_err(|e| e.or_persistence("import reference data"))?;

    tracing::info!(tables = summaries.len(), skipped = skipped.len(), "Imported reference data");
    Ok(Json(ImportSummary {
        tables: summaries,
        skipped,
    }))
}

/// Match tables to reference kinds and validate every row before anything
/// is written.
fn plan_import(
    tables: &[Table],
) -> Result<(Vec<(ReferenceKind, Vec<ImportRow>)>, Vec<String>), AppError> {
    let mut plan = Vec::new();
    let mut skipped = Vec::new();
    let mut problems = Vec::new();

    for table in tables {
        let Some(kind) = ReferenceKind::from_export_name(&table.name) else {
            skipped.push(table.entry_name());
            continue;
        };
        match parse_import_rows(kind, table) {
            Ok(rows) => plan.push((kind, rows)),
            Err(msg) => problems.push(msg),
        }
    }

    if !problems.is_empty() {
        return Err(AppError::Validation(problems.join("; ")));
    }
    Ok((plan, skipped))
}

fn name_errors(message: String) -> AppError {
    let mut errors = FieldErrors::new();
    errors.add("name", message);
    errors.into()
}

#[utoipa::path(
    post,
    path = "/references/{kind}",
    tag = "Reference Tables",
    operation_id = "createReferenceRow",
    summary = "Add a row to a reference table",
    description = "Requires `reference:manage` permission.",
    params(("kind" = String, Path, description = "Reference table slug")),
    request_body = ReferenceNameRequest,
    responses(
        (status = 201, description = "Row created", body = ReferenceItem),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Unknown table (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload))]
pub async fn create_row(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(kind): Path<String>,
    AppJson(payload): AppJson<ReferenceNameRequest>,
) -> Result<impl IntoResponse, AppError> {
    auth_user.require_permission(REFERENCE_MANAGE)?;
    let kind = resolve_kind(&kind)?;
    let name = validate_name(&payload.name, kind.max_name_len()).map_err(name_errors)?;

    let item = reference::insert(&state.db, kind, name)
        .await
        .map_err(|e| AppError::from(e).or_persistence("create reference row"))?;

    Ok((StatusCode::CREATED, Json(item)))
}

#[utoipa::path(
    put,
    path = "/references/{kind}/{id}",
    tag = "Reference Tables",
    operation_id = "renameReferenceRow",
    summary = "Rename a row of a reference table",
    description = "Requires `reference:manage` permission.",
    params(
        ("kind" = String, Path, description = "Reference table slug"),
        ("id" = i32, Path, description = "Row ID"),
    ),
    request_body = ReferenceNameRequest,
    responses(
        (status = 200, description = "Row renamed", body = ReferenceItem),
        (status = 400, description = "Validation error (VALIDATION_ERROR)", body = ErrorBody),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Unknown table or row (NOT_FOUND)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload))]
pub async fn rename_row(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
    AppJson(payload): AppJson<ReferenceNameRequest>,
) -> Result<Json<ReferenceItem>, AppError> {
    auth_user.require_permission(REFERENCE_MANAGE)?;
    let kind = resolve_kind(&kind)?;
    let name = validate_name(&payload.name, kind.max_name_len()).map_err(name_errors)?;

    reference::rename(&state.db, kind, id, name)
        .await
        .map_err(|e| AppError::from(e).or_persistence("rename reference row"))?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{} not found", kind.label())))
}

#[utoipa::path(
    delete,
    path = "/references/{kind}/{id}",
    tag = "Reference Tables",
    operation_id = "deleteReferenceRow",
    summary = "Delete a row of a reference table",
    description = "Fails with 409 CONFLICT while any delivery references the row. \
        Requires `reference:manage` permission.",
    params(
        ("kind" = String, Path, description = "Reference table slug"),
        ("id" = i32, Path, description = "Row ID"),
    ),
    responses(
        (status = 204, description = "Row deleted"),
        (status = 401, description = "Unauthorized (TOKEN_MISSING, TOKEN_INVALID)", body = ErrorBody),
        (status = 403, description = "Forbidden (PERMISSION_DENIED)", body = ErrorBody),
        (status = 404, description = "Unknown table or row (NOT_FOUND)", body = ErrorBody),
        (status = 409, description = "Row is in use (CONFLICT)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn delete_row(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
) -> Result<StatusCode, AppError> {
    auth_user.require_permission(REFERENCE_MANAGE)?;
    let kind = resolve_kind(&kind)?;

    let txn = state.db.begin().await?;

    let row = reference::find(&txn, kind, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{} not found", kind.label())))?;

    let in_use = reference::usage_count(&txn, kind, id).await?;
    if in_use > 0 {
        return Err(AppError::Conflict(format!(
            "Cannot delete {} '{}': referenced by {in_use} deliveries",
            kind.label().to_lowercase(),
            row.name
        )));
    }

    reference::delete(&txn, kind, id)
        .await
        .map_err(|e| restrict_violation(e, kind))?;
    txn.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// A delivery inserted after the usage check still trips the foreign key.
fn restrict_violation(err: DbErr, kind: ReferenceKind) -> AppError {
    match err.sql_err() {
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => AppError::Conflict(format!(
            "Cannot delete {}: referenced by deliveries",
            kind.label().to_lowercase()
        )),
        _ => AppError::from(err),
    }
}
