use axum::{
    Json,
    extract::{Path, State},
};
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::models::reference::ReferenceItem;
use crate::reference::{self, ReferenceKind};
use crate::state::AppState;

pub(crate) fn resolve_kind(slug: &str) -> Result<ReferenceKind, AppError> {
    ReferenceKind::from_slug(slug)
        .ok_or_else(|| AppError::NotFound(format!("Unknown reference table '{slug}'")))
}

#[utoipa::path(
    get,
    path = "/{kind}",
    tag = "Reference Tables",
    operation_id = "listReferenceRows",
    summary = "List the rows of a reference table",
    description = "Returns every row ordered by id. `kind` is one of `transportmodels`, `packagings`, \
        `services`, `techstates`, `statuses` (or the aliases `transport-models`, `packaging-types`, \
        `service-types`, `tech-states`). No authentication required.",
    params(("kind" = String, Path, description = "Reference table slug")),
    responses(
        (status = 200, description = "Rows of the table", body = Vec<ReferenceItem>),
        (status = 404, description = "Unknown table (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn list_rows(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<Vec<ReferenceItem>>, AppError> {
    let kind = resolve_kind(&kind)?;
    Ok(Json(reference::list(&state.db, kind).await?))
}

#[utoipa::path(
    get,
    path = "/{kind}/{id}",
    tag = "Reference Tables",
    operation_id = "getReferenceRow",
    summary = "Get one row of a reference table",
    params(
        ("kind" = String, Path, description = "Reference table slug"),
        ("id" = i32, Path, description = "Row ID"),
    ),
    responses(
        (status = 200, description = "The row", body = ReferenceItem),
        (status = 404, description = "Unknown table or row (NOT_FOUND)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_row(
    State(state): State<AppState>,
    Path((kind, id)): Path<(String, i32)>,
) -> Result<Json<ReferenceItem>, AppError> {
    let kind = resolve_kind(&kind)?;
    reference::find(&state.db, kind, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("{} not found", kind.label())))
}
