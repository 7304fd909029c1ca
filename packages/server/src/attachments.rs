//! Blob lifetime for delivery attachments.
//!
//! Blobs are shared by content, so one may only be removed once no
//! `delivery_file` row points at it. Writers hold a shared advisory lock on
//! the blob's hash from the upload until their transaction ends; cleanup
//! takes the exclusive lock before counting references and deleting. A blob
//! is therefore never deleted while an uncommitted row is about to reference
//! it.

use common::storage::{BlobStore, ContentHash};
use sea_orm::*;

use crate::entity::delivery_file;
use crate::error::AppError;

async fn advisory_lock<C: ConnectionTrait>(
    db: &C,
    sql: &str,
    hash: &ContentHash,
) -> Result<(), DbErr> {
    db.execute_raw(Statement::from_sql_and_values(
        DbBackend::Postgres,
        sql,
        [hash.lock_key().into()],
    ))
    .await?;
    Ok(())
}

/// Pin `hash` for the rest of `txn`. Call before writing the blob and
/// inserting the row that references it.
pub async fn pin_blob(txn: &DatabaseTransaction, hash: &ContentHash) -> Result<(), DbErr> {
    advisory_lock(txn, "SELECT pg_advisory_xact_lock_shared($1)", hash).await
}

/// Delete each blob no attachment row points at any more. Failures are
/// logged and leave the blob in place.
pub async fn collect_garbage(
    db: &DatabaseConnection,
    blob_store: &dyn BlobStore,
    mut hashes: Vec<String>,
) {
    hashes.sort_unstable();
    hashes.dedup();

    for hex in hashes {
        if let Err(e) = collect_blob(db, blob_store, &hex).await {
            tracing::warn!("Failed to collect blob {hex}: {e:?}");
        }
    }
}

async fn collect_blob(
    db: &DatabaseConnection,
    blob_store: &dyn BlobStore,
    hex: &str,
) -> Result<(), AppError> {
    let hash = ContentHash::from_hex(hex)?;

    let txn = db.begin().await?;
    advisory_lock(&txn, "SELECT pg_advisory_xact_lock($1)", &hash).await?;

    let remaining = delivery_file::Entity::find()
        .filter(delivery_file::Column::ContentHash.eq(hex))
        .count(&txn)
        .await?;
    if remaining == 0 {
        blob_store.delete(&hash).await?;
        tracing::debug!(%hash, "Deleted unreferenced blob");
    }

    txn.commit().await?;
    Ok(())
}
