use sea_orm::sea_query::{Index, OnConflict, PostgresQueryBuilder};
use sea_orm::*;
use tracing::info;

use crate::config::BootstrapAdmin;
use crate::entity::{delivery, delivery_file, role, role_permission, user};
use crate::utils::hash;

/// Permission required by the reference administration and bulk transfer endpoints.
pub const REFERENCE_MANAGE: &str = "reference:manage";

pub const ADMIN_ROLE: &str = "admin";

/// Default roles seeded on startup.
const DEFAULT_ROLES: &[&str] = &[ADMIN_ROLE, role::DEFAULT_ROLE];

/// Default role-permission mappings seeded on startup. Operators work with
/// deliveries only, which needs no extra permission.
const DEFAULT_MAPPINGS: &[(&str, &str)] = &[(ADMIN_ROLE, REFERENCE_MANAGE)];

/// Seed the `role` and `role_permission` tables with defaults.
pub async fn seed_role_permissions(db: &DatabaseConnection) -> Result<(), DbErr> {
    let mut roles_inserted = 0u32;
    for &name in DEFAULT_ROLES {
        let model = role::ActiveModel {
            name: Set(name.to_string()),
        };

        let result = role::Entity::insert(model)
            .on_conflict(OnConflict::column(role::Column::Name).do_nothing().to_owned())
            .exec_without_returning(db)
            .await;

        match result {
            Ok(n) if n > 0 => roles_inserted += 1,
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e),
        }
    }

    if roles_inserted > 0 {
        info!("Seeded {} new roles", roles_inserted);
    }

    let mut perms_inserted = 0u32;
    for &(role, permission) in DEFAULT_MAPPINGS {
        let model = role_permission::ActiveModel {
            role: Set(role.to_string()),
            permission: Set(permission.to_string()),
        };

        let result = role_permission::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    role_permission::Column::Role,
                    role_permission::Column::Permission,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(db)
            .await;

        match result {
            Ok(n) if n > 0 => perms_inserted += 1,
            Ok(_) | Err(DbErr::RecordNotInserted) => {}
            Err(e) => return Err(e),
        }
    }

    if perms_inserted > 0 {
        info!("Seeded {} new role-permission mappings", perms_inserted);
    }

    Ok(())
}

/// Ensure indexes that schema sync does not derive from the entities.
pub async fn ensure_indexes(db: &DatabaseConnection) -> Result<(), DbErr> {
    // One attachment per slot.
    let stmt = Index::create()
        .if_not_exists()
        .unique()
        .name("idx_delivery_file_delivery_slot")
        .table(delivery_file::Entity)
        .col(delivery_file::Column::DeliveryId)
        .col(delivery_file::Column::Slot)
        .to_string(PostgresQueryBuilder);
    db.execute_unprepared(&stmt).await?;
    info!("Ensured index idx_delivery_file_delivery_slot exists");

    // Delivery list order.
    let stmt = Index::create()
        .if_not_exists()
        .name("idx_delivery_created_at")
        .table(delivery::Entity)
        .col(delivery::Column::CreatedAt)
        .to_string(PostgresQueryBuilder);

    match db.execute_unprepared(&stmt).await {
        Ok(_) => info!("Ensured index idx_delivery_created_at exists"),
        Err(e) => tracing::warn!("Failed to create index idx_delivery_created_at: {}", e),
    }

    Ok(())
}

/// Create the configured administrator unless a user with that name exists.
pub async fn ensure_bootstrap_admin(
    db: &DatabaseConnection,
    admin: &BootstrapAdmin,
) -> Result<(), DbErr> {
    let username = admin.username.trim();
    if username.is_empty() {
        tracing::warn!("Bootstrap admin username is blank; skipping");
        return Ok(());
    }

    let existing = user::Entity::find()
        .filter(user::Column::Username.eq(username))
        .one(db)
        .await?;
    if existing.is_some() {
        return Ok(());
    }

    let password = hash::hash_password(&admin.password)
        .map_err(|e| DbErr::Custom(format!("Password hash error: {e}")))?;

    user::ActiveModel {
        username: Set(username.to_string()),
        password: Set(password),
        first_name: Set(String::new()),
        last_name: Set(String::new()),
        role: Set(ADMIN_ROLE.to_string()),
        created_at: Set(chrono::Utc::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    info!(username, "Created bootstrap administrator");
    Ok(())
}
