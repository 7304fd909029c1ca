//! The five lookup tables a delivery points into. They share one shape
//! (`id`, `name`), so every operation dispatches on [`ReferenceKind`].

use common::transfer::Table;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Serialize;

use crate::entity::delivery;
use crate::models::reference::{ReferenceItem, TableImportSummary};

/// Header of every exported reference CSV.
pub const REFERENCE_FIELDS: [&str; 2] = ["id", "name"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ReferenceKind {
    TransportModel,
    PackagingType,
    ServiceType,
    TechState,
    DeliveryStatus,
}

impl ReferenceKind {
    /// Export order.
    pub const ALL: [ReferenceKind; 5] = [
        ReferenceKind::TransportModel,
        ReferenceKind::PackagingType,
        ReferenceKind::ServiceType,
        ReferenceKind::TechState,
        ReferenceKind::DeliveryStatus,
    ];

    /// URL segment of the read and admin endpoints.
    pub fn slug(self) -> &'static str {
        match self {
            ReferenceKind::TransportModel => "transportmodels",
            ReferenceKind::PackagingType => "packagings",
            ReferenceKind::ServiceType => "services",
            ReferenceKind::TechState => "techstates",
            ReferenceKind::DeliveryStatus => "statuses",
        }
    }

    pub fn alias(self) -> Option<&'static str> {
        match self {
            ReferenceKind::TransportModel => Some("transport-models"),
            ReferenceKind::PackagingType => Some("packaging-types"),
            ReferenceKind::ServiceType => Some("service-types"),
            ReferenceKind::TechState => Some("tech-states"),
            ReferenceKind::DeliveryStatus => None,
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.slug() == slug || kind.alias() == Some(slug))
    }

    /// Table name used for archive entries (`<name>.csv`).
    pub fn export_name(self) -> &'static str {
        match self {
            ReferenceKind::TransportModel => "TransportModel",
            ReferenceKind::PackagingType => "PackagingType",
            ReferenceKind::ServiceType => "ServiceType",
            ReferenceKind::TechState => "TechState",
            ReferenceKind::DeliveryStatus => "DeliveryStatus",
        }
    }

    pub fn from_export_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.export_name().eq_ignore_ascii_case(name))
    }

    pub fn max_name_len(self) -> usize {
        match self {
            ReferenceKind::TransportModel => 128,
            ReferenceKind::PackagingType => 64,
            ReferenceKind::ServiceType => 64,
            ReferenceKind::TechState => 100,
            ReferenceKind::DeliveryStatus => 32,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ReferenceKind::TransportModel => "Transport model",
            ReferenceKind::PackagingType => "Packaging type",
            ReferenceKind::ServiceType => "Service type",
            ReferenceKind::TechState => "Tech state",
            ReferenceKind::DeliveryStatus => "Delivery status",
        }
    }

    /// Payload field of a delivery that points into this table.
    pub fn delivery_field(self) -> &'static str {
        match self {
            ReferenceKind::TransportModel => "transport_model",
            ReferenceKind::PackagingType => "packaging",
            ReferenceKind::ServiceType => "service",
            ReferenceKind::TechState => "tech_state",
            ReferenceKind::DeliveryStatus => "status",
        }
    }

    fn delivery_column(self) -> delivery::Column {
        match self {
            ReferenceKind::TransportModel => delivery::Column::TransportModelId,
            ReferenceKind::PackagingType => delivery::Column::PackagingId,
            ReferenceKind::ServiceType => delivery::Column::ServiceId,
            ReferenceKind::TechState => delivery::Column::TechStateId,
            ReferenceKind::DeliveryStatus => delivery::Column::StatusId,
        }
    }
}

/// Run `$body` with `$m` bound to the entity module of `$kind`.
macro_rules! with_table {
    ($kind:expr, $m:ident => $body:expr) => {
        match $kind {
            ReferenceKind::TransportModel => {
                use crate::entity::transport_model as $m;
                $body
            }
            ReferenceKind::PackagingType => {
                use crate::entity::packaging_type as $m;
                $body
            }
            ReferenceKind::ServiceType => {
                use crate::entity::service_type as $m;
                $body
            }
            ReferenceKind::TechState => {
                use crate::entity::tech_state as $m;
                $body
            }
            ReferenceKind::DeliveryStatus => {
                use crate::entity::delivery_status as $m;
                $body
            }
        }
    };
}

/// All rows, ordered by id.
pub async fn list<C: ConnectionTrait>(db: &C, kind: ReferenceKind) -> Result<Vec<ReferenceItem>, DbErr> {
    with_table!(kind, m => {
        let rows = m::Entity::find()
            .order_by_asc(m::Column::Id)
            .all(db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ReferenceItem { id: row.id, name: row.name })
            .collect())
    })
}

pub async fn find<C: ConnectionTrait>(
    db: &C,
    kind: ReferenceKind,
    id: i32,
) -> Result<Option<ReferenceItem>, DbErr> {
    with_table!(kind, m => {
        let row = m::Entity::find_by_id(id).one(db).await?;
        Ok(row.map(|row| ReferenceItem { id: row.id, name: row.name }))
    })
}

/// First row (lowest id) carrying exactly `name`.
pub async fn find_by_name<C: ConnectionTrait>(
    db: &C,
    kind: ReferenceKind,
    name: &str,
) -> Result<Option<ReferenceItem>, DbErr> {
    with_table!(kind, m => {
        let row = m::Entity::find()
            .filter(m::Column::Name.eq(name))
            .order_by_asc(m::Column::Id)
            .one(db)
            .await?;
        Ok(row.map(|row| ReferenceItem { id: row.id, name: row.name }))
    })
}

pub async fn exists<C: ConnectionTrait>(db: &C, kind: ReferenceKind, id: i32) -> Result<bool, DbErr> {
    Ok(find(db, kind, id).await?.is_some())
}

pub async fn insert<C: ConnectionTrait>(
    db: &C,
    kind: ReferenceKind,
    name: String,
) -> Result<ReferenceItem, DbErr> {
    with_table!(kind, m => {
        let row = m::ActiveModel {
            name: Set(name),
            ..Default::default()
        }
        .insert(db)
        .await?;
        Ok(ReferenceItem { id: row.id, name: row.name })
    })
}

/// `None` when no row has this id.
pub async fn rename<C: ConnectionTrait>(
    db: &C,
    kind: ReferenceKind,
    id: i32,
    name: String,
) -> Result<Option<ReferenceItem>, DbErr> {
    with_table!(kind, m => {
        let Some(row) = m::Entity::find_by_id(id).one(db).await? else {
            return Ok(None);
        };
        let mut active: m::ActiveModel = row.into();
        active.name = Set(name);
        let row = active.update(db).await?;
        Ok(Some(ReferenceItem { id: row.id, name: row.name }))
    })
}

/// Returns `false` when no row was deleted.
pub async fn delete<C: ConnectionTrait>(db: &C, kind: ReferenceKind, id: i32) -> Result<bool, DbErr> {
    with_table!(kind, m => {
        let result = m::Entity::delete_by_id(id).exec(db).await?;
        Ok(result.rows_affected > 0)
    })
}

/// Number of deliveries pointing at the row.
pub async fn usage_count<C: ConnectionTrait>(
    db: &C,
    kind: ReferenceKind,
    id: i32,
) -> Result<u64, DbErr> {
    delivery::Entity::find()
        .filter(kind.delivery_column().eq(id))
        .count(db)
        .await
}

/// Every reference table as an `id,name` table, in export order.
pub async fn export_tables<C: ConnectionTrait>(db: &C) -> Result<Vec<Table>, DbErr> {
    let mut tables = Vec::with_capacity(ReferenceKind::ALL.len());
    for kind in ReferenceKind::ALL {
        let mut table = Table::new(kind.export_name(), REFERENCE_FIELDS);
        for item in list(db, kind).await? {
            table.push_row([item.id.to_string(), item.name]);
        }
        tables.push(table);
    }
    Ok(tables)
}

/// A validated row of an imported reference CSV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRow {
    pub id: Option<i32>,
    pub name: String,
}

/// Check an uploaded table against the layout of `kind`. Errors name the
/// entry and the 1-based data row.
pub fn parse_import_rows(kind: ReferenceKind, table: &Table) -> Result<Vec<ImportRow>, String> {
    let entry = table.entry_name();
    let name_idx = table
        .column_index("name")
        .ok_or_else(|| format!("{entry}: missing required column 'name'"))?;
    let id_idx = table.column_index("id");

    let mut rows = Vec::with_capacity(table.rows.len());
    for (i, record) in table.rows.iter().enumerate() {
        let line = i + 1;
        let cell = |idx: usize| record.get(idx).map(String::as_str).unwrap_or("").trim();

        let id = match id_idx.map(cell) {
            None | Some("") => None,
            Some(raw) => Some(
                raw.parse::<i32>()
                    .ok()
                    .filter(|id| *id > 0)
                    .ok_or_else(|| format!("{entry} row {line}: invalid id '{raw}'"))?,
            ),
        };

        let name = cell(name_idx);
        if name.is_empty() {
            return Err(format!("{entry} row {line}: name may not be blank"));
        }
        if name.chars().count() > kind.max_name_len() {
            return Err(format!(
                "{entry} row {line}: name exceeds {} characters",
                kind.max_name_len()
            ));
        }

        rows.push(ImportRow {
            id,
            name: name.to_string(),
        });
    }
    Ok(rows)
}

/// Upsert rows into one table. An id match renames, a name match is left
/// alone, anything else is inserted with a database-assigned id.
pub async fn import_rows<C: ConnectionTrait>(
    db: &C,
    kind: ReferenceKind,
    rows: Vec<ImportRow>,
) -> Result<TableImportSummary, DbErr> {
    let mut summary = TableImportSummary::new(kind.export_name());

    for row in rows {
        if let Some(id) = row.id
            && let Some(existing) = find(db, kind, id).await?
        {
            if existing.name == row.name {
                summary.unchanged += 1;
            } else {
                rename(db, kind, id, row.name).await?;
                summary.updated += 1;
            }
            continue;
        }

        if find_by_name(db, kind, &row.name).await?.is_some() {
            summary.unchanged += 1;
        } else {
            insert(db, kind, row.name).await?;
            summary.created += 1;
        }
    }

    Ok(summary)
}
