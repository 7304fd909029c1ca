use serde::{Deserialize, Serialize};

/// One row of a reference table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct ReferenceItem {
    #[schema(example = 3)]
    pub id: i32,
    #[schema(example = "In transit")]
    pub name: String,
}

/// Request body for creating or renaming a reference row.
#[derive(Deserialize, utoipa::ToSchema)]
pub struct ReferenceNameRequest {
    #[schema(example = "Refrigerated van")]
    pub name: String,
}

/// Outcome of importing one table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct TableImportSummary {
    /// Archive entry stem, e.g. `TransportModel`.
    #[schema(example = "TransportModel")]
    pub entity: String,
    pub created: u32,
    pub updated: u32,
    pub unchanged: u32,
}

impl TableImportSummary {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            ..Default::default()
        }
    }
}

/// Response of a bulk import.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ImportSummary {
    pub tables: Vec<TableImportSummary>,
    /// Entries that did not name a reference table.
    #[schema(example = json!(["notes.csv"]))]
    pub skipped: Vec<String>,
}
