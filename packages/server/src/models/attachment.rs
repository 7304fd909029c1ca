use serde::Serialize;

use crate::entity::delivery_file;

/// Metadata of the file stored in one delivery slot.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct AttachmentResponse {
    /// Original upload filename.
    #[schema(example = "waybill.pdf")]
    pub filename: String,
    #[schema(example = "application/pdf")]
    pub content_type: String,
    /// Size in bytes.
    #[schema(example = 142857)]
    pub size: i64,
    /// Download path of the slot.
    #[schema(example = "/api/v1/deliveries/12/files/media_file")]
    pub url: String,
}

impl From<&delivery_file::Model> for AttachmentResponse {
    fn from(model: &delivery_file::Model) -> Self {
        Self {
            filename: model.filename.clone(),
            content_type: model.content_type.clone(),
            size: model.size,
            url: format!(
                "/api/v1/deliveries/{}/files/{}",
                model.delivery_id, model.slot
            ),
        }
    }
}
