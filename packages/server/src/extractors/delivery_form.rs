use std::collections::BTreeMap;

use axum::extract::{FromRequest, Multipart, Request};
use axum::http::header;

use crate::error::AppError;
use crate::extractors::json::AppJson;
use crate::models::delivery::{FieldValue, FileSlot, UploadedFile};

/// A delivery payload sent either as a JSON object or as
/// `multipart/form-data` with text fields and file parts.
#[derive(Debug, Default)]
pub struct DeliveryForm {
    pub fields: BTreeMap<String, FieldValue>,
    pub files: Vec<UploadedFile>,
}

impl<S> FromRequest<S> for DeliveryForm
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if is_multipart {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| AppError::Validation(e.body_text()))?;
            read_multipart(multipart).await
        } else {
            let AppJson(value) = AppJson::<serde_json::Value>::from_request(req, state).await?;
            let serde_json::Value::Object(object) = value else {
                return Err(AppError::Validation(
                    "Expected a JSON object as the request body".into(),
                ));
            };
            Ok(DeliveryForm {
                fields: object
                    .into_iter()
                    .map(|(k, v)| (k, FieldValue::from(v)))
                    .collect(),
                files: Vec::new(),
            })
        }
    }
}

async fn read_multipart(mut multipart: Multipart) -> Result<DeliveryForm, AppError> {
    let mut form = DeliveryForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let file_name = field.file_name().map(str::to_string);

        match (FileSlot::parse(&name), file_name) {
            (Some(slot), Some(filename)) => {
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .filter(|ct| ct != "application/octet-stream")
                    .or_else(|| mime_guess::from_path(&filename).first().map(|m| m.to_string()))
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?;

                // Browsers send an empty part for an untouched file input.
                if filename.is_empty() && bytes.is_empty() {
                    continue;
                }

                form.files.retain(|f| f.slot != slot);
                form.files.push(UploadedFile {
                    slot,
                    filename,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::Validation(format!("Failed to read field '{name}': {e}")))?;
                form.fields.insert(name, FieldValue::Text(text));
            }
        }
    }

    Ok(form)
}
