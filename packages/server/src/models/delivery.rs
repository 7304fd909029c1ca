use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::entity::{delivery, delivery_file};
use crate::models::attachment::AttachmentResponse;
use crate::models::shared::FieldErrors;
use crate::reference::ReferenceKind;

pub const VEHICLE_NUMBER_MAX_LEN: usize = 64;
pub const ADDRESS_MAX_LEN: usize = 255;

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const NOT_BLANK: &str = "This field may not be blank.";
const NOT_A_FILE: &str = "The submitted data was not a file. Check the encoding type on the form.";

/// Attachment slots of a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSlot {
    File,
    MediaFile,
    LogFile,
}

impl FileSlot {
    pub const ALL: [FileSlot; 3] = [FileSlot::File, FileSlot::MediaFile, FileSlot::LogFile];

    pub fn as_str(self) -> &'static str {
        match self {
            FileSlot::File => "file",
            FileSlot::MediaFile => "media_file",
            FileSlot::LogFile => "log_file",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|slot| slot.as_str() == name)
    }

    /// Required filename extension, lower-case, if the slot restricts it.
    pub fn required_extension(self) -> Option<&'static str> {
        match self {
            FileSlot::File => None,
            FileSlot::MediaFile => Some("pdf"),
            FileSlot::LogFile => Some("csv"),
        }
    }

    /// Check the filename suffix (case-insensitive) against the slot.
    pub fn check_extension(self, filename: &str) -> Result<(), String> {
        let Some(ext) = self.required_extension() else {
            return Ok(());
        };
        let matches = filename
            .rsplit_once('.')
            .is_some_and(|(_, actual)| actual.eq_ignore_ascii_case(ext));
        if matches {
            Ok(())
        } else {
            Err(format!("Only {} files are allowed.", ext.to_uppercase()))
        }
    }
}

/// A scalar value of a delivery payload, from JSON or a multipart text part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Null,
    Text(String),
}

impl From<serde_json::Value> for FieldValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => FieldValue::Null,
            serde_json::Value::String(s) => FieldValue::Text(s),
            other => FieldValue::Text(other.to_string()),
        }
    }
}

/// A file part of a multipart delivery payload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub slot: FileSlot,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Validated payload. `None` leaves the stored value untouched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryChanges {
    pub transport_model: Option<i32>,
    pub vehicle_number: Option<String>,
    pub packaging: Option<i32>,
    pub service: Option<i32>,
    pub tech_state: Option<i32>,
    pub status: Option<i32>,
    pub distance_km: Option<Decimal>,
    pub send_time: Option<DateTime<Utc>>,
    pub delivery_time: Option<DateTime<Utc>>,
    pub travel_time: Option<Option<NaiveTime>>,
    pub from_address: Option<String>,
    pub to_address: Option<String>,
    pub comment: Option<String>,
    /// Slots explicitly set to null.
    pub cleared: Vec<FileSlot>,
}

impl DeliveryChanges {
    /// Referenced rows to check for existence, with the payload field naming each.
    pub fn references(&self) -> Vec<(ReferenceKind, i32)> {
        [
            (ReferenceKind::TransportModel, self.transport_model),
            (ReferenceKind::PackagingType, self.packaging),
            (ReferenceKind::ServiceType, self.service),
            (ReferenceKind::TechState, self.tech_state),
            (ReferenceKind::DeliveryStatus, self.status),
        ]
        .into_iter()
        .filter_map(|(kind, id)| id.map(|id| (kind, id)))
        .collect()
    }
}

/// Validate the scalar part of a delivery payload.
///
/// With `partial` unset every required field must be present (create and
/// PUT); otherwise only supplied fields are checked (PATCH). Optional fields
/// are only changed when supplied, in every mode. Read-only fields such as
/// `created_by` are ignored.
pub fn parse_delivery_fields(
    fields: &BTreeMap<String, FieldValue>,
    partial: bool,
) -> Result<DeliveryChanges, FieldErrors> {
    let mut errors = FieldErrors::new();
    let mut changes = DeliveryChanges::default();

    let required = |name: &str, errors: &mut FieldErrors| -> Option<String> {
        match fields.get(name) {
            Some(FieldValue::Text(text)) => Some(text.clone()),
            Some(FieldValue::Null) => {
                errors.add(name, NOT_NULL);
                None
            }
            None => {
                if !partial {
                    errors.add(name, REQUIRED);
                }
                None
            }
        }
    };

    for kind in ReferenceKind::ALL {
        let field = kind.delivery_field();
        let Some(raw) = required(field, &mut errors) else {
            continue;
        };
        match parse_pk(&raw) {
            Ok(id) => match kind {
                ReferenceKind::TransportModel => changes.transport_model = Some(id),
                ReferenceKind::PackagingType => changes.packaging = Some(id),
                ReferenceKind::ServiceType => changes.service = Some(id),
                ReferenceKind::TechState => changes.tech_state = Some(id),
                ReferenceKind::DeliveryStatus => changes.status = Some(id),
            },
            Err(msg) => errors.add(field, msg),
        }
    }

    if let Some(raw) = required("vehicle_number", &mut errors) {
        match parse_text(&raw, VEHICLE_NUMBER_MAX_LEN, false) {
            Ok(value) => changes.vehicle_number = Some(value),
            Err(msg) => errors.add("vehicle_number", msg),
        }
    }

    if let Some(raw) = required("distance_km", &mut errors) {
        match parse_distance(&raw) {
            Ok(value) => changes.distance_km = Some(value),
            Err(msg) => errors.add("distance_km", msg),
        }
    }

    if let Some(raw) = required("send_time", &mut errors) {
        match parse_timestamp(&raw) {
            Ok(value) => changes.send_time = Some(value),
            Err(msg) => errors.add("send_time", msg),
        }
    }

    if let Some(raw) = required("delivery_time", &mut errors) {
        match parse_timestamp(&raw) {
            Ok(value) => changes.delivery_time = Some(value),
            Err(msg) => errors.add("delivery_time", msg),
        }
    }

    match fields.get("travel_time") {
        Some(FieldValue::Null) => changes.travel_time = Some(None),
        Some(FieldValue::Text(raw)) if raw.trim().is_empty() => changes.travel_time = Some(None),
        Some(FieldValue::Text(raw)) => match parse_travel_time(raw) {
            Ok(value) => changes.travel_time = Some(Some(value)),
            Err(msg) => errors.add("travel_time", msg),
        },
        None => {}
    }

    for (name, slot) in [
        ("from_address", &mut changes.from_address),
        ("to_address", &mut changes.to_address),
    ] {
        match fields.get(name) {
            Some(FieldValue::Text(raw)) => match parse_text(raw, ADDRESS_MAX_LEN, true) {
                Ok(value) => *slot = Some(value),
                Err(msg) => errors.add(name, msg),
            },
            Some(FieldValue::Null) => *slot = Some(String::new()),
            None => {}
        }
    }

    match fields.get("comment") {
        Some(FieldValue::Text(raw)) => changes.comment = Some(raw.clone()),
        Some(FieldValue::Null) => changes.comment = Some(String::new()),
        None => {}
    }

    for slot in FileSlot::ALL {
        match fields.get(slot.as_str()) {
            Some(FieldValue::Null) => changes.cleared.push(slot),
            Some(FieldValue::Text(raw)) if raw.is_empty() => changes.cleared.push(slot),
            Some(FieldValue::Text(_)) => errors.add(slot.as_str(), NOT_A_FILE),
            None => {}
        }
    }

    errors.into_result(changes)
}

fn parse_pk(raw: &str) -> Result<i32, String> {
    raw.trim()
        .parse::<i32>()
        .map_err(|_| format!("Incorrect type. Expected pk value, received {raw:?}."))
}

fn parse_text(raw: &str, max: usize, allow_blank: bool) -> Result<String, String> {
    let value = raw.trim();
    if value.is_empty() && !allow_blank {
        return Err(NOT_BLANK.into());
    }
    if value.chars().count() > max {
        return Err(format!(
            "Ensure this field has no more than {max} characters."
        ));
    }
    Ok(value.to_string())
}

/// A decimal with at most 2 fractional and 4 integral digits.
pub fn parse_distance(raw: &str) -> Result<Decimal, String> {
    let value: Decimal = raw
        .trim()
        .parse()
        .map_err(|_| "A valid number is required.".to_string())?;
    let mut value = value.normalize();
    if value.scale() > 2 {
        return Err("Ensure that there are no more than 2 decimal places.".into());
    }
    if value.abs() >= Decimal::from(10_000) {
        return Err("Ensure that there are no more than 4 digits before the decimal point.".into());
    }
    value.rescale(2);
    Ok(value)
}

/// RFC 3339, or a naive ISO 8601 date-time taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    const NAIVE_FORMATS: [&str; 4] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ];
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| {
            "Datetime has wrong format. Use one of these formats instead: \
             YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z]."
                .to_string()
        })
}

/// `HH:MM` or `HH:MM:SS[.ffffff]`.
pub fn parse_travel_time(raw: &str) -> Result<NaiveTime, String> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .map_err(|_| {
            "Time has wrong format. Use one of these formats instead: hh:mm[:ss[.uuuuuu]].".into()
        })
}

/// Check the filenames of uploaded parts against their slots.
pub fn validate_uploads(files: &[UploadedFile]) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for upload in files {
        let slot = upload.slot.as_str();
        match crate::utils::filename::validate_flat_filename(&upload.filename) {
            Ok(name) => {
                if let Err(msg) = upload.slot.check_extension(name) {
                    errors.add(slot, msg);
                }
            }
            Err(e) => errors.add(slot, e.message()),
        }
    }
    errors
}

/// A delivery as returned by the API.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct DeliveryResponse {
    #[schema(example = 12)]
    pub id: i32,
    #[schema(example = 1)]
    pub transport_model: i32,
    #[schema(example = "A123BC77")]
    pub vehicle_number: String,
    pub packaging: i32,
    pub service: i32,
    pub tech_state: i32,
    pub status: i32,
    /// Decimal string with two fractional digits.
    #[schema(value_type = String, example = "152.50")]
    pub distance_km: Decimal,
    pub send_time: DateTime<Utc>,
    pub delivery_time: DateTime<Utc>,
    /// `HH:MM:SS`.
    #[schema(value_type = Option<String>, example = "03:15:00")]
    pub travel_time: Option<NaiveTime>,
    pub from_address: String,
    pub to_address: String,
    pub comment: String,
    pub file: Option<AttachmentResponse>,
    pub media_file: Option<AttachmentResponse>,
    pub log_file: Option<AttachmentResponse>,
    /// ID of the user who created the record.
    pub created_by: Option<i32>,
    /// Creator's full name, or the username when no name is set.
    #[schema(example = "Ivan Petrov")]
    pub created_by_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DeliveryResponse {
    pub fn new(
        model: delivery::Model,
        files: &[delivery_file::Model],
        created_by_name: Option<String>,
    ) -> Self {
        let slot = |slot: FileSlot| {
            files
                .iter()
                .find(|f| f.slot == slot.as_str())
                .map(AttachmentResponse::from)
        };
        Self {
            id: model.id,
            transport_model: model.transport_model_id,
            vehicle_number: model.vehicle_number,
            packaging: model.packaging_id,
            service: model.service_id,
            tech_state: model.tech_state_id,
            status: model.status_id,
            distance_km: model.distance_km,
            send_time: model.send_time,
            delivery_time: model.delivery_time,
            travel_time: model.travel_time,
            from_address: model.from_address,
            to_address: model.to_address,
            comment: model.comment,
            file: slot(FileSlot::File),
            media_file: slot(FileSlot::MediaFile),
            log_file: slot(FileSlot::LogFile),
            created_by: model.created_by_id,
            created_by_name,
            created_at: model.created_at,
        }
    }
}

/// JSON form of a delivery payload. Multipart requests carry the same
/// fields as text parts plus optional `file`, `media_file` and `log_file`
/// file parts.
#[derive(utoipa::ToSchema)]
#[allow(dead_code)]
pub struct DeliveryRequest {
    #[schema(example = 1)]
    transport_model: i32,
    #[schema(example = "A123BC77")]
    vehicle_number: String,
    #[schema(example = 1)]
    packaging: i32,
    #[schema(example = 2)]
    service: i32,
    #[schema(example = 1)]
    tech_state: i32,
    #[schema(example = 3)]
    status: i32,
    #[schema(value_type = String, example = "152.50")]
    distance_km: String,
    #[schema(example = "2025-07-10T08:30:00Z")]
    send_time: String,
    #[schema(example = "2025-07-10T11:45:00Z")]
    delivery_time: String,
    #[schema(example = "03:15")]
    travel_time: Option<String>,
    from_address: Option<String>,
    to_address: Option<String>,
    comment: Option<String>,
    /// `null` clears the slot.
    #[schema(value_type = Option<String>)]
    file: Option<()>,
    #[schema(value_type = Option<String>)]
    media_file: Option<()>,
    #[schema(value_type = Option<String>)]
    log_file: Option<()>,
}
