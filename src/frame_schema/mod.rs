//! FrameSchema - Wire payload validation
//!
//! ## Responsibilities
//!
//! - Coerce a loosely typed JSON payload into a canonical [`Frame`]
//! - Reject malformed payloads with a field-level [`ValidationError`]
//!
//! Used by the bus worker, the device session and the reprocess operator. Pure and
//! deterministic, so it is safe to call from any task.
//!
//! ## Wire keys
//!
//! Devices send `fram_id`, `cam_id`, `timestamp`, `image_info` and objects with
//! `obj_id`, `type`, `lat`, `lng`, `alt`, `speed_kt`. The snake_case and camelCase
//! spellings of the canonical names are accepted as well. Numeric fields may arrive as
//! numeric strings.

mod types;

pub use types::*;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

/// Accepted spellings per field; the first one is used in error paths
mod keys {
    pub const FRAME_ID: &[&str] = &["fram_id", "frame_id", "frameId"];
    pub const CAMERA_ID: &[&str] = &["cam_id", "camera_id", "cameraId"];
    pub const CAPTURED_AT: &[&str] = &["timestamp", "captured_at", "capturedAt"];
    pub const IMAGE_DIMENSIONS: &[&str] = &["image_info", "image_dimensions", "imageDimensions"];
    pub const CAMERA_INFO: &[&str] = &["camera_info", "cameraInfo"];
    pub const OBJECTS: &[&str] = &["objects"];
    pub const TOKEN_ID: &str = "token_id";
    pub const CREDENTIAL: &[&str] = &["token", "credential"];

    pub const OBJECT_ID: &[&str] = &["obj_id", "object_id", "objectId"];
    pub const OBJECT_TYPE: &[&str] = &["type", "object_type"];
    pub const LAT: &[&str] = &["lat", "latitude"];
    pub const LNG: &[&str] = &["lng", "lon", "longitude"];
    pub const ALTITUDE: &[&str] = &["alt", "altitude"];
    pub const SPEED: &[&str] = &["speed_kt", "speed"];
}

/// Every accepted spelling of the top-level field `key`
///
/// Empty when `key` is not a known frame field.
pub fn field_aliases(key: &str) -> &'static [&'static str] {
    const TOP_LEVEL: &[&[&str]] = &[
        keys::FRAME_ID,
        keys::CAMERA_ID,
        keys::CAPTURED_AT,
        keys::IMAGE_DIMENSIONS,
        keys::CAMERA_INFO,
        keys::OBJECTS,
        keys::CREDENTIAL,
    ];
    TOP_LEVEL
        .iter()
        .copied()
        .find(|names| names.contains(&key))
        .unwrap_or(&[])
}

/// Validate a wire payload into a [`Frame`]
///
/// `image_dimensions` and `camera_info` are optional here; ingress paths decide whether
/// they need them. The returned frame never carries image bytes.
pub fn validate(raw: &Value) -> Result<Frame, ValidationError> {
    let root = raw
        .as_object()
        .ok_or_else(|| ValidationError::new("$", ValidationIssue::WrongType { expected: "object" }))?;

    let frame_id = scalar_string(required(root, keys::FRAME_ID, "")?, keys::FRAME_ID[0])?;
    let camera_id = non_empty_string(required(root, keys::CAMERA_ID, "")?, keys::CAMERA_ID[0])?;
    let captured_at = timestamp(required(root, keys::CAPTURED_AT, "")?, keys::CAPTURED_AT[0])?;

    let items = required(root, keys::OBJECTS, "")?
        .as_array()
        .ok_or_else(|| {
            ValidationError::new(keys::OBJECTS[0], ValidationIssue::WrongType { expected: "array" })
        })?;
    let objects = items
        .iter()
        .enumerate()
        .map(|(index, item)| detected_object(item, index))
        .collect::<Result<Vec<_>, _>>()?;

    let image_dimensions = lookup(root, keys::IMAGE_DIMENSIONS)
        .map(image_dimensions)
        .transpose()?;

    Ok(Frame {
        frame_id,
        camera_id,
        camera_info: embedded_camera_info(root)?,
        captured_at,
        image_dimensions,
        objects,
        image: None,
    })
}

/// Credential carried inside a bus payload, if any
///
/// Looks at `token`/`credential`, then `token_id` (either the token itself or an object
/// holding it).
pub fn embedded_credential(raw: &Value) -> Option<String> {
    let root = raw.as_object()?;

    let direct = lookup(root, keys::CREDENTIAL)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty());
    if let Some(token) = direct {
        return Some(token.to_string());
    }

    match root.get(keys::TOKEN_ID)? {
        Value::String(token) if !token.trim().is_empty() => Some(token.clone()),
        Value::Object(nested) => lookup(nested, keys::CREDENTIAL)
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        _ => None,
    }
}

fn lookup<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|value| !value.is_null())
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    names: &[&str],
    prefix: &str,
) -> Result<&'a Value, ValidationError> {
    lookup(obj, names)
        .ok_or_else(|| ValidationError::new(format!("{}{}", prefix, names[0]), ValidationIssue::Missing))
}

fn scalar_string(value: &Value, field: &str) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ValidationError::new(
            field,
            ValidationIssue::WrongType { expected: "scalar" },
        )),
    }
}

fn non_empty_string(value: &Value, field: &str) -> Result<String, ValidationError> {
    let s = value
        .as_str()
        .ok_or_else(|| ValidationError::new(field, ValidationIssue::WrongType { expected: "string" }))?;
    if s.trim().is_empty() {
        return Err(ValidationError::new(field, ValidationIssue::Empty));
    }
    Ok(s.to_string())
}

/// JSON number or numeric string, finite
fn coerce_number(value: &Value, field: &str) -> Result<f64, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                trimmed.parse::<f64>().ok()
            }
        }
        _ => None,
    };

    match parsed {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(ValidationError::new(field, ValidationIssue::NotNumeric)),
    }
}

/// RFC 3339, naive ISO 8601 (taken as UTC) or epoch milliseconds
fn timestamp(value: &Value, field: &str) -> Result<DateTime<Utc>, ValidationError> {
    let invalid = || ValidationError::new(field, ValidationIssue::InvalidTimestamp);

    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|naive| Utc.from_utc_datetime(&naive))
                .ok_or_else(invalid)
        }
        Value::Number(n) => {
            let millis = match n.as_i64() {
                Some(ms) => ms,
                None => match n.as_f64() {
                    Some(f) if f.is_finite() => f as i64,
                    _ => return Err(invalid()),
                },
            };
            Utc.timestamp_millis_opt(millis).single().ok_or_else(invalid)
        }
        _ => Err(ValidationError::new(
            field,
            ValidationIssue::WrongType {
                expected: "timestamp string or epoch milliseconds",
            },
        )),
    }
}

fn detected_object(value: &Value, index: usize) -> Result<DetectedObject, ValidationError> {
    let prefix = format!("objects[{}].", index);
    let field = |name: &str| format!("{}{}", prefix, name);

    let obj = value.as_object().ok_or_else(|| {
        ValidationError::new(
            format!("objects[{}]", index),
            ValidationIssue::WrongType { expected: "object" },
        )
    })?;

    let object_id = scalar_string(
        required(obj, keys::OBJECT_ID, &prefix)?,
        &field(keys::OBJECT_ID[0]),
    )?;
    if object_id.trim().is_empty() {
        return Err(ValidationError::new(field(keys::OBJECT_ID[0]), ValidationIssue::Empty));
    }

    let object_type = match lookup(obj, keys::OBJECT_TYPE) {
        Some(v) => Some(scalar_string(v, &field(keys::OBJECT_TYPE[0]))?),
        None => None,
    };

    let number = |names: &[&str]| -> Result<f64, ValidationError> {
        coerce_number(required(obj, names, &prefix)?, &field(names[0]))
    };

    Ok(DetectedObject {
        object_id,
        object_type,
        lat: number(keys::LAT)?,
        lng: number(keys::LNG)?,
        altitude: number(keys::ALTITUDE)?,
        speed: number(keys::SPEED)?,
    })
}

fn image_dimensions(value: &Value) -> Result<ImageDimensions, ValidationError> {
    let base = keys::IMAGE_DIMENSIONS[0];
    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::new(base, ValidationIssue::WrongType { expected: "object" }))?;

    let prefix = format!("{}.", base);
    let dimension = |name: &str| -> Result<u32, ValidationError> {
        let field = format!("{}{}", prefix, name);
        let n = coerce_number(required(obj, &[name], &prefix)?, &field)?;
        if n < 0.0 || n.fract() != 0.0 || n > f64::from(u32::MAX) {
            return Err(ValidationError::new(field, ValidationIssue::OutOfRange));
        }
        Ok(n as u32)
    };

    Ok(ImageDimensions {
        width: dimension("width")?,
        height: dimension("height")?,
    })
}

/// `camera_info` at the top level, or nested under `token_id`
fn embedded_camera_info(root: &Map<String, Value>) -> Result<Option<CameraInfo>, ValidationError> {
    let (value, base) = match lookup(root, keys::CAMERA_INFO) {
        Some(v) => (v, keys::CAMERA_INFO[0].to_string()),
        None => {
            let nested = root
                .get(keys::TOKEN_ID)
                .and_then(Value::as_object)
                .and_then(|token| lookup(token, keys::CAMERA_INFO));
            match nested {
                Some(v) => (v, format!("{}.{}", keys::TOKEN_ID, keys::CAMERA_INFO[0])),
                None => return Ok(None),
            }
        }
    };

    let obj = value
        .as_object()
        .ok_or_else(|| ValidationError::new(&base, ValidationIssue::WrongType { expected: "object" }))?;

    let text = |name: &str| -> Result<String, ValidationError> {
        match obj.get(name) {
            None | Some(Value::Null) => Ok(String::new()),
            Some(v) => scalar_string(v, &format!("{}.{}", base, name)),
        }
    };

    Ok(Some(CameraInfo {
        name: text("name")?,
        category: text("category")?,
        location: text("location")?,
        institute: text("institute")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "frameId": "1",
            "cameraId": "CAM1",
            "capturedAt": "2024-01-01T00:00:00Z",
            "objects": [
                {"objectId": "O1", "lat": "13.75", "lng": "100.50", "altitude": "50", "speed": "15"}
            ]
        })
    }

    #[test]
    fn test_numeric_strings_are_coerced() {
        let frame = validate(&sample()).unwrap();
        assert_eq!(frame.frame_id, "1");
        assert_eq!(frame.camera_id, "CAM1");
        assert_eq!(frame.captured_at.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(frame.objects.len(), 1);
        assert_eq!(frame.objects[0].lat, 13.75);
        assert_eq!(frame.objects[0].lng, 100.50);
        assert_eq!(frame.objects[0].altitude, 50.0);
        assert_eq!(frame.objects[0].speed, 15.0);
        assert!(frame.objects[0].object_type.is_none());
        assert!(frame.image.is_none());
    }

    #[test]
    fn test_device_wire_keys() {
        let raw = json!({
            "fram_id": 42,
            "cam_id": "e8a76237",
            "timestamp": "2024-05-01T12:30:00.123456Z",
            "image_info": {"width": 640, "height": 480},
            "objects": [
                {"obj_id": "DRONE_1_001", "type": "quadcopter", "lat": 13.7564, "lng": 100.5019, "alt": 50.5, "speed_kt": 15.1},
                {"obj_id": "DRONE_1_002", "type": "fixed-wing", "lat": 13.7562, "lng": 100.5017, "alt": 100.3, "speed_kt": 25.2}
            ]
        });

        let frame = validate(&raw).unwrap();
        assert_eq!(frame.frame_id, "42");
        assert_eq!(frame.image_dimensions, Some(ImageDimensions { width: 640, height: 480 }));
        assert_eq!(frame.objects.len(), 2);
        assert_eq!(frame.objects[1].object_id, "DRONE_1_002");
        assert_eq!(frame.objects[1].object_type.as_deref(), Some("fixed-wing"));
        assert_eq!(frame.objects[1].speed, 25.2);
    }

    #[test]
    fn test_non_numeric_coordinate_rejected() {
        let mut raw = sample();
        raw["objects"][0]["lat"] = json!("north");

        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field, "objects[0].lat");
        assert_eq!(err.issue, ValidationIssue::NotNumeric);
    }

    #[test]
    fn test_non_numeric_representations_rejected() {
        for bad in [json!(true), json!([1.0]), json!({"v": 1}), json!(""), json!("NaN"), json!("inf")] {
            let mut raw = sample();
            raw["objects"][0]["speed"] = bad.clone();
            let err = validate(&raw).unwrap_err();
            assert_eq!(err.field, "objects[0].speed_kt", "value {}", bad);
        }
    }

    #[test]
    fn test_missing_required_fields() {
        for (key, expected) in [
            ("frameId", "fram_id"),
            ("cameraId", "cam_id"),
            ("capturedAt", "timestamp"),
            ("objects", "objects"),
        ] {
            let mut raw = sample();
            raw.as_object_mut().unwrap().remove(key);
            let err = validate(&raw).unwrap_err();
            assert_eq!(err.field, expected);
            assert_eq!(err.issue, ValidationIssue::Missing);
        }
    }

    #[test]
    fn test_empty_ids_rejected() {
        let mut raw = sample();
        raw["cameraId"] = json!("  ");
        assert_eq!(validate(&raw).unwrap_err().issue, ValidationIssue::Empty);

        let mut raw = sample();
        raw["objects"][0]["objectId"] = json!("");
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field, "objects[0].obj_id");
        assert_eq!(err.issue, ValidationIssue::Empty);
    }

    #[test]
    fn test_wrong_types() {
        let mut raw = sample();
        raw["objects"] = json!({"objectId": "O1"});
        assert_eq!(
            validate(&raw).unwrap_err().issue,
            ValidationIssue::WrongType { expected: "array" }
        );

        let mut raw = sample();
        raw["cameraId"] = json!(17);
        assert_eq!(validate(&raw).unwrap_err().field, "cam_id");

        let err = validate(&json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.field, "$");
    }

    #[test]
    fn test_empty_object_list_is_valid() {
        let mut raw = sample();
        raw["objects"] = json!([]);
        assert!(validate(&raw).unwrap().objects.is_empty());
    }

    #[test]
    fn test_timestamp_forms() {
        let mut raw = sample();
        raw["capturedAt"] = json!(1_704_067_200_000i64);
        assert_eq!(
            validate(&raw).unwrap().captured_at.to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );

        raw["capturedAt"] = json!("2024-01-01T07:00:00+07:00");
        assert_eq!(
            validate(&raw).unwrap().captured_at.to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );

        raw["capturedAt"] = json!("2024-01-01T00:00:00.500");
        assert_eq!(validate(&raw).unwrap().captured_at.timestamp_millis(), 1_704_067_200_500);

        raw["capturedAt"] = json!("yesterday");
        assert_eq!(validate(&raw).unwrap_err().issue, ValidationIssue::InvalidTimestamp);
    }

    #[test]
    fn test_image_dimensions_must_be_whole() {
        let mut raw = sample();
        raw["image_info"] = json!({"width": "1920", "height": 1080});
        assert_eq!(
            validate(&raw).unwrap().image_dimensions,
            Some(ImageDimensions { width: 1920, height: 1080 })
        );

        raw["image_info"] = json!({"width": 640.5, "height": 480});
        let err = validate(&raw).unwrap_err();
        assert_eq!(err.field, "image_info.width");
        assert_eq!(err.issue, ValidationIssue::OutOfRange);
    }

    #[test]
    fn test_embedded_camera_info_and_credential() {
        let mut raw = sample();
        raw["token_id"] = json!({
            "token": "257c87b4",
            "camera_info": {"name": "North Gate", "location": "Bangkok"}
        });

        let frame = validate(&raw).unwrap();
        let info = frame.camera_info.unwrap();
        assert_eq!(info.name, "North Gate");
        assert_eq!(info.location, "Bangkok");
        assert_eq!(info.category, "");
        assert_eq!(embedded_credential(&raw).as_deref(), Some("257c87b4"));

        let raw = json!({"token": "abc", "token_id": "ignored"});
        assert_eq!(embedded_credential(&raw).as_deref(), Some("abc"));
        assert_eq!(embedded_credential(&sample()), None);
    }
}
