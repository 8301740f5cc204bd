/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The envelope codec: one local record to and from the self-describing JSON
//! document stored in the remote database directory.
//!
//! Binary column bytes never travel inside the envelope. Encoding emits a
//! sidecar reference (`"data": "<id>_<column>"`) and hands the bytes back to
//! the caller as pending uploads; decoding records the reference for a later
//! fetch. Decoding is deliberately lenient per column: anything missing a
//! name, carrying an unknown type code, or shaped wrong is skipped with a
//! warning so the rest of the record still lands.

use crate::error::{Error, Result};
use crate::schema::{RECORD_ID_COLUMN, TIMESTAMP_COLUMN};
use crate::types::{ColumnType, Value, TYPE_CODE_NULL};
use serde_derive::Serialize;

#[derive(Serialize)]
struct WireEnvelope<'a> {
    tablename: &'a str,
    columns: Vec<WireColumn<'a>>,
}

#[derive(Serialize)]
struct WireColumn<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    type_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

/// Derived name of the sidecar object holding one binary column's bytes.
pub fn sidecar_id(id: &str, column: &str) -> String {
    format!("{}_{}", id, column)
}

/// One binary payload that must be uploaded alongside the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidecarPayload {
    pub column: String,
    pub sidecar_id: String,
    pub bytes: Vec<u8>,
}

pub struct EncodedRecord {
    pub json: Vec<u8>,
    pub sidecars: Vec<SidecarPayload>,
}

/// Encode a row snapshot (as returned by the local store) into an envelope.
/// Reserved columns and null cells are left out.
pub fn encode(table: &str, id: &str, snapshot: &[(String, Value)]) -> Result<EncodedRecord> {
    let mut columns = Vec::with_capacity(snapshot.len());
    let mut sidecars = Vec::new();
    for (name, value) in snapshot {
        if name == RECORD_ID_COLUMN || name == TIMESTAMP_COLUMN {
            continue;
        }
        let ty = match value.column_type() {
            Some(ty) => ty,
            None => continue,
        };
        let (json_value, data) = match value {
            Value::Integer(i) => (Some(serde_json::Value::from(*i)), None),
            Value::Text(s) => (Some(serde_json::Value::from(s.as_str())), None),
            Value::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => (Some(serde_json::Value::Number(n)), None),
                None => {
                    log::warn!("skipping non-finite float in column {:?}", name);
                    continue;
                }
            },
            Value::Binary(bytes) => {
                let sidecar = sidecar_id(id, name);
                sidecars.push(SidecarPayload {
                    column: name.clone(),
                    sidecar_id: sidecar.clone(),
                    bytes: bytes.clone(),
                });
                (None, Some(sidecar))
            }
            Value::Null => unreachable!("null has no column type"),
        };
        columns.push(WireColumn {
            name,
            type_code: ty.code(),
            value: json_value,
            data,
        });
    }
    let json = serde_json::to_vec(&WireEnvelope {
        tablename: table,
        columns,
    })?;
    Ok(EncodedRecord { json, sidecars })
}

/// A sidecar reference found while decoding; the bytes still live remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedSidecar {
    pub column: String,
    pub sidecar_id: String,
}

/// The decoded form of an envelope: everything needed to update the local
/// row, plus the sidecar fetches still outstanding.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedRecord {
    pub table: String,
    pub scalars: Vec<(String, Value)>,
    pub sidecars: Vec<StagedSidecar>,
}

pub fn decode(bytes: &[u8]) -> Result<StagedRecord> {
    let parsed: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::MalformedEnvelope(format!("invalid JSON: {}", e)))?;
    let obj = parsed
        .as_object()
        .ok_or_else(|| Error::MalformedEnvelope("not a JSON object".into()))?;
    let table = obj
        .get("tablename")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    if table.is_empty() {
        return Err(Error::MalformedEnvelope("missing tablename".into()));
    }
    let columns = obj
        .get("columns")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::MalformedEnvelope("columns is not an array".into()))?;

    let mut scalars = Vec::new();
    let mut sidecars = Vec::new();
    for entry in columns {
        let column = match entry.as_object() {
            Some(c) => c,
            None => {
                log::warn!("skipping non-object column entry in envelope for {:?}", table);
                continue;
            }
        };
        let name = match column.get("name").and_then(|v| v.as_str()) {
            Some(n) if !n.is_empty() => n,
            _ => {
                log::warn!("skipping column without a name in envelope for {:?}", table);
                continue;
            }
        };
        let code = match column.get("type").and_then(|v| v.as_i64()) {
            Some(c) => c,
            None => {
                log::warn!("skipping column {:?} without a type code", name);
                continue;
            }
        };
        if code == TYPE_CODE_NULL {
            continue;
        }
        let ty = match ColumnType::from_code(code) {
            Some(ty) => ty,
            None => {
                log::warn!("skipping column {:?} with unknown type code {}", name, code);
                continue;
            }
        };
        if ty == ColumnType::Binary {
            match column.get("data").and_then(|v| v.as_str()) {
                Some(data) if !data.is_empty() => sidecars.push(StagedSidecar {
                    column: name.to_string(),
                    sidecar_id: data.to_string(),
                }),
                _ => log::warn!("skipping binary column {:?} without a sidecar id", name),
            }
            continue;
        }
        let raw = match column.get("value") {
            Some(v) => v,
            None => {
                log::warn!("skipping column {:?} without a value", name);
                continue;
            }
        };
        let value = match ty {
            ColumnType::Integer => raw
                .as_i64()
                .or_else(|| raw.as_f64().map(|f| f as i64))
                .map(Value::Integer),
            ColumnType::Float => raw
                .as_f64()
                .or_else(|| raw.as_i64().map(|i| i as f64))
                .map(Value::Float),
            ColumnType::Text => raw.as_str().map(Value::from),
            ColumnType::Binary => unreachable!("handled above"),
        };
        match value {
            Some(v) => scalars.push((name.to_string(), v)),
            None => log::warn!(
                "skipping column {:?}: value does not coerce to {}",
                name,
                ty
            ),
        }
    }
    Ok(StagedRecord {
        table: table.to_string(),
        scalars,
        sidecars,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> Vec<(String, Value)> {
        vec![
            ("name".to_string(), Value::from("Igor V.")),
            ("date".to_string(), Value::Integer(1_700_000_000)),
            ("height".to_string(), Value::Float(1.85)),
            ("photo".to_string(), Value::Binary(vec![0xde, 0xad])),
            ("note".to_string(), Value::Null),
            (RECORD_ID_COLUMN.to_string(), Value::from("u-1")),
            (TIMESTAMP_COLUMN.to_string(), Value::Integer(123)),
        ]
    }

    #[test]
    fn test_encode_shape() {
        let encoded = encode("pers", "u-1", &snapshot()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&encoded.json).unwrap();
        assert_eq!(parsed["tablename"], "pers");
        let columns = parsed["columns"].as_array().unwrap();
        // null cell and the two reserved columns are dropped
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[0]["name"], "name");
        assert_eq!(columns[0]["type"], 2);
        assert_eq!(columns[0]["value"], "Igor V.");
        assert_eq!(columns[1]["type"], 1);
        assert_eq!(columns[1]["value"], 1_700_000_000i64);
        assert_eq!(columns[2]["type"], 4);
        // binary column references the sidecar and carries no inline value
        assert_eq!(columns[3]["name"], "photo");
        assert_eq!(columns[3]["type"], 3);
        assert_eq!(columns[3]["data"], "u-1_photo");
        assert!(columns[3].get("value").is_none());

        assert_eq!(
            encoded.sidecars,
            vec![SidecarPayload {
                column: "photo".to_string(),
                sidecar_id: "u-1_photo".to_string(),
                bytes: vec![0xde, 0xad],
            }]
        );
    }

    #[test]
    fn test_scalar_round_trip() {
        let encoded = encode("pers", "u-1", &snapshot()).unwrap();
        let staged = decode(&encoded.json).unwrap();
        assert_eq!(staged.table, "pers");
        assert_eq!(
            staged.scalars,
            vec![
                ("name".to_string(), Value::from("Igor V.")),
                ("date".to_string(), Value::Integer(1_700_000_000)),
                ("height".to_string(), Value::Float(1.85)),
            ]
        );
        assert_eq!(
            staged.sidecars,
            vec![StagedSidecar {
                column: "photo".to_string(),
                sidecar_id: "u-1_photo".to_string(),
            }]
        );
    }

    #[test]
    fn test_decode_unknown_type_preserves_rest() {
        let json = br#"{
            "tablename": "pers",
            "columns": [
                {"name": "mystery", "type": 9, "value": 1},
                {"name": "name", "type": 2, "value": "Ada"}
            ]
        }"#;
        let staged = decode(json).unwrap();
        assert_eq!(staged.scalars, vec![("name".to_string(), Value::from("Ada"))]);
    }

    #[test]
    fn test_decode_skips_malformed_columns() {
        let json = br#"{
            "tablename": "pers",
            "columns": [
                42,
                {"type": 2, "value": "no name"},
                {"name": "untyped", "value": 3},
                {"name": "novalue", "type": 1},
                {"name": "badcoerce", "type": 1, "value": "text"},
                {"name": "photo", "type": 3},
                {"name": "date", "type": 1, "value": 7}
            ]
        }"#;
        let staged = decode(json).unwrap();
        assert_eq!(staged.scalars, vec![("date".to_string(), Value::Integer(7))]);
        assert!(staged.sidecars.is_empty());
    }

    #[test]
    fn test_decode_rejects_broken_envelopes() {
        assert!(matches!(
            decode(b"not json"),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(b"[1,2,3]"),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(br#"{"columns": []}"#),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(br#"{"tablename": "", "columns": []}"#),
            Err(Error::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(br#"{"tablename": "pers", "columns": 5}"#),
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_decode_coerces_numbers() {
        let json = br#"{
            "tablename": "pers",
            "columns": [
                {"name": "date", "type": 1, "value": 99.0},
                {"name": "height", "type": 4, "value": 2}
            ]
        }"#;
        let staged = decode(json).unwrap();
        assert_eq!(
            staged.scalars,
            vec![
                ("date".to_string(), Value::Integer(99)),
                ("height".to_string(), Value::Float(2.0)),
            ]
        );
    }
}
