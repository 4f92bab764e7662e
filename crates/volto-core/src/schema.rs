//! Versioned on-disk layout of the enrollment database.
//!
//! Version 0 is the layout of the legacy browser kiosk: a bare JSON array of
//! `{ name, photos: [{ descriptor, score }] }`, with each descriptor either
//! a plain array or an index-keyed object (`{"0": .., "1": ..}`), which is
//! what serialising a typed float array produces. Version 1 wraps the people
//! in an envelope that carries the version number.

use crate::types::{Descriptor, Person, Sample};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

pub const SCHEMA_VERSION: u64 = 1;

/// Blob key the current schema is stored under.
pub const STORE_KEY: &str = "volto.store";

/// Key the legacy browser kiosk kept its database under.
pub const LEGACY_KEY: &str = "faceDB_v8";

#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported schema version {0}")]
    UnsupportedVersion(u64),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub people: Vec<Person>,
}

impl Snapshot {
    pub fn new(people: Vec<Person>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            people,
        }
    }
}

#[derive(Deserialize)]
struct LegacyPerson {
    name: String,
    #[serde(default)]
    photos: Vec<LegacyPhoto>,
}

#[derive(Deserialize)]
struct LegacyPhoto {
    descriptor: LegacyDescriptor,
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LegacyDescriptor {
    Array(Vec<f32>),
    Indexed(HashMap<String, f32>),
}

impl LegacyDescriptor {
    fn into_values(self) -> Result<Vec<f32>, SchemaError> {
        match self {
            LegacyDescriptor::Array(values) => Ok(values),
            LegacyDescriptor::Indexed(map) => {
                let mut indexed = map
                    .into_iter()
                    .map(|(k, v)| {
                        k.parse::<usize>()
                            .map(|i| (i, v))
                            .map_err(|_| SchemaError::Malformed(format!("descriptor key {k:?}")))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                indexed.sort_by_key(|(i, _)| *i);
                if indexed.iter().enumerate().any(|(pos, (i, _))| pos != *i) {
                    return Err(SchemaError::Malformed(
                        "descriptor indices are not contiguous from 0".into(),
                    ));
                }
                Ok(indexed.into_iter().map(|(_, v)| v).collect())
            }
        }
    }
}

/// Parse any known layout and bring it up to the current version.
pub fn upgrade(raw: &str) -> Result<Snapshot, SchemaError> {
    let value: Value = serde_json::from_str(raw)?;
    if value.is_null() {
        return Ok(Snapshot::new(Vec::new()));
    }
    if value.is_array() {
        return upgrade_v0(value);
    }
    let version = value
        .as_object()
        .ok_or_else(|| SchemaError::Malformed("expected an array or an object".into()))?
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| SchemaError::Malformed("missing version".into()))?;
    match version {
        SCHEMA_VERSION => Ok(serde_json::from_value(value)?),
        0 => Err(SchemaError::Malformed("version 0 data has no envelope".into())),
        v => Err(SchemaError::UnsupportedVersion(v)),
    }
}

fn upgrade_v0(value: Value) -> Result<Snapshot, SchemaError> {
    let legacy: Vec<LegacyPerson> = serde_json::from_value(value)?;
    let people = legacy
        .into_iter()
        .map(|p| {
            let samples = p
                .photos
                .into_iter()
                .map(|photo| {
                    Ok(Sample {
                        descriptor: Descriptor::new(photo.descriptor.into_values()?),
                        score: photo.score.unwrap_or(0.0),
                        enrolled_at: None,
                    })
                })
                .collect::<Result<Vec<_>, SchemaError>>()?;
            Ok(Person {
                name: p.name,
                samples,
            })
        })
        .collect::<Result<Vec<_>, SchemaError>>()?;

    tracing::info!(people = people.len(), "upgraded version 0 snapshot");
    Ok(Snapshot::new(people))
}
