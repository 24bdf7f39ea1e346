//! Handle record wire types.
//!
//! Records are exchanged verbatim with the registry. Every struct keeps
//! fields it does not model in a flattened `extra` map, so a
//! read-modify-write cycle sends back exactly what was read.

use std::collections::HashSet;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HandleError, HandleResult};

/// Entry type granting administrative rights over a record.
pub const HS_ADMIN: &str = "HS_ADMIN";

/// `data.format` of plain string values.
pub const FORMAT_STRING: &str = "string";

/// `data.format` of HS_ADMIN values.
pub const FORMAT_ADMIN: &str = "admin";

/// Default entry TTL in seconds.
pub const DEFAULT_TTL: i64 = 86_400;

/// Default HS_ADMIN permission bitmask.
pub const DEFAULT_ADMIN_PERMISSIONS: &str = "011111110011";

/// Default index of the admin's public key inside the admin handle.
pub const DEFAULT_ADMIN_KEY_INDEX: u32 = 200;

/// A handle record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Value entries in wire order.
    pub values: Vec<ValueEntry>,

    /// Full identifier (prefix + suffix).
    pub handle: String,

    /// Registry response code, present on reads.
    #[serde(
        rename = "responseCode",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub response_code: Option<i64>,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single typed value inside a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    /// Server-visible index (≥ 1), unrelated to the position in `values`.
    pub index: u32,

    /// Time to live in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<i64>,

    /// Type tag, e.g. `URL` or `HS_ADMIN`.
    #[serde(rename = "type")]
    pub entry_type: String,

    /// ISO-8601 UTC timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    /// Payload.
    pub data: ValueData,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueData {
    /// Encoding of `value` (`string`, `admin`, ...).
    pub format: String,

    /// The value itself.
    pub value: EntryValue,

    /// Fields not modelled above.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Entry value: plain string, HS_ADMIN structure, or anything else the
/// registry returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntryValue {
    Text(String),
    Admin(AdminValue),
    Other(Value),
}

impl EntryValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for EntryValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for EntryValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// HS_ADMIN value: who administers the record and with which permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminValue {
    /// Index of the admin's key in the admin handle.
    pub index: u32,

    /// Admin handle (e.g. `0.NA/20.5000.1025`).
    pub handle: String,

    /// Permission bitmask string.
    pub permissions: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Current UTC time in the registry's timestamp format.
pub fn timestamp_now() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

impl ValueEntry {
    /// A string-format entry stamped with the current time.
    pub fn string(index: u32, entry_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index,
            ttl: Some(DEFAULT_TTL),
            entry_type: entry_type.into(),
            timestamp: Some(timestamp_now()),
            data: ValueData {
                format: FORMAT_STRING.to_string(),
                value: EntryValue::Text(value.into()),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    /// An HS_ADMIN entry for `admin_handle` with the default key index.
    pub fn admin(index: u32, admin_handle: impl Into<String>, permissions: impl Into<String>) -> Self {
        Self {
            index,
            ttl: Some(DEFAULT_TTL),
            entry_type: HS_ADMIN.to_string(),
            timestamp: Some(timestamp_now()),
            data: ValueData {
                format: FORMAT_ADMIN.to_string(),
                value: EntryValue::Admin(AdminValue {
                    index: DEFAULT_ADMIN_KEY_INDEX,
                    handle: admin_handle.into(),
                    permissions: permissions.into(),
                    extra: Map::new(),
                }),
                extra: Map::new(),
            },
            extra: Map::new(),
        }
    }

    /// Override the TTL.
    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.entry_type == HS_ADMIN
    }
}

impl Record {
    /// An empty record for `handle`.
    pub fn new(handle: impl Into<String>) -> Self {
        Self {
            values: Vec::new(),
            handle: handle.into(),
            response_code: None,
            extra: Map::new(),
        }
    }

    /// Append an entry.
    pub fn with_entry(mut self, entry: ValueEntry) -> Self {
        self.values.push(entry);
        self
    }

    /// Entry with the given server-visible index.
    pub fn entry_by_index(&self, index: u32) -> Option<&ValueEntry> {
        self.values.iter().find(|e| e.index == index)
    }

    /// The HS_ADMIN value, if present and well-formed.
    pub fn admin(&self) -> Option<&AdminValue> {
        self.values
            .iter()
            .filter(|e| e.is_admin())
            .find_map(|e| match &e.data.value {
                EntryValue::Admin(admin) => Some(admin),
                _ => None,
            })
    }

    /// Check index uniqueness and HS_ADMIN presence.
    pub fn validate(&self) -> HandleResult<()> {
        let mut seen = HashSet::with_capacity(self.values.len());
        for entry in &self.values {
            if entry.index == 0 {
                return Err(HandleError::InvalidRecord {
                    reason: format!("entry '{}' has index 0", entry.entry_type),
                });
            }
            if !seen.insert(entry.index) {
                return Err(HandleError::InvalidRecord {
                    reason: format!("duplicate index {}", entry.index),
                });
            }
        }

        if self.admin().is_none() {
            return Err(HandleError::InvalidRecord {
                reason: "missing HS_ADMIN entry".into(),
            });
        }

        Ok(())
    }

    /// Replace `data.value` of the entry at sequence `position` (zero-based,
    /// not the entry's `index`). Nothing else in the record changes.
    pub fn set_value(&mut self, position: usize, value: impl Into<EntryValue>) -> HandleResult<()> {
        let len = self.values.len();
        let entry = self
            .values
            .get_mut(position)
            .ok_or_else(|| HandleError::InvalidRecord {
                reason: format!("position {} out of range ({} entries)", position, len),
            })?;
        entry.data.value = value.into();
        Ok(())
    }
}
