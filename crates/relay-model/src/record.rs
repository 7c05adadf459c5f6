use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// The kind of change a row underwent: create, update, delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "c")]
    Create,
    #[serde(rename = "u")]
    Update,
    #[serde(rename = "d")]
    Delete,
}

impl Action {
    /// Parse the single-character op code used on the wire (`c`/`u`/`d`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "c" => Some(Action::Create),
            "u" => Some(Action::Update),
            "d" => Some(Action::Delete),
            _ => None,
        }
    }
}

/// The two compressed blobs a single Repository call returns: the updated
/// row-set and the deleted row-set, each gzip(XML) or absent. Lives only for
/// the duration of one `get_records` call — it is consumed by the Decoder
/// and never persisted or shared across polls.
#[derive(Debug, Clone, Default)]
pub struct RowSet {
    pub updated: Option<Vec<u8>>,
    pub deleted: Option<Vec<u8>>,
}

/// A single-part primary key: column name plus its string representation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pk {
    pub name: String,
    pub value: String,
}

impl Pk {
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.name.is_empty() {
            return Err(RelayError::Validation("pk.name is empty".into()));
        }
        if self.value.is_empty() {
            return Err(RelayError::Validation("pk.value is empty".into()));
        }
        Ok(())
    }
}

/// Auxiliary attributes carried by every changed row: the primary key, the
/// kind of change, and the database/unix timestamps at which it occurred.
#[derive(Debug, Clone, Default)]
pub struct Meta {
    pub pk: Pk,
    pub op: Option<Action>,
    pub ts: String,
    pub ux_ts: String,
}

impl Meta {
    pub fn validate(&self) -> Result<(), RelayError> {
        self.pk.validate()?;
        if self.op.is_none() {
            return Err(RelayError::Validation("op is missing or unrecognised".into()));
        }
        Ok(())
    }
}

/// A single changed row: its meta attributes plus the column values decoded
/// from the row-set (keys already lower-cased at decode time).
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub meta: Meta,
    pub fields: BTreeMap<String, String>,
}

impl Record {
    /// Message key bytes: `"<pk.name>=<pk.value>"`.
    pub fn key_bytes(&self) -> Result<Vec<u8>, RelayError> {
        self.meta.pk.validate()?;
        Ok(format!("{}={}", self.meta.pk.name, self.meta.pk.value).into_bytes())
    }

    /// Message value bytes: canonical UTF-8 JSON of the fields mapping only.
    /// `BTreeMap` gives a deterministic key order on the wire.
    pub fn value_bytes(&self) -> Result<Vec<u8>, RelayError> {
        self.meta.validate()?;
        serde_json::to_vec(&self.fields)
            .map_err(|e| RelayError::Validation(format!("json encode failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_bytes_format() {
        let r = Record {
            meta: Meta {
                pk: Pk { name: "id".into(), value: "7".into() },
                op: Some(Action::Update),
                ts: "".into(),
                ux_ts: "".into(),
            },
            fields: BTreeMap::new(),
        };
        assert_eq!(r.key_bytes().unwrap(), b"id=7");
    }

    #[test]
    fn key_bytes_rejects_empty_pk_value() {
        let r = Record {
            meta: Meta {
                pk: Pk { name: "id".into(), value: "".into() },
                op: Some(Action::Update),
                ts: "".into(),
                ux_ts: "".into(),
            },
            fields: BTreeMap::new(),
        };
        assert!(r.key_bytes().is_err());
    }

    #[test]
    fn value_bytes_round_trips_fields() {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), "7".to_string());
        fields.insert("str".to_string(), "x".to_string());
        let r = Record {
            meta: Meta {
                pk: Pk { name: "id".into(), value: "7".into() },
                op: Some(Action::Update),
                ts: "".into(),
                ux_ts: "".into(),
            },
            fields,
        };
        let bytes = r.value_bytes().unwrap();
        let parsed: BTreeMap<String, String> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, r.fields);
    }

    #[test]
    fn value_bytes_rejects_unrecognised_op() {
        let r = Record {
            meta: Meta {
                pk: Pk { name: "id".into(), value: "7".into() },
                op: None,
                ts: "".into(),
                ux_ts: "".into(),
            },
            fields: BTreeMap::new(),
        };
        assert!(r.value_bytes().is_err());
    }
}
