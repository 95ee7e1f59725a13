//! Envelope - 名前と payload を 1 つの JSON にまとめた形式
//!
//! ```json
//! { "type": "add", "reqData": { "argX": 3, "argY": 4 } }
//! ```
//!
//! `reqData` が無い / null の場合は空の payload（request のデフォルト値）になります。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CommandError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(rename = "reqData", default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(name: impl Into<String>, data: Value) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|err| CommandError::InvalidEnvelope {
            reason: err.to_string(),
            source: Arc::new(err),
        })
    }

    /// デコーダに渡す bytes
    pub fn payload(&self) -> Vec<u8> {
        match &self.data {
            Value::Null => Vec::new(),
            data => data.to_string().into_bytes(),
        }
    }
}
