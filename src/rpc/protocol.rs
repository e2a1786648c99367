//! Wire protocol definitions.
//!
//! Every type here crosses the endpoint as JSON. Field names are part of
//! the protocol; renames break running extensions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{EXT_FAILURE, EXT_SUCCESS, ExtensionError};
use crate::registry::{Broadcast, PluginRequest, RouteUuid, Row};

/// Identity an extension presents at registration; immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionInfo {
    /// Extension name; must be non-empty and unique per manager.
    pub name: String,
    /// Extension version.
    pub version: String,
    /// SDK the extension was built with.
    pub sdk_version: String,
    /// Oldest SDK the extension supports.
    pub min_sdk_version: String,
}

/// Status envelope of RPCs that return no tabular data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionStatus {
    /// Zero means success; any other value is an error.
    pub code: i64,
    /// Carried verbatim to the caller on failure.
    pub message: String,
    /// Set on a successful registration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<RouteUuid>,
}

impl ExtensionStatus {
    /// Plain success.
    #[must_use]
    pub fn success() -> Self {
        Self {
            code: EXT_SUCCESS,
            message: "OK".to_string(),
            uuid: None,
        }
    }

    /// Success carrying a freshly-minted route UUID.
    #[must_use]
    pub fn success_with_uuid(uuid: RouteUuid) -> Self {
        Self {
            code: EXT_SUCCESS,
            message: "OK".to_string(),
            uuid: Some(uuid),
        }
    }

    /// Generic failure.
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            code: EXT_FAILURE,
            message: message.into(),
            uuid: None,
        }
    }

    /// True on success.
    #[must_use]
    pub fn ok(&self) -> bool {
        self.code == EXT_SUCCESS
    }

    /// Converts the envelope into a result, preserving code and message.
    pub fn into_result(self) -> Result<Option<RouteUuid>, ExtensionError> {
        if self.ok() {
            Ok(self.uuid)
        } else {
            Err(ExtensionError::from_status(self.code, self.message))
        }
    }
}

impl From<&ExtensionError> for ExtensionStatus {
    fn from(err: &ExtensionError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            uuid: None,
        }
    }
}

/// Result envelope of RPCs returning tabular data; rows are empty unless
/// the status is success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionResponse {
    /// Call status.
    pub status: ExtensionStatus,
    /// Tabular payload.
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl ExtensionResponse {
    /// Success with payload.
    #[must_use]
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            status: ExtensionStatus::success(),
            rows,
        }
    }

    /// Failure, with the payload dropped.
    #[must_use]
    pub fn failure(status: ExtensionStatus) -> Self {
        Self {
            status,
            rows: Vec::new(),
        }
    }
}

/// One exported runtime option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionValue {
    /// Current value, stringified; consumers coerce.
    pub value: String,
    /// Built-in default.
    pub default_value: String,
    /// Flag type name ("bool", "string", ...).
    pub kind: String,
}

/// Name → value map of options the manager exports to extensions.
pub type OptionList = BTreeMap<String, OptionValue>;

/// UUID → identity map of registered extensions.
pub type ExtensionList = BTreeMap<RouteUuid, ExtensionInfo>;

/// Request envelope: method name plus parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum Request {
    /// Heartbeat; success means the remote is live and its registry intact.
    Ping,
    /// Registers an extension and its plugin broadcast.
    Register {
        info: ExtensionInfo,
        broadcast: Broadcast,
    },
    /// Lists registered extensions.
    Extensions,
    /// Snapshot of exported runtime options.
    Options,
    /// Runs a SQL query against the host.
    Query { sql: String },
    /// Resolves the column schema of a SQL query.
    QueryColumns { sql: String },
    /// Invokes a plugin item.
    Call {
        registry: String,
        item: String,
        request: PluginRequest,
    },
    /// Requests the remote to wind down.
    Shutdown,
}

/// Response envelope, tagged by payload shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Response {
    /// Status-only reply.
    Status(ExtensionStatus),
    /// Tabular reply.
    Response(ExtensionResponse),
    /// Extension listing.
    Extensions(ExtensionList),
    /// Option snapshot.
    Options(OptionList),
}

/// SQL column affinity, as declared by column type names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Unknown,
    Text,
    Integer,
    BigInt,
    UnsignedBigInt,
    Double,
    Blob,
}

impl ColumnType {
    /// Maps a declared type name onto an affinity; unrecognized names are
    /// `Unknown`.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.to_uppercase().as_str() {
            "TEXT" => ColumnType::Text,
            "INTEGER" => ColumnType::Integer,
            "BIGINT" => ColumnType::BigInt,
            "UNSIGNED BIGINT" | "UNSIGNED_BIGINT" => ColumnType::UnsignedBigInt,
            "DOUBLE" => ColumnType::Double,
            "BLOB" => ColumnType::Blob,
            _ => ColumnType::Unknown,
        }
    }
}

/// Per-column flags; queries over the wire always use the default set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnOptions {
    /// No special handling.
    #[default]
    Default,
    /// Column participates in index optimization.
    Index,
    /// Column is required in every predicate.
    Required,
}

/// One resolved query column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared affinity.
    pub column_type: ColumnType,
    /// Column flags.
    pub options: ColumnOptions,
}
