//! Response messages sent from `procd` to `procdctl`. See spec §4.5.

use serde::{Deserialize, Serialize};

/// One row of a `status` response, in stable (name-sorted) order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessStatus {
    pub name: String,
    pub state: String,
    pub pid: Option<u32>,
    pub uptime_seconds: Option<u64>,
    pub health: Option<String>,
}

/// The result of a `reload`: programs added, removed, and changed-but-not-
/// applied, each sorted by name (spec §4.4 step 3).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReloadDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

/// Error codes from spec §4.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidJson,
    InvalidRequest,
    UnknownCommand,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Response {
    Ok {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        processes: Option<Vec<ProcessStatus>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reload: Option<ReloadDiff>,
    },
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Response::Ok { message: message.into(), processes: None, reload: None }
    }

    pub fn status(processes: Vec<ProcessStatus>) -> Self {
        Response::Ok {
            message: "ok".to_string(),
            processes: Some(processes),
            reload: None,
        }
    }

    pub fn reload(diff: ReloadDiff) -> Self {
        Response::Ok { message: "ok".to_string(), processes: None, reload: Some(diff) }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error { code, message: message.into() }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }
}
