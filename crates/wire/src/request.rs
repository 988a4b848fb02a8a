//! Request messages sent from `procdctl` to `procd`. See spec §4.5.

use serde::{Deserialize, Serialize};

/// Request from CLI to daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum Request {
    Status,

    Start {
        name: String,
    },

    Stop {
        name: String,
    },

    Restart {
        name: String,
        #[serde(default)]
        force: bool,
    },

    #[serde(rename = "startgroup")]
    StartGroup {
        name: String,
    },

    #[serde(rename = "stopgroup")]
    StopGroup {
        name: String,
    },

    Reload,
}
