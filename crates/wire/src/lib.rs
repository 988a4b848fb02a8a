// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! IPC protocol for `procd` <-> `procdctl` communication.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload. See
//! spec §4.5.

mod request;
mod response;
mod wire;

pub use request::Request;
pub use response::{ErrorCode, ProcessStatus, ReloadDiff, Response};
pub use wire::{decode, encode, read_message, read_request, write_message, write_response};
pub use wire::{ProtocolError, MAX_MESSAGE_BYTES};
