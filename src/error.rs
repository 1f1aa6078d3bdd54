//! Crate-wide error conventions.
//!
//! Internal plumbing (socket binding, lockfile I/O, config parsing) returns
//! `anyhow::Result`, matching the rest of this crate. The control client is
//! different: callers branch on *which* thing went wrong (no such command,
//! wrong arg count, a timed-out socket...) so it reports outcomes through the
//! flat [`ControlResult`] code instead of an `Error` impl.

use std::fmt;

/// Outcome of a control-client request, mirroring the response codes a
/// PSHELL server can return plus the client-local failure modes (a reply
/// never arrived, the socket selects failed, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlResult {
    CommandSuccess,
    CommandNotFound,
    CommandInvalidArgCount,
    SocketSendFailure,
    SocketSelectFailure,
    SocketReceiveFailure,
    SocketTimeout,
    SocketNotConnected,
}

impl ControlResult {
    /// Numeric wire value, kept in sync with the server-side response codes.
    pub const fn code(self) -> i32 {
        match self {
            ControlResult::CommandSuccess => 0,
            ControlResult::CommandNotFound => 1,
            ControlResult::CommandInvalidArgCount => 2,
            ControlResult::SocketSendFailure => 3,
            ControlResult::SocketSelectFailure => 4,
            ControlResult::SocketReceiveFailure => 5,
            ControlResult::SocketTimeout => 6,
            ControlResult::SocketNotConnected => 7,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            0 => ControlResult::CommandSuccess,
            1 => ControlResult::CommandNotFound,
            2 => ControlResult::CommandInvalidArgCount,
            3 => ControlResult::SocketSendFailure,
            4 => ControlResult::SocketSelectFailure,
            5 => ControlResult::SocketReceiveFailure,
            6 => ControlResult::SocketTimeout,
            7 => ControlResult::SocketNotConnected,
            _ => return None,
        })
    }

    /// Human-readable description, same wording as the upstream response table.
    pub fn as_str(self) -> &'static str {
        match self {
            ControlResult::CommandSuccess => "commandSuccess",
            ControlResult::CommandNotFound => "commandNotFound",
            ControlResult::CommandInvalidArgCount => "commandInvalidArgCount",
            ControlResult::SocketSendFailure => "socketSendFailure",
            ControlResult::SocketSelectFailure => "socketSelectFailure",
            ControlResult::SocketReceiveFailure => "socketReceiveFailure",
            ControlResult::SocketTimeout => "socketTimeout",
            ControlResult::SocketNotConnected => "socketNotConnected",
        }
    }
}

impl fmt::Display for ControlResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Equivalent of `PshellControl.py`'s `getResponseString`.
pub fn get_response_string(result: ControlResult) -> &'static str {
    result.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_code() {
        for result in [
            ControlResult::CommandSuccess,
            ControlResult::CommandNotFound,
            ControlResult::CommandInvalidArgCount,
            ControlResult::SocketSendFailure,
            ControlResult::SocketSelectFailure,
            ControlResult::SocketReceiveFailure,
            ControlResult::SocketTimeout,
            ControlResult::SocketNotConnected,
        ] {
            assert_eq!(ControlResult::from_code(result.code()), Some(result));
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(ControlResult::from_code(99), None);
    }
}
