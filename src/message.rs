//! Wire message: the fixed 8-byte header + UTF-8 payload every PSHELL
//! transport carries.
//!
//! Layout (all integer fields big-endian):
//!
//! ```text
//! offset  size  field
//! 0       1     msgType
//! 1       1     respNeeded (0/1)
//! 2       1     dataNeeded (0/1)
//! 3       1     pad
//! 4       4     seqNum (u32, big-endian)
//! 8       N     payload (UTF-8, not NUL-terminated)
//! ```

use anyhow::{anyhow, Result};

/// Header size in bytes, fixed regardless of payload length.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size (64KiB), overridable at runtime; see
/// [`crate::server::Server::set_payload_size`] and the control client's
/// `query_payload_size`. A legacy 4KiB variant exists in older deployments
/// (§9's open question); this crate exposes the cap as a parameter rather
/// than hard-coding either historical constant.
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024 * 64;

/// Legacy payload size some older PSHELL deployments used.
pub const LEGACY_PAYLOAD_SIZE: usize = 1024 * 4;

/// A single `msgType` wire code, carried as a raw byte.
///
/// PSHELL's wire format intentionally overloads the low codes: `0`, `1`,
/// and `2` name a *query* when the message is a request and a *result
/// status* when it's the matching reply (see spec §4.A/§6). A single
/// numeric value therefore has two names depending on which side of a
/// request/reply pair you're looking at. Rather than forcing one Rust enum
/// variant to pick a single name for a value that means two different
/// things, [`MsgType`] is a thin wrapper around the byte with one constant
/// per name; disambiguation is the caller's job, exactly as the design
/// notes prescribe — server code only ever matches against the request
/// names, client/reply-handling code only ever matches against the reply
/// names, since each call site already knows which side of the exchange
/// it's on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MsgType(pub u8);

impl MsgType {
    /// Reply: dispatch succeeded with no reported error. Historically also
    /// reserved as a request code, though no request is ever sent with it.
    pub const COMMAND_SUCCESS: MsgType = MsgType(0);
    /// Request: "what version are you running?"
    pub const QUERY_VERSION: MsgType = MsgType(1);
    /// Reply: the command token didn't match (or ambiguously matched)
    /// anything in the registry.
    pub const COMMAND_NOT_FOUND: MsgType = MsgType(1);
    /// Request: "what's your current max payload size?"
    pub const QUERY_PAYLOAD_SIZE: MsgType = MsgType(2);
    /// Reply: the command matched, but argc fell outside [minArgs, maxArgs].
    pub const COMMAND_INVALID_ARG_COUNT: MsgType = MsgType(2);
    /// Request: "what's your server name?"
    pub const QUERY_NAME: MsgType = MsgType(3);
    /// Request: human `name  -  description` command listing.
    pub const QUERY_COMMANDS1: MsgType = MsgType(4);
    /// Request: slash-separated command names, for TAB-completion seeding.
    pub const QUERY_COMMANDS2: MsgType = MsgType(5);
    /// Request: ask the server to adopt a new max payload size.
    pub const UPDATE_PAYLOAD_SIZE: MsgType = MsgType(6);
    /// Request: an ordinary (non-query) command line, sent by an
    /// interactive TCP/LOCAL session rather than the control client.
    pub const USER_COMMAND: MsgType = MsgType(7);
    /// Reply: dispatch ran to completion (the normal-success reply code;
    /// see spec §4.E step 3 — this is what's actually sent back, not
    /// `COMMAND_SUCCESS`).
    pub const COMMAND_COMPLETE: MsgType = MsgType(8);
    /// Request: "what's your welcome banner?"
    pub const QUERY_BANNER: MsgType = MsgType(9);
    /// Request: "what's your welcome title?"
    pub const QUERY_TITLE: MsgType = MsgType(10);
    /// Request: "what's your prompt string?"
    pub const QUERY_PROMPT: MsgType = MsgType(11);
    /// Request: a control-client RPC command.
    pub const CONTROL_COMMAND: MsgType = MsgType(12);

    /// True if `code` names one of the 13 codes this wire format defines
    /// (0 through 12 inclusive).
    pub fn is_known(self) -> bool {
        self.0 <= 12
    }
}

/// A decoded (or not-yet-sent) PSHELL wire message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MsgType,
    pub resp_needed: bool,
    pub data_needed: bool,
    pub seq_num: u32,
    pub payload: String,
}

impl Message {
    pub fn new(msg_type: MsgType, seq_num: u32, payload: impl Into<String>) -> Self {
        Message {
            msg_type,
            resp_needed: false,
            data_needed: false,
            seq_num,
            payload: payload.into(),
        }
    }

    pub fn with_resp_needed(mut self, resp_needed: bool) -> Self {
        self.resp_needed = resp_needed;
        self
    }

    pub fn with_data_needed(mut self, data_needed: bool) -> Self {
        self.data_needed = data_needed;
        self
    }

    /// Packs the message into its wire representation.
    pub fn pack(&self) -> Vec<u8> {
        let payload_bytes = self.payload.as_bytes();
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_bytes.len());
        buf.push(self.msg_type.0);
        buf.push(self.resp_needed as u8);
        buf.push(self.data_needed as u8);
        buf.push(0); // pad
        buf.extend_from_slice(&self.seq_num.to_be_bytes());
        buf.extend_from_slice(payload_bytes);
        buf
    }

    /// Unpacks a message from its wire representation.
    pub fn unpack(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(anyhow!(
                "message too short: got {} bytes, need at least {}",
                bytes.len(),
                HEADER_SIZE
            ));
        }
        let msg_type = MsgType(bytes[0]);
        if !msg_type.is_known() {
            return Err(anyhow!("unknown msgType code {}", bytes[0]));
        }
        let resp_needed = bytes[1] != 0;
        let data_needed = bytes[2] != 0;
        let seq_num = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let payload = String::from_utf8(bytes[HEADER_SIZE..].to_vec())
            .map_err(|e| anyhow!("payload is not valid UTF-8: {e}"))?;
        Ok(Message {
            msg_type,
            resp_needed,
            data_needed,
            seq_num,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let msg = Message::new(MsgType::USER_COMMAND, 42, "hello world")
            .with_resp_needed(true)
            .with_data_needed(true);
        let packed = msg.pack();
        assert_eq!(packed.len(), HEADER_SIZE + "hello world".len());
        let unpacked = Message::unpack(&packed).unwrap();
        assert_eq!(msg, unpacked);
    }

    #[test]
    fn seq_num_is_big_endian() {
        let msg = Message::new(MsgType::QUERY_VERSION, 0x0102_0304, "");
        let packed = msg.pack();
        assert_eq!(&packed[4..8], &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn rejects_short_buffers() {
        assert!(Message::unpack(&[0u8; 3]).is_err());
    }

    #[test]
    fn rejects_unknown_msg_type() {
        let mut bytes = vec![255u8, 0, 0, 0, 0, 0, 0, 0];
        bytes.extend_from_slice(b"x");
        assert!(Message::unpack(&bytes).is_err());
    }

    #[test]
    fn empty_payload_round_trips() {
        let msg = Message::new(MsgType::CONTROL_COMMAND, 1, "");
        let packed = msg.pack();
        assert_eq!(packed.len(), HEADER_SIZE);
        assert_eq!(Message::unpack(&packed).unwrap(), msg);
    }

    #[test]
    fn codes_match_wire_specification() {
        assert_eq!(MsgType::COMMAND_SUCCESS.0, 0);
        assert_eq!(MsgType::QUERY_VERSION.0, 1);
        assert_eq!(MsgType::COMMAND_NOT_FOUND.0, 1);
        assert_eq!(MsgType::QUERY_PAYLOAD_SIZE.0, 2);
        assert_eq!(MsgType::COMMAND_INVALID_ARG_COUNT.0, 2);
        assert_eq!(MsgType::QUERY_NAME.0, 3);
        assert_eq!(MsgType::QUERY_COMMANDS1.0, 4);
        assert_eq!(MsgType::QUERY_COMMANDS2.0, 5);
        assert_eq!(MsgType::UPDATE_PAYLOAD_SIZE.0, 6);
        assert_eq!(MsgType::USER_COMMAND.0, 7);
        assert_eq!(MsgType::COMMAND_COMPLETE.0, 8);
        assert_eq!(MsgType::QUERY_BANNER.0, 9);
        assert_eq!(MsgType::QUERY_TITLE.0, 10);
        assert_eq!(MsgType::QUERY_PROMPT.0, 11);
        assert_eq!(MsgType::CONTROL_COMMAND.0, 12);
    }
}
