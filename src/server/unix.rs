//! UNIX datagram transport: same request/reply shape as UDP, but bound at a
//! path under the coordination directory rather than a host/port, with a
//! suffix-retry dance when the requested server name is already taken.

use super::{dispatch_datagram, Server};
use crate::coordination::{self, Lockfile};
use crate::message::{Message, HEADER_SIZE};
use crate::sink::OutputSink;
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::UnixDatagram;
use tracing::{info, warn};

const MAX_NAME_SUFFIX: u32 = 1000;

/// Binds `<coord-dir>/<serverName>`, appending `1`, `2`, ... to the name on
/// a collision with a still-live owner (detected via lockfile), up to
/// [`MAX_NAME_SUFFIX`] attempts. Returns the bound socket, its lockfile, the
/// socket path, and the effective (possibly suffixed) server name.
async fn bind_retry(server: &Server) -> Result<(UnixDatagram, Lockfile, PathBuf, String)> {
    let dir = coordination::coordination_dir().await?;
    let _ = coordination::reclaim_stale(&dir).await;

    for suffix in 0..MAX_NAME_SUFFIX {
        let candidate_name = if suffix == 0 {
            server.name.clone()
        } else {
            format!("{}{suffix}", server.name)
        };
        let socket_path = dir.join(&candidate_name);
        let lock_path = coordination::unix_server_lock_path(&dir, &candidate_name);
        let Some(lock) = Lockfile::try_acquire(&lock_path).await? else {
            continue;
        };
        if socket_path.exists() {
            let _ = tokio::fs::remove_file(&socket_path).await;
        }
        match UnixDatagram::bind(&socket_path) {
            Ok(socket) => return Ok((socket, lock, socket_path, candidate_name)),
            Err(_) => {
                lock.release().await?;
                continue;
            }
        }
    }
    Err(anyhow!(
        "no free UNIX socket name for '{}' after {MAX_NAME_SUFFIX} attempts",
        server.name
    ))
}

/// Runs the UNIX datagram receive loop. On success this may rename `server`
/// to the suffixed name it actually bound (see [`bind_retry`]); callers
/// that care about the effective name (e.g. to report it) should inspect
/// `server.name` only after this future is polled at least once, or read it
/// back from the caller after the run future resolves on error.
pub async fn run(server: &mut Server) -> Result<()> {
    let (socket, lock, socket_path, effective_name) = bind_retry(server).await?;
    if effective_name != server.name {
        warn!(
            "UNIX server name '{}' already in use, using '{effective_name}' instead",
            server.name
        );
        server.name = effective_name;
    }
    info!("UNIX server '{}' listening on {}", server.name, socket_path.display());
    let socket = Arc::new(socket);

    let mut buf = vec![0u8; HEADER_SIZE + server.payload_size()];
    let run_result: Result<()> = loop {
        let (n, peer_addr) = match socket.recv_from(&mut buf).await {
            Ok(ok) => ok,
            Err(e) => break Err(e).context("receiving UNIX datagram"),
        };
        let Ok(request) = Message::unpack(&buf[..n]) else {
            warn!("discarding malformed UNIX datagram");
            continue;
        };
        let peer_path = peer_addr.as_pathname().map(|p| p.to_path_buf());
        if request.resp_needed && peer_path.is_none() {
            warn!("UNIX datagram peer has no bound source address; cannot reply");
        }

        // See `udp::run` for why a buffered-flushable sink is only wired
        // up when a reply was actually requested.
        let sink = match (request.resp_needed, &peer_path) {
            (true, Some(peer_path)) => {
                let flush_socket = Arc::clone(&socket);
                let flush_peer = peer_path.clone();
                let flush_msg_type = request.msg_type;
                let flush_seq = request.seq_num;
                OutputSink::buffered_flushable(Box::new(move |s| {
                    let reply = Message::new(flush_msg_type, flush_seq, s).pack();
                    let _ = flush_socket.try_send_to(&reply, &flush_peer);
                }))
            }
            _ => OutputSink::buffered(),
        };
        let reply_msg_type = dispatch_datagram(server, &request, &sink);

        if let (true, Some(peer_path)) = (request.resp_needed, &peer_path) {
            let payload = if request.data_needed { sink.take_buffer() } else { String::new() };
            let reply = Message::new(reply_msg_type, request.seq_num, payload);
            if let Err(e) = socket.send_to(&reply.pack(), peer_path).await {
                warn!("failed to send UNIX reply to {}: {e}", peer_path.display());
            }
        }
    };

    let _ = tokio::fs::remove_file(&socket_path).await;
    if let Err(e) = lock.release().await {
        warn!("failed releasing UNIX server lockfile: {e}");
    }
    run_result
}
