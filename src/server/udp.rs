//! UDP transport: one datagram in, one reply datagram out, no session state
//! between requests. Used both for ordinary `userCommand` dispatch and for
//! `controlCommand`/introspection-query traffic from a
//! [`crate::control::ControlClient`].

use super::{dispatch_datagram, Server};
use crate::coordination::{self, Lockfile};
use crate::message::{Message, HEADER_SIZE};
use crate::sink::OutputSink;
use anyhow::{anyhow, Context, Result};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Resolves the `startServer` host syntax: `anyhost` (0.0.0.0), `localhost`
/// (127.0.0.1), `anybcast` (255.255.255.255, broadcast enabled), a subnet
/// broadcast address (`x.y.z.255`, broadcast enabled), or a concrete
/// address. Returns the bind address and whether `SO_BROADCAST` is needed.
fn resolve_host(host: &str) -> Result<(IpAddr, bool)> {
    match host {
        "anyhost" => Ok((IpAddr::V4(Ipv4Addr::UNSPECIFIED), false)),
        "localhost" => Ok((IpAddr::V4(Ipv4Addr::LOCALHOST), false)),
        "anybcast" => Ok((IpAddr::V4(Ipv4Addr::BROADCAST), true)),
        other => {
            let ip: IpAddr = other.parse().with_context(|| format!("invalid bind host '{other}'"))?;
            let is_broadcast = matches!(ip, IpAddr::V4(v4) if v4.octets()[3] == 255);
            Ok((ip, is_broadcast))
        }
    }
}

/// Binds `port`, walking forward through up to 1000 candidate ports on a
/// conflict, same retry budget as the TCP transport. Each candidate port is
/// additionally guarded by a coordination-directory lockfile so a second
/// server process asking for the same name/port sees it as taken even
/// between this bind and the matching `recv`.
async fn bind_retry(ip: IpAddr, host: &str, port: u16, server: &Server) -> Result<(UdpSocket, Lockfile, u16)> {
    let dir = coordination::coordination_dir().await?;
    let _ = coordination::reclaim_stale(&dir).await;

    for candidate_port in port..port.saturating_add(1000) {
        let lock_path = coordination::inet_server_lock_path(&dir, &server.name, "udp", host, candidate_port);
        let Some(lock) = Lockfile::try_acquire(&lock_path).await? else {
            continue;
        };
        match UdpSocket::bind(SocketAddr::new(ip, candidate_port)).await {
            Ok(socket) => return Ok((socket, lock, candidate_port)),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                lock.release().await?;
                continue;
            }
            Err(e) => return Err(e).context("binding UDP server socket"),
        }
    }
    Err(anyhow!("no free UDP port found starting from {port} after 1000 attempts"))
}

/// Runs the UDP receive loop: bind, then repeatedly receive one datagram,
/// dispatch it, and (if `respNeeded`) reply to the sender.
pub async fn run(server: &mut Server, host: &str, port: u16) -> Result<()> {
    let (ip, needs_broadcast) = resolve_host(host)?;
    let (socket, _lock, bound_port) = bind_retry(ip, host, port, server).await?;
    if needs_broadcast {
        socket.set_broadcast(true).context("enabling SO_BROADCAST")?;
    }
    info!("UDP server '{}' listening on {}:{}", server.name, host, bound_port);
    let socket = Arc::new(socket);

    let mut buf = vec![0u8; HEADER_SIZE + server.payload_size()];
    loop {
        let (n, peer) = socket.recv_from(&mut buf).await.context("receiving UDP datagram")?;
        let Ok(request) = Message::unpack(&buf[..n]) else {
            warn!("discarding malformed UDP datagram from {peer}");
            continue;
        };

        // A mid-dispatch `flush()`/`wheel()`/`march()` call ships whatever
        // has accumulated so far as an early reply datagram — see
        // `OutputSink::buffered_flushable` — so a long-running callback can
        // keep a waiting control client's socket-timeout alive. Only wired
        // up when the requester actually wants a reply.
        let sink = if request.resp_needed {
            let flush_socket = Arc::clone(&socket);
            let flush_msg_type = request.msg_type;
            let flush_seq = request.seq_num;
            OutputSink::buffered_flushable(Box::new(move |s| {
                let reply = Message::new(flush_msg_type, flush_seq, s).pack();
                let _ = flush_socket.try_send_to(&reply, peer);
            }))
        } else {
            OutputSink::buffered()
        };
        let reply_msg_type = dispatch_datagram(server, &request, &sink);

        if request.resp_needed {
            let payload = if request.data_needed { sink.take_buffer() } else { String::new() };
            let reply = Message::new(reply_msg_type, request.seq_num, payload);
            if let Err(e) = socket.send_to(&reply.pack(), peer).await {
                warn!("failed to send UDP reply to {peer}: {e}");
            }
        }
    }
}
