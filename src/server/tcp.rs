//! TCP transport: one interactive telnet-style session at a time. The
//! listening socket is torn down while a session is in progress — a new
//! connection is only accepted once the current one ends — matching the
//! upstream single-session-at-a-time behavior.
//!
//! A session itself is driven synchronously: the line editor, dispatch, and
//! output all happen on a blocking OS thread (via
//! [`tokio::task::block_in_place`]) writing straight through a cloned
//! [`std::net::TcpStream`]. That keeps a command callback's `printf`/
//! `wheel`/`march` calls true immediate writes to the peer, the same as the
//! synchronous upstream server, rather than something buffered behind an
//! async boundary the [`crate::registry::CommandFn`] signature can't cross.

use super::{DispatchOutcome, Server};
use crate::coordination::{self, Lockfile};
use crate::line_editor::{Event, LineEditor, SerialKind, TELNET_NEGOTIATE};
use crate::sink::OutputSink;
use anyhow::{anyhow, Context, Result};
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::TcpListener;
use tracing::{info, warn};

fn resolve_host(host: &str) -> Result<IpAddr> {
    match host {
        "anyhost" => Ok(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        "localhost" => Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)),
        other => other.parse().with_context(|| format!("invalid bind host '{other}'")),
    }
}

async fn bind_retry(ip: IpAddr, host: &str, port: u16, server: &Server) -> Result<(TcpListener, Lockfile, u16)> {
    let dir = coordination::coordination_dir().await?;
    let _ = coordination::reclaim_stale(&dir).await;

    for candidate_port in port..port.saturating_add(1000) {
        let lock_path = coordination::inet_server_lock_path(&dir, &server.name, "tcp", host, candidate_port);
        let Some(lock) = Lockfile::try_acquire(&lock_path).await? else {
            continue;
        };
        match TcpListener::bind(SocketAddr::new(ip, candidate_port)).await {
            Ok(listener) => return Ok((listener, lock, candidate_port)),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                lock.release().await?;
                continue;
            }
            Err(e) => return Err(e).context("binding TCP server socket"),
        }
    }
    Err(anyhow!("no free TCP port found starting from {port} after 1000 attempts"))
}

fn crlf(s: &str) -> String {
    s.replace('\n', "\r\n")
}

/// Runs one accepted session to completion on the calling (blocking)
/// thread, returning `true` if the session ended via the `quit` built-in.
fn serve_session(server: &Server, mut stream: std::net::TcpStream) -> Result<bool> {
    stream.write_all(&TELNET_NEGOTIATE).context("sending telnet negotiation")?;
    let mut discard = [0u8; TELNET_NEGOTIATE.len()];
    let _ = stream.read_exact(&mut discard);

    let mut editor = LineEditor::new(server.prompt().to_string(), SerialKind::Socket);
    editor.set_tab_completions(server.command_names());

    stream
        .write_all(crlf(&server.welcome_banner()).as_bytes())
        .context("writing welcome banner")?;
    stream.write_all(&editor.prompt_bytes()).context("writing prompt")?;

    stream
        .set_read_timeout(server.idle_timeout())
        .context("setting idle-timeout read deadline")?;

    let mut byte = [0u8; 1];
    loop {
        let n = match stream.read(&mut byte) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) => {
                let _ = stream.write_all(editor.idle_timeout_message().as_bytes());
                return Ok(false);
            }
            Err(e) => return Err(e).context("reading TCP session input"),
        };
        if n == 0 {
            return Ok(false);
        }

        let (out, event) = editor.feed(byte[0]);
        if !out.0.is_empty() {
            stream.write_all(&out.0).context("echoing TCP session input")?;
        }

        match event {
            Event::None | Event::Interrupt => {}
            Event::CommandReady(line) => {
                let writer = stream.try_clone().context("cloning TCP stream for session output")?;
                let sink = OutputSink::streaming(Box::new(move |s| {
                    let mut w: &std::net::TcpStream = &writer;
                    let _ = w.write_all(crlf(s).as_bytes());
                }));
                let DispatchOutcome { quit, .. } = server.process_line(&line, &sink, true);
                if quit {
                    return Ok(true);
                }
                stream.write_all(&editor.prompt_bytes()).context("writing prompt")?;
            }
        }
    }
}

/// Runs the TCP accept loop: bind, accept one connection, serve it to
/// completion, rebind and accept the next. Never returns except on a fatal
/// bind/accept error.
pub async fn run(server: &mut Server, host: &str, port: u16) -> Result<()> {
    let ip = resolve_host(host)?;
    loop {
        let (listener, lock, bound_port) = bind_retry(ip, host, port, server).await?;
        info!("TCP server '{}' listening on {}:{}", server.name, host, bound_port);

        let (stream, peer) = listener.accept().await.context("accepting TCP connection")?;
        // Stop accepting new connections while this one is being served.
        drop(listener);
        drop(lock);

        info!("TCP session from {peer} on server '{}'", server.name);
        let std_stream = stream.into_std().context("converting TCP stream to blocking mode")?;
        std_stream.set_nonblocking(false).context("clearing non-blocking mode")?;
        // An interactive line-editing session round-trips one character at a
        // time; Nagle's algorithm would batch those into laggy chunks, so
        // disable it the same way the teacher tunes its own TCP sockets.
        if let Err(e) = socket2::Socket::from(std_stream.try_clone().context("cloning TCP stream for socket options")?).set_nodelay(true) {
            warn!("failed to set TCP_NODELAY on session from {peer}: {e}");
        }

        match tokio::task::block_in_place(|| serve_session(server, std_stream)) {
            Ok(true) => info!("TCP session with {peer} closed by 'quit'"),
            Ok(false) => info!("TCP session with {peer} closed"),
            Err(e) => warn!("TCP session with {peer} ended: {e}"),
        }
    }
}
