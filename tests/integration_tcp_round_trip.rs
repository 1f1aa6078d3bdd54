//! End-to-end smoke test for the TCP transport: telnet negotiation on
//! connect, a dispatched command's output streamed back over the session,
//! and a clean teardown via the built-in `quit` command.

use pshell::server::{Server, ServerType, TcpTransport, Transport};
use pshell::sink::OutputSink;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

fn spawn_demo_server(port: u16) {
    let mut server = Server::new("tcp-demo", ServerType::Tcp);
    server
        .add_command(
            "ping",
            "ping",
            "replies pong",
            0,
            0,
            true,
            Box::new(|_args: &[String], sink: &OutputSink| {
                sink.printf("pong");
                Ok(())
            }),
        )
        .unwrap();
    tokio::spawn(async move {
        let _ = TcpTransport {
            host: "localhost".to_string(),
            port,
        }
        .run(&mut server)
        .await;
    });
}

#[tokio::test]
async fn tcp_session_negotiates_and_dispatches() {
    let port = 17021;
    spawn_demo_server(port);
    tokio::time::sleep(Duration::from_millis(150)).await;

    let stream = tokio::task::spawn_blocking(move || {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        // Telnet IAC negotiation: the server sends 12 bytes immediately.
        let mut negotiation = [0u8; 12];
        stream.read_exact(&mut negotiation).expect("telnet negotiation");
        assert_eq!(negotiation, [0xFF, 0xFB, 0x03, 0xFF, 0xFB, 0x01, 0xFF, 0xFD, 0x03, 0xFF, 0xFD, 0x01]);
        // The server's end of the negotiation expects a reply of the same length.
        stream.write_all(&negotiation).expect("echo negotiation reply");

        // Drain the welcome banner + prompt before sending a command; read
        // until we see the prompt string.
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = stream.read(&mut byte).expect("read banner");
            if n == 0 {
                break;
            }
            buf.push(byte[0]);
            if buf.ends_with(b"PSHELL> ") {
                break;
            }
        }

        stream.write_all(b"ping\r").expect("send command");

        // Read the echoed command plus "pong" response plus a fresh prompt.
        let mut reply = Vec::new();
        loop {
            let n = stream.read(&mut byte).expect("read reply");
            if n == 0 {
                break;
            }
            reply.push(byte[0]);
            if reply.ends_with(b"PSHELL> ") && reply.windows(4).any(|w| w == b"pong") {
                break;
            }
        }
        let reply_text = String::from_utf8_lossy(&reply).to_string();
        assert!(reply_text.contains("pong"), "expected 'pong' in reply: {reply_text:?}");

        stream.write_all(b"quit\r").expect("send quit");
    })
    .await;

    stream.expect("blocking session task panicked");
}
