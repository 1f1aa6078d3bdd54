//! End-to-end smoke test for the UDP transport: a registered command
//! dispatches correctly, an invalid arg count is reported, and an
//! ambiguous abbreviation is reported — the three literal scenarios from
//! the wire-protocol spec.

use pshell::control::ControlClient;
use pshell::error::ControlResult;
use pshell::server::{Server, ServerType, Transport, UdpTransport};
use pshell::sink::OutputSink;
use std::time::Duration;

fn spawn_demo_server(port: u16) {
    let mut server = Server::new("udp-demo", ServerType::Udp);
    server
        .add_command(
            "hello",
            "hello [arg ...]",
            "greets the caller",
            0,
            20,
            true,
            Box::new(|args: &[String], sink: &OutputSink| {
                sink.printf("hello command dispatched:");
                for (i, arg) in args.iter().enumerate() {
                    sink.printf(&format!("  argv[{i}]: '{arg}'"));
                }
                Ok(())
            }),
        )
        .unwrap();
    tokio::spawn(async move {
        let _ = UdpTransport {
            host: "localhost".to_string(),
            port,
        }
        .run(&mut server)
        .await;
    });
}

#[tokio::test]
async fn udp_round_trip_dispatch_and_error_paths() {
    let port = 17001;
    spawn_demo_server(port);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut client = ControlClient::new();
    let sid = client
        .connect_udp(
            "udp-demo",
            "udp-demo",
            format!("127.0.0.1:{port}").parse().unwrap(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();

    // Scenario 1: "hello a b" dispatches with both args echoed back.
    let (result, payload) = client.send_command3(sid, "hello a b").await.unwrap();
    assert_eq!(result, ControlResult::CommandSuccess);
    assert!(payload.starts_with("hello command dispatched:\n"));
    assert!(payload.contains("argv[0]: 'a'"));
    assert!(payload.contains("argv[1]: 'b'"));

    // Scenario 2: an unregistered, unambiguous prefix reports not-found.
    let (result, _) = client.send_command3(sid, "nonexistent").await.unwrap();
    assert_eq!(result, ControlResult::CommandNotFound);

    // Scenario 3: "hel" is ambiguous between "hello" and the built-in "help".
    let (result, payload) = client.send_command3(sid, "hel").await.unwrap();
    assert_eq!(result, ControlResult::CommandNotFound);
    assert!(payload.contains("Ambiguous command abbreviation: 'hel'"));
}

#[tokio::test]
async fn udp_introspection_queries_answer_directly() {
    let port = 17011;
    spawn_demo_server(port);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut client = ControlClient::new();
    let sid = client
        .connect_udp(
            "udp-demo2",
            "udp-demo",
            format!("127.0.0.1:{port}").parse().unwrap(),
            Duration::from_millis(500),
        )
        .await
        .unwrap();

    let name = client.extract_name(sid).await.unwrap();
    assert_eq!(name, "udp-demo");

    let version = client.extract_version(sid).await.unwrap();
    assert_eq!(version, "1");

    let commands = client.extract_commands(sid).await.unwrap();
    assert!(commands.contains("hello/"));
}
