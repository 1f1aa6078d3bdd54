//! Verifies the control client's late-reply discard discipline (spec
//! scenario 6): a reply for an older sequence number that arrives after
//! its own request already timed out must never be mistaken for the
//! reply to a newer request.

use pshell::control::ControlClient;
use pshell::error::ControlResult;
use pshell::message::{Message, MsgType};
use std::time::Duration;
use tokio::net::UdpSocket;

#[tokio::test]
async fn stale_reply_is_discarded_not_surfaced_to_next_request() {
    // A bare UDP socket standing in for the PSHELL server, so the test can
    // control exactly when (and for which seqNum) a reply is sent.
    let fake_server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let fake_server_addr = fake_server.local_addr().unwrap();

    let mut client = ControlClient::new();
    let sid = client
        .connect_udp("fake", "fake", fake_server_addr, Duration::from_millis(50))
        .await
        .unwrap();

    // First request (seqNum=1): let it time out without any reply at all.
    let result = client.send_command3(sid, "noop").await.unwrap();
    assert_eq!(result.0, ControlResult::SocketTimeout);

    // Capture that request so we know the client's source address, then
    // reply to it *late*, tagged with the stale seqNum=1, well after the
    // client has already moved on.
    let mut buf = [0u8; 512];
    let (n, client_addr) = fake_server.recv_from(&mut buf).await.unwrap();
    let stale_request = Message::unpack(&buf[..n]).unwrap();
    assert_eq!(stale_request.seq_num, 1);
    let stale_reply = Message::new(MsgType::COMMAND_COMPLETE, stale_request.seq_num, "stale payload");
    fake_server.send_to(&stale_reply.pack(), client_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Second request (seqNum=2): the stale seqNum=1 reply above is sitting
    // in the client's socket buffer. The client must discard it (seqNum 1
    // < sent 2) and keep waiting, ultimately timing out cleanly rather than
    // surfacing "stale payload".
    let result = client.send_command3(sid, "noop").await.unwrap();
    assert_eq!(result.0, ControlResult::SocketTimeout);
    assert_ne!(result.1, "stale payload");
}
