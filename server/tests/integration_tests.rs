//! Integration tests for the chat server session layer
//!
//! These tests drive a real server bound to an ephemeral port, speaking the
//! wire protocol byte-for-byte over real TCP streams. The operator console
//! is injected through an in-memory pipe so shutdown can be exercised too.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use parley_server::network::Server;

/// Upper bound on any single wire interaction.
const TICK: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    console: DuplexStream,
    operator_log: mpsc::UnboundedReceiver<Vec<u8>>,
    handle: JoinHandle<std::io::Result<()>>,
}

async fn start_server() -> TestServer {
    let mut server = Server::bind(0).await.expect("bind");
    let addr = server.local_addr().expect("local addr");
    let operator_log = server.capture_operator_log();

    let (console, console_rx) = tokio::io::duplex(256);
    let handle = tokio::spawn(async move {
        let lines = BufReader::new(console_rx).lines();
        server.run_with_console(lines).await
    });

    TestServer {
        addr,
        console,
        operator_log,
        handle,
    }
}

/// Performs the raw-byte handshake and asserts acceptance.
async fn connect(addr: SocketAddr, name: &str) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.expect("connect");
    stream
        .write_all(format!("{}\n", name).as_bytes())
        .await
        .expect("write name");
    assert_eq!(read_status(&mut stream).await, b'1', "handshake refused");
    stream
}

/// Reads one raw (unframed) byte.
async fn read_status(stream: &mut TcpStream) -> u8 {
    let mut byte = [0u8; 1];
    timeout(TICK, stream.read_exact(&mut byte))
        .await
        .expect("timed out waiting for a status byte")
        .expect("read status byte");
    byte[0]
}

/// Reads one frame, excluding the delimiter.
async fn read_line(stream: &mut TcpStream) -> Vec<u8> {
    let mut line = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        timeout(TICK, stream.read_exact(&mut byte))
            .await
            .expect("timed out waiting for a frame")
            .expect("read frame");
        if byte[0] == b'\n' {
            return line;
        }
        line.push(byte[0]);
    }
}

/// Collects operator-log lines until `fence` is announced. Returns every
/// line read, fence included. The loop task emits lines in event order,
/// so a line known to come later is a fence for everything before it.
async fn read_log_until(log: &mut mpsc::UnboundedReceiver<Vec<u8>>, fence: &str) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let chunk = timeout(TICK, log.recv())
            .await
            .expect("timed out waiting for an operator line")
            .expect("operator log closed");
        let line =
            String::from_utf8_lossy(chunk.strip_suffix(b"\n").unwrap_or(&chunk)).into_owned();
        let done = line == fence;
        lines.push(line);
        if done {
            return lines;
        }
    }
}

/// HANDSHAKE AND SESSION LIFECYCLE
mod lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn join_then_clean_exit() {
        let mut server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;

        alice.write_all(b"3\n").await.unwrap();
        assert_eq!(read_status(&mut alice).await, b'1');

        // After the ack the server closes its side of the stream.
        let mut rest = Vec::new();
        timeout(TICK, alice.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());

        let lines =
            read_log_until(&mut server.operator_log, "alice: Unregistered successfully.").await;
        assert_eq!(
            lines,
            ["alice connected.", "alice: Unregistered successfully."]
        );
    }

    #[tokio::test]
    async fn duplicate_name_is_refused() {
        let server = start_server().await;
        let _bob = connect(server.addr, "bob").await;

        let mut imposter = TcpStream::connect(server.addr).await.unwrap();
        imposter.write_all(b"bob\n").await.unwrap();
        assert_eq!(read_status(&mut imposter).await, b'2');
    }

    #[tokio::test]
    async fn a_refused_connect_is_logged_exactly_once() {
        let mut server = start_server().await;
        let _bob = connect(server.addr, "bob").await;

        let mut imposter = TcpStream::connect(server.addr).await.unwrap();
        imposter.write_all(b"bob\n").await.unwrap();
        assert_eq!(read_status(&mut imposter).await, b'2');

        // A later join fences the log: every earlier line has been
        // announced by the time it shows up.
        let _carol = connect(server.addr, "carol").await;
        let lines = read_log_until(&mut server.operator_log, "carol connected.").await;
        assert_eq!(
            lines
                .iter()
                .filter(|line| line.as_str() == "bob failed to connect.")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn handshake_enforces_the_name_rule() {
        let server = start_server().await;

        for bad in [
            "x".repeat(31),
            "not alnum".to_owned(),
            "dash-ed".to_owned(),
        ] {
            let mut stream = TcpStream::connect(server.addr).await.unwrap();
            stream
                .write_all(format!("{}\n", bad).as_bytes())
                .await
                .unwrap();
            assert_eq!(read_status(&mut stream).await, b'0', "accepted {:?}", bad);
        }

        let _one = connect(server.addr, "x").await;
        let _thirty = connect(server.addr, &"y".repeat(30)).await;
    }

    #[tokio::test]
    async fn a_name_frees_after_clean_exit() {
        let server = start_server().await;

        let mut alice = connect(server.addr, "alice").await;
        alice.write_all(b"3\n").await.unwrap();
        assert_eq!(read_status(&mut alice).await, b'1');

        // The release happened before the ack was written, so a reconnect
        // under the same name succeeds immediately.
        let _alice_again = connect(server.addr, "alice").await;
    }
}

/// UNICAST AND ROSTER QUERIES
mod messaging_tests {
    use super::*;

    #[tokio::test]
    async fn unicast_reaches_exactly_the_recipient() {
        let mut server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;

        alice.write_all(b"1bob hello world\n").await.unwrap();

        assert_eq!(read_line(&mut bob).await, b"alice: hello world");
        assert_eq!(read_line(&mut alice).await, b"1Sent successfully.");

        read_log_until(
            &mut server.operator_log,
            "alice: \"hello world\" was sent successfully to bob.",
        )
        .await;
    }

    #[tokio::test]
    async fn send_to_self_or_unknown_is_rejected() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;

        alice.write_all(b"1alice myself\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"1ERROR: failed to send.");

        alice.write_all(b"1nobody hi\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"1ERROR: failed to send.");
    }

    #[tokio::test]
    async fn messages_from_one_sender_arrive_in_order() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;

        alice
            .write_all(b"1bob one\n1bob two\n1bob three\n")
            .await
            .unwrap();

        assert_eq!(read_line(&mut bob).await, b"alice: one");
        assert_eq!(read_line(&mut bob).await, b"alice: two");
        assert_eq!(read_line(&mut bob).await, b"alice: three");
        for _ in 0..3 {
            assert_eq!(read_line(&mut alice).await, b"1Sent successfully.");
        }
    }

    #[tokio::test]
    async fn arbitrary_bytes_survive_relay_verbatim() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;

        let text: Vec<u8> = (0u8..=255).filter(|&b| b != b'\n').collect();
        let mut request = b"1bob ".to_vec();
        request.extend_from_slice(&text);
        request.push(b'\n');
        alice.write_all(&request).await.unwrap();

        let mut expected = b"alice: ".to_vec();
        expected.extend_from_slice(&text);
        assert_eq!(read_line(&mut bob).await, expected);
        assert_eq!(read_line(&mut alice).await, b"1Sent successfully.");
    }

    #[tokio::test]
    async fn who_lists_clients_sorted() {
        let mut server = start_server().await;
        let _charlie = connect(server.addr, "charlie").await;
        let mut alice = connect(server.addr, "alice").await;
        let _bob = connect(server.addr, "bob").await;

        alice.write_all(b"2\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"2alice,bob,charlie.");

        read_log_until(
            &mut server.operator_log,
            "alice: Requests the currently connected client names.",
        )
        .await;
    }

    #[tokio::test]
    async fn who_never_lists_a_departed_client() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;

        bob.write_all(b"3\n").await.unwrap();
        assert_eq!(read_status(&mut bob).await, b'1');

        alice.write_all(b"2\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"2alice.");
    }

    #[tokio::test]
    async fn malformed_and_unknown_frames_leave_the_session_alive() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;

        // Unknown tag: dropped without a reply.
        alice.write_all(b"9whatever\n").await.unwrap();
        // Send without a destination separator: closest negative reply.
        alice.write_all(b"1bob\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"1ERROR: failed to send.");

        // The session still works.
        alice.write_all(b"2\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"2alice.");
    }
}

/// GROUP CREATION AND MULTICAST
mod group_tests {
    use super::*;

    #[tokio::test]
    async fn multicast_skips_the_sender_and_notifies_only_the_creator() {
        let mut server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;
        let mut carol = connect(server.addr, "carol").await;

        alice.write_all(b"0team bob,carol\n").await.unwrap();
        assert_eq!(
            read_line(&mut alice).await,
            b"0Group \"team\" was created successfully."
        );
        read_log_until(
            &mut server.operator_log,
            "Group \"team\" was created successfully.",
        )
        .await;

        bob.write_all(b"1team hi\n").await.unwrap();
        assert_eq!(read_line(&mut bob).await, b"1Sent successfully.");

        // The relay is the first frame the other members ever receive:
        // group creation was announced to the creator alone.
        assert_eq!(read_line(&mut alice).await, b"bob: hi");
        assert_eq!(read_line(&mut carol).await, b"bob: hi");
    }

    #[tokio::test]
    async fn a_group_of_creator_plus_one_is_the_minimum() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let _bob = connect(server.addr, "bob").await;

        // Creator listing only themselves: refused.
        alice.write_all(b"0solo alice\n").await.unwrap();
        assert_eq!(
            read_line(&mut alice).await,
            b"0ERROR: failed to create group \"solo\"."
        );

        // Creator plus one other: accepted.
        alice.write_all(b"0duo bob\n").await.unwrap();
        assert_eq!(
            read_line(&mut alice).await,
            b"0Group \"duo\" was created successfully."
        );
    }

    #[tokio::test]
    async fn create_group_rejects_offline_members_and_taken_names() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;

        alice.write_all(b"0team bob,ghost\n").await.unwrap();
        assert_eq!(
            read_line(&mut alice).await,
            b"0ERROR: failed to create group \"team\"."
        );

        alice.write_all(b"0team bob\n").await.unwrap();
        assert_eq!(
            read_line(&mut alice).await,
            b"0Group \"team\" was created successfully."
        );

        // The group name now blocks clients and groups alike.
        bob.write_all(b"0team alice\n").await.unwrap();
        assert_eq!(
            read_line(&mut bob).await,
            b"0ERROR: failed to create group \"team\"."
        );
        let mut squatter = TcpStream::connect(server.addr).await.unwrap();
        squatter.write_all(b"team\n").await.unwrap();
        assert_eq!(read_status(&mut squatter).await, b'2');
    }

    #[tokio::test]
    async fn a_non_member_cannot_send_to_a_group() {
        let server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let _bob = connect(server.addr, "bob").await;
        let mut dave = connect(server.addr, "dave").await;

        alice.write_all(b"0team bob\n").await.unwrap();
        assert_eq!(
            read_line(&mut alice).await,
            b"0Group \"team\" was created successfully."
        );

        dave.write_all(b"1team hi\n").await.unwrap();
        assert_eq!(read_line(&mut dave).await, b"1ERROR: failed to send.");
    }

    #[tokio::test]
    async fn losing_a_member_below_two_dissolves_the_group() {
        let mut server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let bob = connect(server.addr, "bob").await;

        alice.write_all(b"0team bob\n").await.unwrap();
        assert_eq!(
            read_line(&mut alice).await,
            b"0Group \"team\" was created successfully."
        );

        // Bob's stream drops without a logout request; the dirty leave is
        // fully processed once its announcement is logged.
        drop(bob);
        read_log_until(
            &mut server.operator_log,
            "bob: Unregistered after connection error.",
        )
        .await;

        // The name is free again and the two-member group was dissolved.
        let _bob_again = connect(server.addr, "bob").await;
        alice.write_all(b"1team hi\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"1ERROR: failed to send.");
    }
}

/// OPERATOR CONSOLE
mod operator_tests {
    use super::*;

    #[tokio::test]
    async fn exit_notifies_clients_and_stops_the_server() {
        let mut server = start_server().await;
        let mut alice = connect(server.addr, "alice").await;
        let mut bob = connect(server.addr, "bob").await;

        server.console.write_all(b"EXIT\n").await.unwrap();

        assert_eq!(read_line(&mut alice).await, b"4");
        assert_eq!(read_line(&mut bob).await, b"4");

        // Both streams are closed after the notification.
        let mut rest = Vec::new();
        timeout(TICK, alice.read_to_end(&mut rest))
            .await
            .unwrap()
            .unwrap();
        assert!(rest.is_empty());

        let result = timeout(TICK, server.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked");
        assert!(result.is_ok());

        // The server is gone, so the capture channel is closed; what was
        // received is the complete operator output. The final chunk is the
        // shutdown message with no trailing newline.
        let mut chunks = Vec::new();
        while let Some(chunk) = server.operator_log.recv().await {
            chunks.push(chunk);
        }
        assert_eq!(chunks.first().expect("no operator output"), b"alice connected.\n");
        assert_eq!(
            chunks.last().unwrap(),
            b"EXIT command is typed: server is shutting down"
        );
        let output: Vec<u8> = chunks.concat();
        assert!(!output.ends_with(b"\n"));
    }

    #[tokio::test]
    async fn other_operator_input_is_ignored() {
        let mut server = start_server().await;
        server.console.write_all(b"exit\nHELP\n\n").await.unwrap();

        // The server is still accepting and serving.
        let mut alice = connect(server.addr, "alice").await;
        alice.write_all(b"2\n").await.unwrap();
        assert_eq!(read_line(&mut alice).await, b"2alice.");
    }
}
