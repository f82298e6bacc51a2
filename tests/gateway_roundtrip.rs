//! Socket round trips against a fake gateway
//!
//! The gateway side is scripted on a local listener and speaks just enough
//! of the framed protocol to drive one session.

use std::collections::VecDeque;
use std::time::Duration;

use order_book::wire::frame::{encode_fields, take_frame, API_PREFIX};
use order_book::{
    Action, BrokerSession, Contract, HeapSegment, Order, OrderCommand, OrderStatus, OrderStore,
    OrderType, SessionConfig, SessionError, TwsClient, TwsConfig, WireError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

// =============================================================================
// Fake gateway
// =============================================================================

async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> Vec<String> {
    loop {
        if let Some(fields) = take_frame(buf).unwrap() {
            return fields;
        }
        let n = stream.read_buf(buf).await.unwrap();
        assert!(n > 0, "client closed mid-frame");
    }
}

/// Accepts one client and answers the handshake with `server_version`.
/// Returns the socket, leftover bytes and the START_API message.
async fn accept(
    listener: &TcpListener,
    server_version: &str,
) -> (TcpStream, Vec<u8>, Option<Vec<String>>) {
    let (mut stream, _) = listener.accept().await.unwrap();

    let mut prefix = [0u8; 4];
    stream.read_exact(&mut prefix).await.unwrap();
    assert_eq!(&prefix, API_PREFIX);

    let mut buf = Vec::new();
    let versions = read_frame(&mut stream, &mut buf).await;
    assert_eq!(versions, vec!["v100..151".to_string()]);

    stream
        .write_all(&encode_fields(&[server_version, "20261017 10:00:00 EST"]))
        .await
        .unwrap();

    // A rejected client hangs up instead of starting the API.
    let mut start_api = None;
    if let Some(fields) = take_frame(&mut buf).unwrap() {
        start_api = Some(fields);
    } else if stream.read_buf(&mut buf).await.unwrap() > 0 {
        start_api = Some(read_frame(&mut stream, &mut buf).await);
    }
    (stream, buf, start_api)
}

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn session(
    name: &str,
    commands: VecDeque<OrderCommand>,
) -> BrokerSession<TwsClient, VecDeque<OrderCommand>, HeapSegment> {
    HeapSegment::remove(name);
    let store = OrderStore::open(name).unwrap();
    let client =
        TwsClient::with_config(TwsConfig::default().with_connect_timeout(Duration::from_secs(5)));
    BrokerSession::new(client, commands, store)
        .with_config(SessionConfig::default().with_poll_timeout(Duration::from_millis(20)))
}

fn ibm_limit() -> OrderCommand {
    OrderCommand::place(
        Order {
            account: "ACC1".to_string(),
            action: Action::Buy,
            total_quantity: 1000,
            order_type: OrderType::Limit,
            lmt_price: 0.01,
            ..Default::default()
        },
        Contract::stock("IBM", "ARCA"),
    )
}

async fn within<T>(fut: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(10), fut)
        .await
        .expect("timed out")
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn test_place_and_fill_over_socket() {
    let (listener, port) = listen().await;

    let gateway: JoinHandle<Vec<Vec<String>>> = tokio::spawn(async move {
        let (mut stream, mut buf, start_api) = accept(&listener, "151").await;
        let start_api = start_api.expect("client started the API");
        assert_eq!(start_api[..3], ["71", "2", "7"]);

        stream.write_all(&encode_fields(&["9", "1", "42"])).await.unwrap();

        let place = read_frame(&mut stream, &mut buf).await;
        let req_ids = read_frame(&mut stream, &mut buf).await;

        stream
            .write_all(&encode_fields(&[
                "3", "42", "Filled", "1000", "0", "0.01", "1", "0", "0.01", "7", "",
            ]))
            .await
            .unwrap();
        stream
            .write_all(&encode_fields(&["4", "2", "-1", "1100", "Connectivity lost"]))
            .await
            .unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        vec![place, req_ids]
    });

    let session = session("roundtrip-fill", VecDeque::from([ibm_limit()]));
    let handle = within(session.connect("127.0.0.1", port, 7)).await.unwrap();
    let session = within(handle.run()).await.unwrap();

    let received = within(gateway).await.unwrap();
    let place = &received[0];
    assert_eq!(place[0], "3");
    assert_eq!(place[1], "42");
    assert_eq!(place[3], "IBM");
    assert!(place.iter().any(|f| f == "LMT"));
    assert_eq!(place.last().map(String::as_str), Some("ACC1"));
    assert_eq!(received[1], ["8", "1", "1"]);

    assert!(!session.is_connected());
    assert_eq!(session.client().server_version(), 151);
    let record = &session.store().retrieve_by_id(42).unwrap()[0];
    assert_eq!(record.status, OrderStatus::Filled);
    let command = record.command().unwrap();
    assert_eq!(command.response.filled, 1000);
    assert_eq!(command.response.client_id, 7);

    let stats = session.stats();
    assert_eq!(stats.placed, 1);
    assert_eq!(stats.status_updates, 1);
    assert_eq!(stats.refills_requested, 1);
}

#[tokio::test]
async fn test_socket_close_ends_session() {
    let (listener, port) = listen().await;

    let gateway = tokio::spawn(async move {
        let (mut stream, _, start_api) = accept(&listener, "151").await;
        assert!(start_api.is_some());
        stream.write_all(&encode_fields(&["9", "1", "5"])).await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let session = session("roundtrip-close", VecDeque::new());
    let handle = within(session.connect("127.0.0.1", port, 1)).await.unwrap();
    let session = within(handle.run()).await.unwrap();
    within(gateway).await.unwrap();

    assert!(!session.is_connected());
    assert_eq!(session.stats().ids_received, 1);
    assert_eq!(session.ids().len(), 1);
}

#[tokio::test]
async fn test_old_server_is_rejected() {
    let (listener, port) = listen().await;

    let gateway = tokio::spawn(async move {
        let (_stream, _, start_api) = accept(&listener, "99").await;
        assert!(start_api.is_none());
    });

    let session = session("roundtrip-old", VecDeque::new());
    let err = match within(session.connect("127.0.0.1", port, 1)).await {
        Ok(_) => panic!("handshake should fail"),
        Err(e) => e,
    };
    assert!(matches!(
        err,
        SessionError::Connection {
            source: WireError::Handshake(_),
            ..
        }
    ));
    within(gateway).await.unwrap();
}
