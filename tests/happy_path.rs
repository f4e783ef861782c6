mod common;

use std::time::Duration;

use common::{mock_transport, read_call_id, Echo};
use devtoxide::dispatcher::Dispatcher;
use devtoxide::session::Session;
use futures::StreamExt;

#[async_std::test]
async fn send_returns_the_response_matching_its_call_id() {
    let (transport, mut mock) = mock_transport();
    let dispatcher = Dispatcher::spawn(transport, 16);
    let session = Session::root(dispatcher, Duration::from_millis(200));

    let handle = async_std::task::spawn({
        let session = session.clone();
        async move { session.send(Echo { value: 42 }).await }
    });

    let id = read_call_id(&mut mock.outbound).await;
    let reply = serde_json::to_vec(&serde_json::json!({"id": id, "result": {"value": 42}})).unwrap();
    mock.inbound.unbounded_send(reply).unwrap();

    let response = handle.await.unwrap();
    assert_eq!(response.value, 42);
}

#[async_std::test]
async fn concurrent_calls_get_distinct_ids_and_their_own_replies() {
    let (transport, mut mock) = mock_transport();
    let dispatcher = Dispatcher::spawn(transport, 16);
    let session = Session::root(dispatcher, Duration::from_millis(200));

    let h1 = async_std::task::spawn({
        let session = session.clone();
        async move { session.send(Echo { value: 1 }).await }
    });
    let h2 = async_std::task::spawn({
        let session = session.clone();
        async move { session.send(Echo { value: 2 }).await }
    });

    let id_a = read_call_id(&mut mock.outbound).await;
    let id_b = read_call_id(&mut mock.outbound).await;
    assert_ne!(id_a, id_b);

    // Reply out of order: id_b's response arrives first.
    mock.inbound
        .unbounded_send(
            serde_json::to_vec(&serde_json::json!({"id": id_b, "result": {"value": 2}})).unwrap(),
        )
        .unwrap();
    mock.inbound
        .unbounded_send(
            serde_json::to_vec(&serde_json::json!({"id": id_a, "result": {"value": 1}})).unwrap(),
        )
        .unwrap();

    assert_eq!(h1.await.unwrap().value, 1);
    assert_eq!(h2.await.unwrap().value, 2);
}

#[async_std::test]
async fn a_wire_error_surfaces_as_a_request_error() {
    let (transport, mut mock) = mock_transport();
    let dispatcher = Dispatcher::spawn(transport, 16);
    let session = Session::root(dispatcher, Duration::from_millis(200));

    let handle = async_std::task::spawn({
        let session = session.clone();
        async move { session.send(Echo { value: 7 }).await }
    });

    let id = read_call_id(&mut mock.outbound).await;
    let reply = serde_json::to_vec(&serde_json::json!({
        "id": id,
        "error": {"code": -32000, "message": "boom"},
    }))
    .unwrap();
    mock.inbound.unbounded_send(reply).unwrap();

    let err = handle.await.unwrap_err();
    assert!(matches!(err, devtoxide::CdpError::Request(_)));
    assert!(err.to_string().contains("boom"));
}

#[async_std::test]
async fn events_are_delivered_only_to_matching_subscriptions() {
    let (transport, mut mock) = mock_transport();
    let dispatcher = Dispatcher::spawn(transport, 16);
    let session = Session::root(dispatcher, Duration::from_millis(200));

    let mut page_events = session.subscribe_raw("Page.*");
    let mut network_events = session.subscribe_raw("Network.*");

    mock.inbound
        .unbounded_send(
            serde_json::to_vec(&serde_json::json!({
                "method": "Page.loadEventFired",
                "params": {"timestamp": 1.0},
            }))
            .unwrap(),
        )
        .unwrap();

    let got = page_events.next().await.unwrap();
    assert_eq!(got.method, "Page.loadEventFired");

    // give the reader task a chance to route the frame before asserting
    // the other stream stayed empty
    async_std::task::sleep(Duration::from_millis(20)).await;
    assert!(futures::poll!(network_events.next()).is_pending());
}
