mod common;

use std::time::Duration;

use common::mock_transport;
use devtoxide::dispatcher::Dispatcher;
use devtoxide::session::Session;
use futures::StreamExt;

#[async_std::test]
async fn a_child_session_only_sees_its_own_events() {
    let (transport, mock) = mock_transport();
    let dispatcher = Dispatcher::spawn(transport, 16);
    let root = Session::root(dispatcher, Duration::from_millis(200));
    let child_a = root.new_child("SESSION-A");
    let child_b = root.new_child("SESSION-B");

    let mut root_events = root.subscribe_raw("Target.*");
    let mut a_events = child_a.subscribe_raw("Target.*");
    let mut b_events = child_b.subscribe_raw("Target.*");

    let push = |session_id: Option<&str>| {
        serde_json::to_vec(&serde_json::json!({
            "method": "Target.targetInfoChanged",
            "sessionId": session_id,
            "params": {},
        }))
        .unwrap()
    };

    mock.inbound.unbounded_send(push(Some("SESSION-A"))).unwrap();
    mock.inbound.unbounded_send(push(None)).unwrap();

    let seen_by_a = a_events.next().await.unwrap();
    assert_eq!(seen_by_a.session_id.as_deref(), Some("SESSION-A"));

    let seen_by_root = root_events.next().await.unwrap();
    assert_eq!(seen_by_root.session_id, None);

    async_std::task::sleep(Duration::from_millis(20)).await;
    assert!(futures::poll!(b_events.next()).is_pending());
}
