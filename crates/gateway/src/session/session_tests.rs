use super::*;
use std::time::Duration;

fn new_test_session() -> (Arc<Session>, mpsc::Receiver<Message>) {
	let (tx, rx) = mpsc::channel(16);
	(Session::new(PeerRole::ServerFacing, tx), rx)
}

#[tokio::test]
async fn send_request_resolves_on_matching_response() {
	let (session, mut rx) = new_test_session();
	let s2 = session.clone();
	let handle = tokio::spawn(async move {
		s2.send_request("ping", serde_json::json!({}), Duration::from_secs(5))
			.await
	});

	let frame = rx.recv().await.expect("frame sent");
	let Message::Request { id, .. } = frame else {
		panic!("expected request");
	};
	assert!(session.resolve_pending(&id, Message::response_ok(id.clone(), serde_json::json!(1))));

	let result = handle.await.unwrap().unwrap();
	assert!(matches!(result, Message::Response { result: Some(_), .. }));
}

#[tokio::test]
async fn late_duplicate_response_is_a_noop() {
	let (session, mut rx) = new_test_session();
	let s2 = session.clone();
	let handle = tokio::spawn(async move {
		s2.send_request("ping", serde_json::json!({}), Duration::from_secs(5))
			.await
	});
	let frame = rx.recv().await.unwrap();
	let Message::Request { id, .. } = frame else {
		panic!("expected request")
	};
	assert!(session.resolve_pending(&id, Message::response_ok(id.clone(), serde_json::json!(1))));
	// second delivery for the same id: no waiter left, dropped without side effect
	assert!(!session.resolve_pending(&id, Message::response_ok(id.clone(), serde_json::json!(2))));
	handle.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn send_request_times_out_and_emits_cancelled_notification() {
	let (session, mut rx) = new_test_session();
	let s2 = session.clone();
	let handle = tokio::spawn(async move {
		s2.send_request("slow", serde_json::json!({}), Duration::from_millis(10))
			.await
	});
	let _req = rx.recv().await.unwrap();
	tokio::time::advance(Duration::from_millis(20)).await;
	let result = handle.await.unwrap();
	assert!(matches!(result, Err(GatewayError::UpstreamTimeout(_))));

	let cancelled = rx.recv().await.expect("cancelled notification sent");
	assert!(matches!(cancelled, Message::Notification { method, .. } if method == "notifications/cancelled"));
}

#[tokio::test]
async fn close_fails_all_pending_requests() {
	let (session, _rx) = new_test_session();
	let s2 = session.clone();
	let handle = tokio::spawn(async move {
		s2.send_request("ping", serde_json::json!({}), Duration::from_secs(30))
			.await
	});
	tokio::task::yield_now().await;
	session.close();
	let result = handle.await.unwrap();
	assert!(result.is_err());
	assert!(session.is_closed());
}

#[test]
fn session_manager_remove_closes_session() {
	let (tx, _rx) = mpsc::channel(4);
	let session = Session::new(PeerRole::ClientOf, tx);
	let mgr = SessionManager::new();
	mgr.insert(session.clone());
	assert_eq!(mgr.len(), 1);
	mgr.remove(&session.id);
	assert_eq!(mgr.len(), 0);
	assert!(session.is_closed());
}
