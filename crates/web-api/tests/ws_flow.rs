mod support;

use std::time::Duration;

use futures_util::SinkExt;
use serde_json::json;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as TungsteniteMessage};
use tokio_tungstenite::connect_async;

use support::{assert_no_event, next_event, principal, wait_for_roster, TestServer};

#[tokio::test]
async fn delivery_reaches_both_devices_without_echo() {
    let server = TestServer::spawn().await;
    let alice = principal("alice");
    let bob = principal("bob");

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_phone = server.connect(&bob).await;
    let mut bob_laptop = server.connect(&bob).await;

    let bob_id = bob.user_id.to_string();
    wait_for_roster(&mut alice_ws, |ids| ids.len() == 2).await;

    alice_ws
        .send(TungsteniteMessage::Text(
            json!({ "recipient": bob_id, "text": "hi" }).to_string().into(),
        ))
        .await
        .unwrap();

    let on_phone = next_event(&mut bob_phone).await;
    let on_laptop = next_event(&mut bob_laptop).await;
    assert_eq!(on_phone["id"], on_laptop["id"]);
    assert_eq!(on_phone["text"], "hi");
    assert_eq!(on_phone["sender"], alice.user_id.to_string());
    assert_eq!(on_phone["recipient"], bob_id);
    assert_eq!(on_phone["edited"], false);
    assert!(on_phone["createdAt"].is_string());

    assert_no_event(&mut alice_ws, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn roster_lists_each_user_once() {
    let server = TestServer::spawn().await;
    let alice = principal("alice");
    let bob = principal("bob");

    let mut observer = server.connect(&bob).await;
    let phone = server.connect(&alice).await;
    let _laptop = server.connect(&alice).await;

    let alice_id = alice.user_id.to_string();
    let roster = wait_for_roster(&mut observer, |ids| ids.len() == 2).await;
    assert_eq!(roster.iter().filter(|id| **id == alice_id).count(), 1);

    drop(phone);
    // 仍有一个连接在线
    let roster = wait_for_roster(&mut observer, |ids| ids.len() == 2).await;
    assert!(roster.contains(&alice_id));
}

#[tokio::test]
async fn last_disconnect_removes_user_from_roster() {
    let server = TestServer::spawn().await;
    let alice = principal("alice");
    let bob = principal("bob");

    let mut observer = server.connect(&bob).await;
    let mut alice_ws = server.connect(&alice).await;
    wait_for_roster(&mut observer, |ids| ids.len() == 2).await;

    alice_ws.close(None).await.unwrap();

    let roster = wait_for_roster(&mut observer, |ids| ids.len() == 1).await;
    assert_eq!(roster, vec![bob.user_id.to_string()]);
}

#[tokio::test]
async fn typing_value_is_forwarded_to_recipient() {
    let server = TestServer::spawn().await;
    let alice = principal("alice");
    let bob = principal("bob");

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.connect(&bob).await;
    wait_for_roster(&mut bob_ws, |ids| ids.len() == 2).await;

    for typing in [true, false] {
        alice_ws
            .send(TungsteniteMessage::Text(
                json!({ "recipient": bob.user_id, "typing": typing })
                    .to_string()
                    .into(),
            ))
            .await
            .unwrap();

        let event = next_event(&mut bob_ws).await;
        assert_eq!(event["typing"], typing);
        assert_eq!(event["sender"], alice.user_id.to_string());
    }

    let history = server.hub.history(&alice, bob.user_id).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn malformed_event_is_reported_to_origin_only() {
    let server = TestServer::spawn().await;
    let alice = principal("alice");
    let bob = principal("bob");

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.connect(&bob).await;
    wait_for_roster(&mut alice_ws, |ids| ids.len() == 2).await;

    alice_ws
        .send(TungsteniteMessage::Text("not json".into()))
        .await
        .unwrap();

    let error = next_event(&mut alice_ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["code"], "INVALID_EVENT");
    assert_no_event(&mut bob_ws, Duration::from_millis(300)).await;

    // 连接在错误之后仍然可用
    alice_ws
        .send(TungsteniteMessage::Text(
            json!({ "recipient": bob.user_id, "text": "still here" })
                .to_string()
                .into(),
        ))
        .await
        .unwrap();
    assert_eq!(next_event(&mut bob_ws).await["text"], "still here");
}

#[tokio::test]
async fn attachment_is_stored_and_served() {
    let server = TestServer::spawn().await;
    let alice = principal("alice");
    let bob = principal("bob");

    let mut alice_ws = server.connect(&alice).await;
    let mut bob_ws = server.connect(&bob).await;
    wait_for_roster(&mut alice_ws, |ids| ids.len() == 2).await;

    alice_ws
        .send(TungsteniteMessage::Text(
            json!({
                "recipient": bob.user_id,
                "file": { "name": "note.txt", "data": "data:text/plain;base64,aGVsbG8=" }
            })
            .to_string()
            .into(),
        ))
        .await
        .unwrap();

    let delivery = next_event(&mut bob_ws).await;
    let file = delivery["file"].as_str().expect("file name").to_string();
    assert!(file.ends_with(".txt"));
    assert!(delivery["text"].is_null());

    let body = reqwest::get(server.http_url(&format!("/uploads/{file}")))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body.as_ref(), b"hello");
}

#[tokio::test]
async fn upgrade_without_token_is_rejected() {
    let server = TestServer::spawn().await;

    let err = connect_async(format!("ws://{}/ws", server.addr))
        .await
        .expect_err("upgrade must fail");

    match err {
        WsError::Http(response) => assert_eq!(response.status(), 401),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(server.hub.registry().is_empty().await);
}
