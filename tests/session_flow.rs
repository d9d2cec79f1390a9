//! End-to-end flows over the realtime channel: join sync, section locking,
//! content fan-out, and disconnect cleanup.

mod common;

use common::{TestClient, TestServer};
use serde_json::json;

#[tokio::test]
async fn test_join_sync_and_participant_fanout() {
    let server = TestServer::spawn(19301, 19302)
        .await
        .expect("Failed to spawn test server");

    let mut alice = TestClient::connect(&server.ws_url())
        .await
        .expect("Failed to connect alice");
    alice
        .join("p1", "u-alice", "Alice", "ch1", "draft text")
        .await
        .expect("Alice join failed");

    let sync = alice.recv_type("sync").await.expect("Alice sync");
    assert_eq!(sync["sectionId"], "ch1");
    assert_eq!(sync["content"], "draft text");
    assert_eq!(sync["participants"].as_array().unwrap().len(), 1);
    assert!(sync["locks"].as_array().unwrap().is_empty());

    let mut bob = TestClient::connect(&server.ws_url())
        .await
        .expect("Failed to connect bob");
    bob.join("p1", "u-bob", "Bob", "ch1", "ignored seed")
        .await
        .expect("Bob join failed");

    // Bob's sync carries the cached content, not his seed, plus both
    // participants.
    let sync = bob.recv_type("sync").await.expect("Bob sync");
    assert_eq!(sync["content"], "draft text");
    assert_eq!(sync["participants"].as_array().unwrap().len(), 2);

    // Alice sees the updated roster.
    let participants = alice
        .recv_until(|e| {
            e["type"] == "participants" && e["participants"].as_array().unwrap().len() == 2
        })
        .await
        .expect("Alice participants update");
    let colors: Vec<&str> = participants["participants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["color"].as_str().unwrap())
        .collect();
    assert_ne!(colors[0], colors[1], "participants must get distinct colors");
}

#[tokio::test]
async fn test_lock_conflict_release_and_retry() {
    let server = TestServer::spawn(19311, 19312)
        .await
        .expect("Failed to spawn test server");

    let mut alice = TestClient::connect(&server.ws_url()).await.expect("alice");
    let mut bob = TestClient::connect(&server.ws_url()).await.expect("bob");
    alice
        .join("p1", "u-alice", "Alice", "ch1", "text")
        .await
        .expect("Alice join");
    alice.recv_type("sync").await.expect("Alice sync");
    bob.join("p1", "u-bob", "Bob", "ch1", "text")
        .await
        .expect("Bob join");
    bob.recv_type("sync").await.expect("Bob sync");

    // An empty range is rejected outright.
    alice
        .send(json!({ "type": "lock-request", "sectionId": "ch1", "start": 10, "end": 10 }))
        .await
        .expect("send");
    let err = alice.recv_type("error").await.expect("error reply");
    assert_eq!(err["code"], "invalid_range");

    alice
        .send(json!({ "type": "lock-request", "sectionId": "ch1", "start": 0, "end": 100 }))
        .await
        .expect("send");
    let granted = alice.recv_type("lock-granted").await.expect("grant");
    let lock_id = granted["lock"]["id"].as_str().expect("lock id").to_string();

    // Overlap on the same section is rejected, naming the holder.
    bob.send(json!({ "type": "lock-request", "sectionId": "ch1", "start": 50, "end": 150 }))
        .await
        .expect("send");
    let rejected = bob.recv_type("lock-rejected").await.expect("rejection");
    assert_eq!(rejected["holderName"], "Alice");
    assert_eq!(rejected["lock"]["holderId"], "u-alice");

    // Disjoint ranges on the same section coexist.
    bob.send(json!({ "type": "lock-request", "sectionId": "ch1", "start": 200, "end": 300 }))
        .await
        .expect("send");
    bob.recv_type("lock-granted").await.expect("disjoint grant");

    // After Alice releases, the contested range is free.
    alice
        .send(json!({ "type": "lock-release", "lockId": lock_id }))
        .await
        .expect("send");
    bob.send(json!({ "type": "lock-request", "sectionId": "ch1", "start": 50, "end": 150 }))
        .await
        .expect("send");
    let granted = bob.recv_type("lock-granted").await.expect("retry grant");
    assert_eq!(granted["lock"]["holderId"], "u-bob");
}

#[tokio::test]
async fn test_content_update_fans_out_with_base() {
    let server = TestServer::spawn(19321, 19322)
        .await
        .expect("Failed to spawn test server");

    let mut alice = TestClient::connect(&server.ws_url()).await.expect("alice");
    let mut bob = TestClient::connect(&server.ws_url()).await.expect("bob");
    alice
        .join("p1", "u-alice", "Alice", "ch1", "base text")
        .await
        .expect("Alice join");
    alice.recv_type("sync").await.expect("Alice sync");
    bob.join("p1", "u-bob", "Bob", "ch1", "base text")
        .await
        .expect("Bob join");
    bob.recv_type("sync").await.expect("Bob sync");

    alice
        .send(json!({
            "type": "content-update",
            "sectionId": "ch1",
            "content": "base text, extended",
            "baseContent": null,
            "patch": null,
        }))
        .await
        .expect("send");

    // Bob receives the update attributed to Alice; the previously cached
    // content fills in as the diff base since Alice sent none.
    let update = bob.recv_type("content-update").await.expect("update");
    assert_eq!(update["content"], "base text, extended");
    assert_eq!(update["baseContent"], "base text");
    assert_eq!(update["userId"], "u-alice");
    assert_eq!(update["name"], "Alice");

    // Cursor positions fan out to the whole room with the sender's color.
    alice
        .send(json!({
            "type": "cursor",
            "sectionId": "ch1",
            "position": 7,
            "selectionStart": null,
            "selectionEnd": null,
        }))
        .await
        .expect("send");
    let cursor = bob.recv_type("cursor").await.expect("cursor");
    assert_eq!(cursor["position"], 7);
    assert_eq!(cursor["userId"], "u-alice");
    assert!(cursor["color"].as_str().is_some_and(|c| c.starts_with('#')));
}

#[tokio::test]
async fn test_disconnect_releases_held_locks() {
    let server = TestServer::spawn(19331, 19332)
        .await
        .expect("Failed to spawn test server");

    let mut alice = TestClient::connect(&server.ws_url()).await.expect("alice");
    alice
        .join("p1", "u-alice", "Alice", "ch1", "text")
        .await
        .expect("Alice join");
    alice.recv_type("sync").await.expect("Alice sync");
    alice
        .send(json!({ "type": "lock-request", "sectionId": "ch1", "start": 0, "end": 100 }))
        .await
        .expect("send");
    alice.recv_type("lock-granted").await.expect("grant");

    let mut bob = TestClient::connect(&server.ws_url()).await.expect("bob");
    bob.join("p1", "u-bob", "Bob", "ch1", "text")
        .await
        .expect("Bob join");
    let sync = bob.recv_type("sync").await.expect("Bob sync");
    assert_eq!(sync["locks"].as_array().unwrap().len(), 1);

    alice.leave().await.expect("Alice leave");

    // Disconnect cleanup is synchronous: roster shrinks and the lock list
    // empties without waiting for TTL expiry.
    bob.recv_until(|e| {
        e["type"] == "participants" && e["participants"].as_array().unwrap().len() == 1
    })
    .await
    .expect("roster without alice");
    bob.recv_until(|e| {
        e["type"] == "locks" && e["locks"].as_array().is_some_and(|l| l.is_empty())
    })
    .await
    .expect("empty lock list");
    let entry = bob
        .recv_until(|e| e["type"] == "activity" && e["entry"]["kind"] == "lock_released")
        .await
        .expect("release activity");
    assert_eq!(entry["entry"]["actorId"], "u-alice");
}

#[tokio::test]
async fn test_comment_thread_and_resolution() {
    let server = TestServer::spawn(19341, 19342)
        .await
        .expect("Failed to spawn test server");

    let mut alice = TestClient::connect(&server.ws_url()).await.expect("alice");
    let mut bob = TestClient::connect(&server.ws_url()).await.expect("bob");
    alice
        .join("p1", "u-alice", "Alice", "ch1", "text")
        .await
        .expect("Alice join");
    alice.recv_type("sync").await.expect("Alice sync");
    bob.join("p1", "u-bob", "Bob", "ch1", "text")
        .await
        .expect("Bob join");
    bob.recv_type("sync").await.expect("Bob sync");

    // Mention resolution runs against live participant handles.
    alice
        .send(json!({
            "type": "comment-add",
            "text": "needs work, @bob please look",
            "selection": null,
            "threadId": null,
            "parentId": null,
            "taskId": null,
        }))
        .await
        .expect("send");
    let added = bob.recv_type("comment-added").await.expect("comment");
    let comment = &added["comment"];
    let comment_id = comment["id"].as_str().expect("id").to_string();
    // A top-level comment roots its own thread.
    assert_eq!(comment["threadId"], comment["id"]);
    assert_eq!(comment["mentions"], json!(["bob"]));

    // A reply without an explicit thread id lands in the parent's thread.
    bob.send(json!({
        "type": "comment-add",
        "text": "on it",
        "selection": null,
        "threadId": null,
        "parentId": comment_id,
        "taskId": null,
    }))
    .await
    .expect("send");
    // Alice also receives her own comment's broadcast; skip to the reply.
    let reply = alice
        .recv_until(|e| e["type"] == "comment-added" && e["comment"]["text"] == "on it")
        .await
        .expect("reply");
    assert_eq!(reply["comment"]["threadId"], comment_id.as_str());

    bob.send(json!({
        "type": "comment-update",
        "commentId": comment_id,
        "status": "resolved",
    }))
    .await
    .expect("send");
    let updated = alice.recv_type("comment-updated").await.expect("update");
    assert_eq!(updated["comment"]["status"], "resolved");
    assert_eq!(updated["comment"]["resolvedBy"], "u-bob");
}
