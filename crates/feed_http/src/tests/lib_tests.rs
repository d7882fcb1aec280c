use super::*;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode as AxumStatus},
    response::IntoResponse,
    routing::{get, patch as patch_route, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use shared::domain::Identity;
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Default)]
struct Recorded {
    patches: Vec<(String, RecordPatch)>,
    removed: Vec<String>,
    blob: Option<(String, String, Vec<u8>)>,
}

#[derive(Clone)]
struct ServerState {
    recorded: Arc<Mutex<Recorded>>,
}

#[derive(Debug, Deserialize)]
struct BlobQuery {
    name: String,
}

fn sample_record(id: &str, text: &str, secs: i64) -> RemoteRecord {
    RemoteRecord {
        id: MessageId(id.to_string()),
        text: text.to_string(),
        sender: Identity::He,
        timestamp: Utc.timestamp_opt(secs, 0).single().expect("timestamp"),
        edited: false,
        edited_at: None,
        is_gif: false,
        gif_url: None,
        is_image: false,
        image_url: None,
        file_name: None,
        file_size: None,
        file_type: None,
        storage_path: None,
    }
}

async fn append_handler(Json(record): Json<NewRecord>) -> Json<RemoteRecord> {
    let mut stored = sample_record("assigned-1", &record.text, 1_700_000_000);
    stored.sender = record.sender;
    stored.is_gif = record.is_gif;
    stored.gif_url = record.gif_url;
    Json(stored)
}

async fn patch_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(patch): Json<RecordPatch>,
) -> AxumStatus {
    if id == "missing" {
        return AxumStatus::NOT_FOUND;
    }
    state.recorded.lock().await.patches.push((id, patch));
    AxumStatus::NO_CONTENT
}

async fn delete_handler(State(state): State<ServerState>, Path(id): Path<String>) -> AxumStatus {
    if id == "missing" {
        return AxumStatus::NOT_FOUND;
    }
    state.recorded.lock().await.removed.push(id);
    AxumStatus::NO_CONTENT
}

async fn ws_handler(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(push_snapshots)
}

async fn push_snapshots(mut socket: WebSocket) {
    let snapshot = vec![
        sample_record("m1", "first", 1_700_000_000),
        sample_record("m2", "second", 1_700_000_060),
    ];
    let frame = serde_json::to_string(&snapshot).expect("encode snapshot");
    let _ = socket.send(WsMessage::Text(frame)).await;
    // keep the socket open so the client side decides when to stop reading
    while socket.recv().await.is_some() {}
}

async fn blob_handler(
    State(state): State<ServerState>,
    Query(query): Query<BlobQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<StoredBlob> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.recorded.lock().await.blob = Some((query.name.clone(), content_type, body.to_vec()));
    Json(StoredBlob {
        url: format!("https://blobs.test/{}", query.name),
        path: format!("images/{}", query.name),
    })
}

async fn spawn_server() -> (String, ServerState) {
    let state = ServerState {
        recorded: Arc::new(Mutex::new(Recorded::default())),
    };
    let app = Router::new()
        .route("/messages", post(append_handler))
        .route("/messages/:id", patch_route(patch_handler).delete(delete_handler))
        .route("/feed", get(ws_handler))
        .route("/blobs", post(blob_handler))
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    (format!("http://{addr}"), state)
}

fn plain_new_record(text: &str) -> NewRecord {
    NewRecord {
        text: text.to_string(),
        sender: Identity::She,
        edited: false,
        is_gif: false,
        gif_url: None,
        is_image: false,
        image_url: None,
        file_name: None,
        file_size: None,
        file_type: None,
        storage_path: None,
    }
}

#[tokio::test]
async fn append_returns_record_with_assigned_id_and_order_key() {
    let (base_url, _state) = spawn_server().await;
    let feed = HttpFeed::new(&base_url);

    let record = feed
        .append(plain_new_record("hello"))
        .await
        .expect("append");

    assert_eq!(record.id, MessageId("assigned-1".into()));
    assert_eq!(record.text, "hello");
    assert_eq!(record.sender, Identity::She);
}

#[tokio::test]
async fn patch_reaches_server_with_edit_fields() {
    let (base_url, state) = spawn_server().await;
    let feed = HttpFeed::new(&base_url);

    let edited_at = Utc.timestamp_opt(1_700_000_123, 0).single().expect("ts");
    feed.patch(
        &MessageId("m7".into()),
        RecordPatch {
            text: "fixed".into(),
            edited: true,
            edited_at,
        },
    )
    .await
    .expect("patch");

    let recorded = state.recorded.lock().await;
    assert_eq!(recorded.patches.len(), 1);
    assert_eq!(recorded.patches[0].0, "m7");
    assert_eq!(recorded.patches[0].1.text, "fixed");
    assert!(recorded.patches[0].1.edited);
}

#[tokio::test]
async fn patch_maps_missing_record_to_not_found() {
    let (base_url, _state) = spawn_server().await;
    let feed = HttpFeed::new(&base_url);

    let err = feed
        .patch(
            &MessageId("missing".into()),
            RecordPatch {
                text: "x".into(),
                edited: true,
                edited_at: Utc::now(),
            },
        )
        .await
        .expect_err("should be not found");

    assert!(matches!(err, FeedError::NotFound(id) if id.0 == "missing"));
}

#[tokio::test]
async fn remove_maps_missing_record_to_not_found() {
    let (base_url, state) = spawn_server().await;
    let feed = HttpFeed::new(&base_url);

    feed.remove(&MessageId("m3".into())).await.expect("remove");
    let err = feed
        .remove(&MessageId("missing".into()))
        .await
        .expect_err("should be not found");

    assert!(matches!(err, FeedError::NotFound(_)));
    assert_eq!(state.recorded.lock().await.removed, vec!["m3".to_string()]);
}

#[tokio::test]
async fn subscribe_yields_parsed_snapshots() {
    let (base_url, _state) = spawn_server().await;
    let feed = HttpFeed::new(&base_url);

    let mut rx = feed.subscribe().await.expect("subscribe");
    let event = rx.recv().await.expect("snapshot event");

    match event {
        FeedEvent::Snapshot(records) => {
            assert_eq!(records.len(), 2);
            assert_eq!(records[0].id, MessageId("m1".into()));
            assert_eq!(records[1].text, "second");
        }
        FeedEvent::Lost(reason) => panic!("subscription lost: {reason}"),
    }
}

#[tokio::test]
async fn upload_sends_bytes_with_content_type_and_name() {
    let (base_url, state) = spawn_server().await;
    let blobs = HttpBlobStore::new(&base_url);

    let stored = blobs
        .upload(b"png-bytes".to_vec(), "image/png", "17_cat.png")
        .await
        .expect("upload");

    assert_eq!(stored.url, "https://blobs.test/17_cat.png");
    assert_eq!(stored.path, "images/17_cat.png");
    let recorded = state.recorded.lock().await;
    let (name, content_type, bytes) = recorded.blob.as_ref().expect("blob recorded");
    assert_eq!(name, "17_cat.png");
    assert_eq!(content_type, "image/png");
    assert_eq!(bytes, b"png-bytes");
}

#[test]
fn feed_ws_url_rewrites_scheme() {
    assert_eq!(
        feed_ws_url("http://localhost:8080").expect("ws url"),
        "ws://localhost:8080/feed"
    );
    assert_eq!(
        feed_ws_url("https://chat.example.com").expect("wss url"),
        "wss://chat.example.com/feed"
    );
    assert!(feed_ws_url("ftp://nope").is_err());
}
