//! HTTP + WebSocket binding of the remote message feed and blob store.
//!
//! Writes go over plain HTTP (`POST`/`PATCH`/`DELETE /messages`); the
//! subscription is a WebSocket at `/feed` that delivers the full ordered
//! snapshot as a JSON array on every change. The backend is treated as an
//! opaque ordered-stream service: ids and order keys are assigned there.

use futures::StreamExt;
use reqwest::StatusCode;
use shared::{
    domain::MessageId,
    error::FeedError,
    protocol::{FeedEvent, NewRecord, RecordPatch, RemoteRecord, StoredBlob},
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct HttpFeed {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn append(&self, record: NewRecord) -> Result<RemoteRecord, FeedError> {
        let response = self
            .http
            .post(format!("{}/messages", self.base_url))
            .json(&record)
            .send()
            .await
            .map_err(|err| FeedError::WriteFailed(err.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::WriteFailed(format!(
                "append rejected with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| FeedError::WriteFailed(format!("invalid append response: {err}")))
    }

    pub async fn patch(&self, id: &MessageId, patch: RecordPatch) -> Result<(), FeedError> {
        let response = self
            .http
            .patch(format!("{}/messages/{}", self.base_url, id.0))
            .json(&patch)
            .send()
            .await
            .map_err(|err| FeedError::WriteFailed(err.to_string()))?;
        check_record_status(id, response.status())
    }

    pub async fn remove(&self, id: &MessageId) -> Result<(), FeedError> {
        let response = self
            .http
            .delete(format!("{}/messages/{}", self.base_url, id.0))
            .send()
            .await
            .map_err(|err| FeedError::WriteFailed(err.to_string()))?;
        check_record_status(id, response.status())
    }

    /// Opens the snapshot stream. The returned receiver yields one
    /// [`FeedEvent::Snapshot`] per change; a [`FeedEvent::Lost`] (or channel
    /// close) means the subscription is dead and will not recover.
    pub async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent>, FeedError> {
        let ws_url = feed_ws_url(&self.base_url)?;
        let (ws_stream, _) = connect_async(&ws_url)
            .await
            .map_err(|err| FeedError::Subscription(format!("connect {ws_url}: {err}")))?;
        info!("feed: subscribed to {ws_url}");
        let (_, mut ws_reader) = ws_stream.split();

        let (tx, rx) = mpsc::channel(SNAPSHOT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<Vec<RemoteRecord>>(&text) {
                            Ok(records) => {
                                if tx.send(FeedEvent::Snapshot(records)).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!("feed: dropping subscription after bad frame: {err}");
                                let _ = tx
                                    .send(FeedEvent::Lost(format!("invalid snapshot frame: {err}")))
                                    .await;
                                return;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        let _ = tx
                            .send(FeedEvent::Lost("feed closed by server".to_string()))
                            .await;
                        return;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        let _ = tx
                            .send(FeedEvent::Lost(format!("feed receive failed: {err}")))
                            .await;
                        return;
                    }
                }
            }
            let _ = tx.send(FeedEvent::Lost("feed stream ended".to_string())).await;
        });

        Ok(rx)
    }
}

#[derive(Clone)]
pub struct HttpBlobStore {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBlobStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        name: &str,
    ) -> Result<StoredBlob, FeedError> {
        let response = self
            .http
            .post(format!("{}/blobs", self.base_url))
            .query(&[("name", name)])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|err| FeedError::UploadFailed(err.to_string()))?;

        if !response.status().is_success() {
            return Err(FeedError::UploadFailed(format!(
                "upload rejected with status {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|err| FeedError::UploadFailed(format!("invalid upload response: {err}")))
    }
}

fn check_record_status(id: &MessageId, status: StatusCode) -> Result<(), FeedError> {
    if status == StatusCode::NOT_FOUND {
        return Err(FeedError::NotFound(id.clone()));
    }
    if !status.is_success() {
        return Err(FeedError::WriteFailed(format!(
            "write to record {id} rejected with status {status}"
        )));
    }
    Ok(())
}

fn feed_ws_url(base_url: &str) -> Result<String, FeedError> {
    let ws_base = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        return Err(FeedError::Subscription(format!(
            "base url must start with http:// or https://, got '{base_url}'"
        )));
    };
    Ok(format!("{ws_base}/feed"))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
