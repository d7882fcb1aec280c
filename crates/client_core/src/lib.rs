//! Client core for the two-person chat.
//!
//! Owns the reconciled message view: every snapshot pushed by the remote
//! feed is merged with the locally tracked optimistic sends, and the result
//! is broadcast to whatever frontend is attached. The remote feed, blob
//! store, and session store are trait seams so the core stays testable
//! without a network or a database.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{Identity, MessageId, MessageKind},
    error::{ErrorCode, FeedError},
    protocol::{ComposerPayload, FeedEvent, NewRecord, RecordPatch, RemoteRecord, StoredBlob},
};
use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{error, info, warn};
use uuid::Uuid;

pub mod compose;
pub mod gate;

pub use compose::Draft;
pub use gate::GateError;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Opaque interface over the remote document store backing the message feed.
/// Ids and order keys are assigned on the other side; the client never
/// invents either.
#[async_trait]
pub trait RemoteFeed: Send + Sync {
    async fn append(&self, record: NewRecord) -> Result<RemoteRecord, FeedError>;
    async fn patch(&self, id: &MessageId, patch: RecordPatch) -> Result<(), FeedError>;
    async fn remove(&self, id: &MessageId) -> Result<(), FeedError>;
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent>, FeedError>;
}

/// Placeholder feed for wiring a client before a real backend is attached.
pub struct MissingRemoteFeed;

#[async_trait]
impl RemoteFeed for MissingRemoteFeed {
    async fn append(&self, _record: NewRecord) -> Result<RemoteRecord, FeedError> {
        Err(FeedError::WriteFailed("remote feed is not configured".into()))
    }

    async fn patch(&self, _id: &MessageId, _patch: RecordPatch) -> Result<(), FeedError> {
        Err(FeedError::WriteFailed("remote feed is not configured".into()))
    }

    async fn remove(&self, _id: &MessageId) -> Result<(), FeedError> {
        Err(FeedError::WriteFailed("remote feed is not configured".into()))
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent>, FeedError> {
        Err(FeedError::Subscription(
            "remote feed is not configured".into(),
        ))
    }
}

// The inherent methods on the HTTP adapter shadow these trait methods, so
// the fully qualified calls below resolve to the adapter, not back here.
#[async_trait]
impl RemoteFeed for feed_http::HttpFeed {
    async fn append(&self, record: NewRecord) -> Result<RemoteRecord, FeedError> {
        feed_http::HttpFeed::append(self, record).await
    }

    async fn patch(&self, id: &MessageId, patch: RecordPatch) -> Result<(), FeedError> {
        feed_http::HttpFeed::patch(self, id, patch).await
    }

    async fn remove(&self, id: &MessageId) -> Result<(), FeedError> {
        feed_http::HttpFeed::remove(self, id).await
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedEvent>, FeedError> {
        feed_http::HttpFeed::subscribe(self).await
    }
}

/// Binary blob storage for image uploads.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        name: &str,
    ) -> Result<StoredBlob, FeedError>;
}

/// Placeholder blob store; uploads always fail.
pub struct MissingBlobStore;

#[async_trait]
impl BlobStore for MissingBlobStore {
    async fn upload(
        &self,
        _bytes: Vec<u8>,
        _content_type: &str,
        _name: &str,
    ) -> Result<StoredBlob, FeedError> {
        Err(FeedError::UploadFailed("blob store is not configured".into()))
    }
}

#[async_trait]
impl BlobStore for feed_http::HttpBlobStore {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        name: &str,
    ) -> Result<StoredBlob, FeedError> {
        feed_http::HttpBlobStore::upload(self, bytes, content_type, name).await
    }
}

/// Persistence port for the selected identity, so a returning user skips the
/// gate entirely.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_identity(&self) -> Result<Option<Identity>>;
    async fn save_identity(&self, identity: Identity) -> Result<()>;
    async fn clear_identity(&self) -> Result<()>;
}

#[async_trait]
impl SessionStore for storage::Storage {
    async fn load_identity(&self) -> Result<Option<Identity>> {
        storage::Storage::load_identity(self).await
    }

    async fn save_identity(&self, identity: Identity) -> Result<()> {
        storage::Storage::save_identity(self, identity).await
    }

    async fn clear_identity(&self) -> Result<()> {
        storage::Storage::clear_identity(self).await
    }
}

/// In-memory session store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemorySessionStore {
    identity: Mutex<Option<Identity>>,
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_identity(&self) -> Result<Option<Identity>> {
        Ok(*self.identity.lock().await)
    }

    async fn save_identity(&self, identity: Identity) -> Result<()> {
        *self.identity.lock().await = Some(identity);
        Ok(())
    }

    async fn clear_identity(&self) -> Result<()> {
        *self.identity.lock().await = None;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageAttachment {
    pub url: String,
    pub file_name: Option<String>,
    pub file_size: Option<u64>,
    pub file_type: Option<String>,
    pub storage_path: Option<String>,
}

/// One entry of the reconciled view. Synced messages carry the
/// store-assigned id and order key; optimistic entries carry a local token
/// instead and render as pending until a snapshot confirms them.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: Option<MessageId>,
    pub token: Option<Uuid>,
    pub text: String,
    pub sender: Identity,
    pub timestamp: Option<DateTime<Utc>>,
    pub kind: MessageKind,
    pub gif_url: Option<String>,
    pub image: Option<ImageAttachment>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub pending: bool,
}

impl From<RemoteRecord> for Message {
    fn from(record: RemoteRecord) -> Self {
        let kind = record.kind();
        let image = record.image_url.clone().map(|url| ImageAttachment {
            url,
            file_name: record.file_name.clone(),
            file_size: record.file_size,
            file_type: record.file_type.clone(),
            storage_path: record.storage_path.clone(),
        });
        Message {
            id: Some(record.id),
            token: None,
            text: record.text,
            sender: record.sender,
            timestamp: Some(record.timestamp),
            kind,
            gif_url: record.gif_url,
            image,
            edited: record.edited,
            edited_at: record.edited_at,
            pending: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The reconciled view changed, either from an optimistic insert or from
    /// a merged snapshot.
    ViewChanged(Vec<Message>),
    /// The live subscription died and will not recover on its own.
    ConnectionLost(String),
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("'{file_name}' is not an image ({content_type})")]
    NotAnImage {
        file_name: String,
        content_type: String,
    },
    #[error("failed to encode upload payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

impl UploadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            UploadError::NotAnImage { .. } | UploadError::Encode(_) => ErrorCode::InvalidUpload,
            UploadError::Feed(err) => err.code(),
        }
    }
}

/// An optimistic send awaiting confirmation. Once the append call returns,
/// the store-assigned id is recorded here so the next snapshot can claim the
/// entry exactly; until then the content fingerprint is the fallback key.
struct PendingMessage {
    token: Uuid,
    sender: Identity,
    draft: Draft,
    assigned_id: Option<MessageId>,
}

impl PendingMessage {
    fn to_message(&self) -> Message {
        let (kind, gif_url, image) = match &self.draft {
            Draft::Plain { .. } => (MessageKind::Plain, None, None),
            Draft::Gif { gif_url, .. } => (MessageKind::Gif, Some(gif_url.clone()), None),
            Draft::Image { image, .. } => (MessageKind::Image, None, Some(image.clone())),
        };
        Message {
            id: self.assigned_id.clone(),
            token: Some(self.token),
            text: self.draft.text().to_string(),
            sender: self.sender,
            timestamp: None,
            kind,
            gif_url,
            image,
            edited: false,
            edited_at: None,
            pending: true,
        }
    }
}

#[derive(Default)]
struct ChatState {
    identity: Option<Identity>,
    remote: Vec<Message>,
    pending: Vec<PendingMessage>,
    feed_task: Option<JoinHandle<()>>,
    live: bool,
}

fn draft_record(sender: Identity, draft: &Draft) -> NewRecord {
    let blank = NewRecord {
        text: String::new(),
        sender,
        edited: false,
        is_gif: false,
        gif_url: None,
        is_image: false,
        image_url: None,
        file_name: None,
        file_size: None,
        file_type: None,
        storage_path: None,
    };
    match draft {
        Draft::Plain { text } => NewRecord {
            text: text.clone(),
            ..blank
        },
        Draft::Gif { text, gif_url } => NewRecord {
            text: text.clone(),
            is_gif: true,
            gif_url: Some(gif_url.clone()),
            ..blank
        },
        Draft::Image { caption, image } => NewRecord {
            text: caption.clone(),
            is_image: true,
            image_url: Some(image.url.clone()),
            file_name: image.file_name.clone(),
            file_size: image.file_size,
            file_type: image.file_type.clone(),
            storage_path: image.storage_path.clone(),
            ..blank
        },
    }
}

fn record_matches_draft(record: &RemoteRecord, sender: Identity, draft: &Draft) -> bool {
    if record.sender != sender || record.kind() != draft.kind() {
        return false;
    }
    match draft {
        Draft::Plain { text } => record.text == *text,
        Draft::Gif { text, gif_url } => {
            record.text == *text && record.gif_url.as_deref() == Some(gif_url)
        }
        Draft::Image { caption, image } => {
            record.text == *caption && record.image_url.as_deref() == Some(&image.url)
        }
    }
}

/// Merges a full snapshot into the state: the snapshot replaces the synced
/// view wholesale, and every pending entry that can claim a snapshot record
/// (by assigned id, or by content fingerprint before the append response
/// lands) is dropped. Each record confirms at most one pending entry.
fn reconcile(state: &mut ChatState, mut snapshot: Vec<RemoteRecord>) {
    // stable sort: server order breaks ties between equal order keys
    snapshot.sort_by_key(|record| record.timestamp);

    let mut claimed = vec![false; snapshot.len()];
    let pending = std::mem::take(&mut state.pending);
    state.pending = pending
        .into_iter()
        .filter(|entry| {
            let confirmed = snapshot.iter().enumerate().position(|(index, record)| {
                if claimed[index] {
                    return false;
                }
                match &entry.assigned_id {
                    Some(id) => record.id == *id,
                    None => record_matches_draft(record, entry.sender, &entry.draft),
                }
            });
            match confirmed {
                Some(index) => {
                    claimed[index] = true;
                    false
                }
                None => true,
            }
        })
        .collect();

    state.remote = snapshot.into_iter().map(Message::from).collect();
}

/// Synced messages in order-key order, then pending sends in composition
/// order at the tail.
fn assemble(state: &ChatState) -> Vec<Message> {
    let mut view = state.remote.clone();
    view.extend(state.pending.iter().map(PendingMessage::to_message));
    view
}

pub struct ChatClient {
    feed: Arc<dyn RemoteFeed>,
    blobs: Arc<dyn BlobStore>,
    session: Arc<dyn SessionStore>,
    inner: Mutex<ChatState>,
    events: broadcast::Sender<ClientEvent>,
}

impl ChatClient {
    pub fn new(
        feed: Arc<dyn RemoteFeed>,
        blobs: Arc<dyn BlobStore>,
        session: Arc<dyn SessionStore>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            feed,
            blobs,
            session,
            inner: Mutex::new(ChatState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn current_identity(&self) -> Option<Identity> {
        self.inner.lock().await.identity
    }

    /// Whether the live subscription is currently attached.
    pub async fn is_live(&self) -> bool {
        self.inner.lock().await.live
    }

    /// The current reconciled view.
    pub async fn messages(&self) -> Vec<Message> {
        assemble(&*self.inner.lock().await)
    }

    /// Restores a previously selected identity from the session store and
    /// opens the live feed. `None` means no identity is persisted and the
    /// gate has to be shown.
    pub async fn restore(self: &Arc<Self>) -> Result<Option<Identity>> {
        let Some(identity) = self.session.load_identity().await? else {
            return Ok(None);
        };
        self.begin_session(identity).await;
        Ok(Some(identity))
    }

    /// Verifies the secret for `identity`, persists the choice, and opens
    /// the live feed.
    pub async fn login(self: &Arc<Self>, identity: Identity, secret: &str) -> Result<(), GateError> {
        gate::verify_secret(identity, secret).await?;
        self.session
            .save_identity(identity)
            .await
            .map_err(|source| GateError::Store { source })?;
        self.begin_session(identity).await;
        Ok(())
    }

    async fn begin_session(self: &Arc<Self>, identity: Identity) {
        {
            let mut guard = self.inner.lock().await;
            guard.identity = Some(identity);
            guard.remote.clear();
            guard.pending.clear();
        }
        info!("session: active identity {identity}");
        if let Err(err) = self.start_feed().await {
            error!("feed: subscription unavailable: {err}");
            self.inner.lock().await.live = false;
            let _ = self
                .events
                .send(ClientEvent::ConnectionLost(err.to_string()));
        }
    }

    /// Clears the persisted identity and drops the live subscription and the
    /// in-memory view.
    pub async fn logout(&self) -> Result<()> {
        self.session.clear_identity().await?;
        let task = {
            let mut guard = self.inner.lock().await;
            guard.identity = None;
            guard.remote.clear();
            guard.pending.clear();
            guard.live = false;
            guard.feed_task.take()
        };
        if let Some(task) = task {
            task.abort();
        }
        info!("session: logged out");
        Ok(())
    }

    async fn start_feed(self: &Arc<Self>) -> Result<(), FeedError> {
        let mut snapshots = self.feed.subscribe().await?;
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            loop {
                match snapshots.recv().await {
                    Some(FeedEvent::Snapshot(records)) => {
                        let view = {
                            let mut guard = client.inner.lock().await;
                            reconcile(&mut guard, records);
                            assemble(&guard)
                        };
                        let _ = client.events.send(ClientEvent::ViewChanged(view));
                    }
                    Some(FeedEvent::Lost(reason)) => {
                        client.subscription_lost(reason).await;
                        return;
                    }
                    None => {
                        client.subscription_lost("feed stream ended".to_string()).await;
                        return;
                    }
                }
            }
        });

        let mut guard = self.inner.lock().await;
        if let Some(previous) = guard.feed_task.replace(task) {
            previous.abort();
        }
        guard.live = true;
        Ok(())
    }

    async fn subscription_lost(&self, reason: String) {
        error!("feed: live subscription lost: {reason}");
        self.inner.lock().await.live = false;
        let _ = self.events.send(ClientEvent::ConnectionLost(reason));
    }

    /// Classifies raw input without sending it. `None` means there is
    /// nothing to send: empty input, or no active identity.
    pub async fn compose(&self, raw: &str) -> Option<Draft> {
        self.inner.lock().await.identity?;
        compose::classify(raw)
    }

    /// Classifies `raw`, inserts it into the view optimistically, and
    /// appends it to the remote feed. Empty input and an absent identity are
    /// silent no-ops; on append failure the optimistic entry is removed
    /// again and the error surfaces to the caller.
    pub async fn send(&self, raw: &str) -> Result<(), FeedError> {
        let (token, record, view) = {
            let mut guard = self.inner.lock().await;
            let Some(sender) = guard.identity else {
                return Ok(());
            };
            let Some(draft) = compose::classify(raw) else {
                return Ok(());
            };
            let token = Uuid::new_v4();
            let record = draft_record(sender, &draft);
            guard.pending.push(PendingMessage {
                token,
                sender,
                draft,
                assigned_id: None,
            });
            (token, record, assemble(&guard))
        };
        let _ = self.events.send(ClientEvent::ViewChanged(view));

        match self.feed.append(record).await {
            Ok(stored) => {
                let mut guard = self.inner.lock().await;
                // absent means a snapshot already confirmed the entry by
                // fingerprint while the append response was in flight
                if let Some(entry) = guard.pending.iter_mut().find(|entry| entry.token == token) {
                    entry.assigned_id = Some(stored.id);
                }
                Ok(())
            }
            Err(err) => {
                warn!("send: append failed, dropping optimistic entry: {err}");
                let view = {
                    let mut guard = self.inner.lock().await;
                    guard.pending.retain(|entry| entry.token != token);
                    assemble(&guard)
                };
                let _ = self.events.send(ClientEvent::ViewChanged(view));
                Err(err)
            }
        }
    }

    /// Uploads image bytes to the blob store and sends the resulting image
    /// message through the normal send path. Non-image content types are
    /// rejected locally, before any upload.
    pub async fn send_image(
        &self,
        bytes: Vec<u8>,
        content_type: &str,
        file_name: &str,
    ) -> Result<(), UploadError> {
        if !content_type.starts_with("image/") {
            return Err(UploadError::NotAnImage {
                file_name: file_name.to_string(),
                content_type: content_type.to_string(),
            });
        }

        let file_size = bytes.len() as u64;
        let stored_name = format!("{}_{file_name}", Utc::now().timestamp_millis());
        let blob = self.blobs.upload(bytes, content_type, &stored_name).await?;
        info!("upload: stored {stored_name} at {}", blob.path);

        let payload = ComposerPayload::Image {
            image_url: blob.url,
            file_name: Some(file_name.to_string()),
            file_size: Some(file_size),
            file_type: Some(content_type.to_string()),
            storage_path: Some(blob.path),
        };
        let raw = serde_json::to_string(&payload)?;
        Ok(self.send(&raw).await?)
    }

    /// Rewrites the text of a synced message. Whitespace-only input and
    /// unchanged text are no-ops; the view itself updates on the next
    /// snapshot, not here.
    pub async fn edit(&self, id: &MessageId, new_text: &str) -> Result<(), FeedError> {
        let trimmed = new_text.trim();
        if trimmed.is_empty() {
            return Ok(());
        }
        {
            let guard = self.inner.lock().await;
            let unchanged = guard
                .remote
                .iter()
                .any(|message| message.id.as_ref() == Some(id) && message.text == trimmed);
            if unchanged {
                return Ok(());
            }
        }
        self.feed
            .patch(
                id,
                RecordPatch {
                    text: trimmed.to_string(),
                    edited: true,
                    edited_at: Utc::now(),
                },
            )
            .await
    }

    /// Removes a synced message. The view updates when the next snapshot no
    /// longer contains the record.
    pub async fn delete(&self, id: &MessageId) -> Result<(), FeedError> {
        self.feed.remove(id).await
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
