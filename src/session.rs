//! The session object: one task per session draining a command queue.
//!
//! All state for a session (element list, subscriber set) lives inside the
//! task, so every mutation, persistence write, and broadcast enqueue is
//! serialized. [`SessionHandle`] is the only way in: HTTP callers await a
//! oneshot reply, socket callers fire and forget.

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::element::{now_millis, Element};
use crate::ids;
use crate::protocol::ServerFrame;
use crate::store::{BoardStore, SessionRecord, StoreError};

/// Outbound frames buffered per subscriber before the writer drains them.
/// A subscriber that falls further behind is closed.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

const COMMAND_QUEUE_DEPTH: usize = 128;

pub type SubscriberTx = mpsc::Sender<Bytes>;

/// Who asked for a mutation. Socket-origin edits are not echoed back to
/// the originating subscriber; HTTP callers are not subscribers at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    Api,
    Subscriber(String),
}

impl Origin {
    /// The value stamped into `createdBy`/`updatedBy`/`movedBy`.
    pub fn author(&self) -> &str {
        match self {
            Self::Api => "api",
            Self::Subscriber(user_id) => user_id,
        }
    }

    fn excluded_user(&self) -> Option<&str> {
        match self {
            Self::Api => None,
            Self::Subscriber(user_id) => Some(user_id),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("element not found")]
    ElementNotFound,
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

type Reply<T> = Option<oneshot::Sender<Result<T, SessionError>>>;

#[derive(Debug)]
pub enum SessionCommand {
    Attach {
        tx: SubscriberTx,
        reply: oneshot::Sender<String>,
    },
    Detach {
        user_id: String,
    },
    Snapshot {
        reply: oneshot::Sender<SessionInfo>,
    },
    GetElement {
        element_id: String,
        reply: oneshot::Sender<Option<Element>>,
    },
    SubscriberCount {
        reply: oneshot::Sender<usize>,
    },
    Create {
        element: Element,
        origin: Origin,
        reply: Reply<Element>,
    },
    CreateBatch {
        elements: Vec<Element>,
        origin: Origin,
        reply: Reply<Vec<Element>>,
    },
    Update {
        element_id: String,
        patch: Element,
        origin: Origin,
        reply: Reply<Element>,
    },
    Delete {
        element_id: String,
        origin: Origin,
        reply: Reply<()>,
    },
    Clear {
        origin: Origin,
        reply: Reply<()>,
    },
    MoveElement {
        element_id: String,
        element: Element,
        origin: Origin,
    },
    Reorder {
        element_id: String,
        position: String,
        origin: Origin,
    },
    Cursor {
        x: f64,
        y: f64,
        origin: Origin,
    },
}

/// Copy of the session state for HTTP reads.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: String,
    pub created_at: u64,
    pub elements: Vec<Element>,
    pub user_count: usize,
}

/// Cloneable sender into one session's command queue.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    /// Register a subscriber channel; resolves to the assigned user id once
    /// the `init` and `userCount` frames are enqueued.
    pub async fn attach(&self, tx: SubscriberTx) -> Result<String, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Attach { tx, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn snapshot(&self) -> Result<SessionInfo, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Snapshot { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn element(&self, element_id: &str) -> Result<Option<Element>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetElement {
                element_id: element_id.to_owned(),
                reply,
            })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn subscriber_count(&self) -> Result<usize, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::SubscriberCount { reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    pub async fn create(&self, element: Element, origin: Origin) -> Result<Element, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionCommand::Create {
                element,
                origin,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    pub async fn create_batch(
        &self,
        elements: Vec<Element>,
        origin: Origin,
    ) -> Result<Vec<Element>, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionCommand::CreateBatch {
                elements,
                origin,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    pub async fn update(
        &self,
        element_id: String,
        patch: Element,
        origin: Origin,
    ) -> Result<Element, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionCommand::Update {
                element_id,
                patch,
                origin,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    pub async fn delete(&self, element_id: String, origin: Origin) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionCommand::Delete {
                element_id,
                origin,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    pub async fn clear(&self, origin: Origin) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.request(
            SessionCommand::Clear {
                origin,
                reply: Some(reply),
            },
            rx,
        )
        .await
    }

    /// Enqueue a command without waiting for a result. Used by the socket
    /// front end, which must never block its read loop on a busy session.
    pub fn try_send(
        &self,
        command: SessionCommand,
    ) -> Result<(), mpsc::error::TrySendError<SessionCommand>> {
        self.tx.try_send(command)
    }

    async fn request<T>(
        &self,
        command: SessionCommand,
        rx: oneshot::Receiver<Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }
}

/// Spawn the session task and hand back its command channel.
pub fn spawn(record: SessionRecord, store: BoardStore) -> SessionHandle {
    let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    tokio::spawn(async move {
        let mut session = Session {
            record,
            subscribers: Vec::new(),
            store,
        };
        while let Some(command) = rx.recv().await {
            session.handle(command).await;
        }
        log::debug!("session {} unloaded", session.record.id);
    });
    SessionHandle { tx }
}

struct Subscriber {
    user_id: String,
    tx: SubscriberTx,
}

struct Session {
    record: SessionRecord,
    subscribers: Vec<Subscriber>,
    store: BoardStore,
}

impl Session {
    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Attach { tx, reply } => {
                let user_id = self.attach(tx);
                let _ = reply.send(user_id);
            }
            SessionCommand::Detach { user_id } => self.detach(&user_id),
            SessionCommand::Snapshot { reply } => {
                let _ = reply.send(SessionInfo {
                    id: self.record.id.clone(),
                    created_at: self.record.created_at,
                    elements: self.record.elements.clone(),
                    user_count: self.subscribers.len(),
                });
            }
            SessionCommand::GetElement { element_id, reply } => {
                let element = self
                    .index_of(&element_id)
                    .map(|index| self.record.elements[index].clone());
                let _ = reply.send(element);
            }
            SessionCommand::SubscriberCount { reply } => {
                let _ = reply.send(self.subscribers.len());
            }
            SessionCommand::Create {
                element,
                origin,
                reply,
            } => {
                let result = self.apply_create(element, &origin).await;
                respond(reply, result);
            }
            SessionCommand::CreateBatch {
                elements,
                origin,
                reply,
            } => {
                let result = self.apply_create_batch(elements, &origin).await;
                respond(reply, result);
            }
            SessionCommand::Update {
                element_id,
                patch,
                origin,
                reply,
            } => {
                let result = self.apply_update(&element_id, patch, &origin).await;
                respond(reply, result);
            }
            SessionCommand::Delete {
                element_id,
                origin,
                reply,
            } => {
                let result = self.apply_delete(&element_id, &origin).await;
                respond(reply, result);
            }
            SessionCommand::Clear { origin, reply } => {
                let result = self.apply_clear(&origin).await;
                respond(reply, result);
            }
            SessionCommand::MoveElement {
                element_id,
                element,
                origin,
            } => self.apply_move(&element_id, element, &origin).await,
            SessionCommand::Reorder {
                element_id,
                position,
                origin,
            } => self.apply_reorder(&element_id, &position, &origin).await,
            SessionCommand::Cursor { x, y, origin } => self.relay_cursor(x, y, &origin),
        }
    }

    fn attach(&mut self, tx: SubscriberTx) -> String {
        let user_id = ids::user_token();
        self.subscribers.push(Subscriber {
            user_id: user_id.clone(),
            tx,
        });
        log::info!(
            "session {}: user {} attached ({} online)",
            self.record.id,
            user_id,
            self.subscribers.len()
        );

        let init = ServerFrame::Init {
            user_id: user_id.clone(),
            elements: self.record.elements.clone(),
            user_count: self.subscribers.len(),
        };
        self.send_to(&user_id, &init);
        self.broadcast(
            &ServerFrame::UserCount {
                count: self.subscribers.len(),
            },
            None,
        );
        user_id
    }

    fn detach(&mut self, user_id: &str) {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.user_id != user_id);
        if self.subscribers.len() == before {
            return;
        }
        log::info!(
            "session {}: user {} detached ({} online)",
            self.record.id,
            user_id,
            self.subscribers.len()
        );
        self.broadcast(
            &ServerFrame::UserCount {
                count: self.subscribers.len(),
            },
            None,
        );
        self.broadcast(&ServerFrame::user_left(user_id), None);
    }

    async fn apply_create(
        &mut self,
        mut element: Element,
        origin: &Origin,
    ) -> Result<Element, SessionError> {
        self.assign_id(&mut element);
        element.stamp_created(origin.author(), now_millis());

        self.record.elements.push(element.clone());
        if let Err(err) = self.persist().await {
            self.record.elements.pop();
            log::error!(
                "session {}: create refused, persist failed: {}",
                self.record.id,
                err
            );
            return Err(err.into());
        }

        self.broadcast(
            &ServerFrame::Draw {
                element: element.clone(),
            },
            origin.excluded_user(),
        );
        Ok(element)
    }

    async fn apply_create_batch(
        &mut self,
        elements: Vec<Element>,
        origin: &Origin,
    ) -> Result<Vec<Element>, SessionError> {
        let base = self.record.elements.len();
        let mut stored = Vec::with_capacity(elements.len());
        for mut element in elements {
            self.assign_id(&mut element);
            element.stamp_created(origin.author(), now_millis());
            self.record.elements.push(element.clone());
            stored.push(element);
        }

        if let Err(err) = self.persist().await {
            self.record.elements.truncate(base);
            log::error!(
                "session {}: batch refused, persist failed: {}",
                self.record.id,
                err
            );
            return Err(err.into());
        }

        for element in &stored {
            self.broadcast(
                &ServerFrame::Draw {
                    element: element.clone(),
                },
                origin.excluded_user(),
            );
        }
        Ok(stored)
    }

    async fn apply_update(
        &mut self,
        element_id: &str,
        patch: Element,
        origin: &Origin,
    ) -> Result<Element, SessionError> {
        let index = self
            .index_of(element_id)
            .ok_or(SessionError::ElementNotFound)?;
        let prior = self.record.elements[index].clone();

        let mut merged = prior.overlaid_with(&patch);
        merged.set_id(element_id);
        merged.stamp_updated(origin.author(), now_millis());

        self.record.elements[index] = merged.clone();
        if let Err(err) = self.persist().await {
            self.record.elements[index] = prior;
            log::error!(
                "session {}: update refused, persist failed: {}",
                self.record.id,
                err
            );
            return Err(err.into());
        }

        // Every update goes out as a `move` frame; there is only one
        // element-changed notification on the socket.
        self.broadcast(
            &ServerFrame::Move {
                element_id: element_id.to_owned(),
                element: merged.clone(),
            },
            origin.excluded_user(),
        );
        Ok(merged)
    }

    async fn apply_delete(&mut self, element_id: &str, origin: &Origin) -> Result<(), SessionError> {
        let index = self
            .index_of(element_id)
            .ok_or(SessionError::ElementNotFound)?;
        let removed = self.record.elements.remove(index);

        if let Err(err) = self.persist().await {
            self.record.elements.insert(index, removed);
            log::error!(
                "session {}: delete refused, persist failed: {}",
                self.record.id,
                err
            );
            return Err(err.into());
        }

        self.broadcast(
            &ServerFrame::Erase {
                element_id: element_id.to_owned(),
            },
            origin.excluded_user(),
        );
        Ok(())
    }

    async fn apply_clear(&mut self, origin: &Origin) -> Result<(), SessionError> {
        let prior = std::mem::take(&mut self.record.elements);

        if let Err(err) = self.persist().await {
            self.record.elements = prior;
            log::error!(
                "session {}: clear refused, persist failed: {}",
                self.record.id,
                err
            );
            return Err(err.into());
        }

        self.broadcast(&ServerFrame::Clear, origin.excluded_user());
        Ok(())
    }

    async fn apply_move(&mut self, element_id: &str, replacement: Element, origin: &Origin) {
        let Some(index) = self.index_of(element_id) else {
            log::debug!(
                "session {}: move for unknown element {}",
                self.record.id,
                element_id
            );
            return;
        };
        let prior = self.record.elements[index].clone();

        let mut next = replacement;
        next.set_id(element_id);
        next.stamp_moved(origin.author(), now_millis());

        self.record.elements[index] = next.clone();
        if let Err(err) = self.persist().await {
            self.record.elements[index] = prior;
            log::error!(
                "session {}: move dropped, persist failed: {}",
                self.record.id,
                err
            );
            return;
        }

        self.broadcast(
            &ServerFrame::Move {
                element_id: element_id.to_owned(),
                element: next,
            },
            origin.excluded_user(),
        );
    }

    async fn apply_reorder(&mut self, element_id: &str, position: &str, origin: &Origin) {
        if !matches!(position, "front" | "back") {
            log::debug!(
                "session {}: ignoring reorder to {:?}",
                self.record.id,
                position
            );
            return;
        }
        let Some(index) = self.index_of(element_id) else {
            return;
        };

        let prior = self.record.elements.clone();
        let element = self.record.elements.remove(index);
        match position {
            "front" => self.record.elements.push(element),
            _ => self.record.elements.insert(0, element),
        }

        if let Err(err) = self.persist().await {
            self.record.elements = prior;
            log::error!(
                "session {}: reorder dropped, persist failed: {}",
                self.record.id,
                err
            );
            return;
        }

        self.broadcast(
            &ServerFrame::Reorder {
                element_id: element_id.to_owned(),
                position: position.to_owned(),
            },
            origin.excluded_user(),
        );
    }

    /// Cursor frames ride the same ordered stream as mutations but never
    /// touch the store.
    fn relay_cursor(&mut self, x: f64, y: f64, origin: &Origin) {
        let frame = ServerFrame::cursor(x, y, origin.author());
        self.broadcast(&frame, origin.excluded_user());
    }

    fn assign_id(&self, element: &mut Element) {
        // Element ids stay unique within the sequence.
        match element.id() {
            Some(id) if self.index_of(id).is_none() => {}
            _ => element.set_id(&ids::element_id()),
        }
    }

    fn index_of(&self, element_id: &str) -> Option<usize> {
        self.record
            .elements
            .iter()
            .position(|e| e.id() == Some(element_id))
    }

    async fn persist(&self) -> Result<(), StoreError> {
        self.store.put_async(self.record.clone()).await
    }

    /// Encode once, enqueue to every subscriber except `exclude`. A full or
    /// closed outbound queue drops that subscriber only.
    fn broadcast(&mut self, frame: &ServerFrame, exclude: Option<&str>) {
        let payload = frame.encode();
        let mut stale = Vec::new();
        for subscriber in &self.subscribers {
            if exclude == Some(subscriber.user_id.as_str()) {
                continue;
            }
            if subscriber.tx.try_send(payload.clone()).is_err() {
                stale.push(subscriber.user_id.clone());
            }
        }
        for user_id in stale {
            log::warn!(
                "session {}: dropping subscriber {} (outbound queue unavailable)",
                self.record.id,
                user_id
            );
            self.detach(&user_id);
        }
    }

    fn send_to(&mut self, user_id: &str, frame: &ServerFrame) {
        let payload = frame.encode();
        let failed = self
            .subscribers
            .iter()
            .find(|s| s.user_id == user_id)
            .is_some_and(|s| s.tx.try_send(payload).is_err());
        if failed {
            log::warn!(
                "session {}: dropping subscriber {} (outbound queue unavailable)",
                self.record.id,
                user_id
            );
            self.detach(user_id);
        }
    }
}

fn respond<T>(reply: Reply<T>, result: Result<T, SessionError>) {
    match reply {
        Some(reply) => {
            let _ = reply.send(result);
        }
        // Socket-origin commands carry no reply channel; a refused
        // mutation was already logged and the frame is simply dropped.
        None => {}
    }
}
