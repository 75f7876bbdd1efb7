//! In-memory host, document and client used by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use easel_comfyui::{Client, ClientMessage, ComfyWorkflow, Connection, MessageStream, TransportError};
use easel_core::{Bounds, CoreError, Extent, Image, ImageCollection, Mask};
use easel_generation::{Document, Host, Layer, LayerId};
use futures::channel::mpsc;
use futures::StreamExt;

pub type SessionSender = mpsc::UnboundedSender<Result<ClientMessage, TransportError>>;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Scripted [`Client`]: hands out queued job ids and listening sessions.
///
/// When no session is queued, `listen` returns a stream that never yields.
#[derive(Default)]
pub struct FakeClient {
    sessions: Mutex<VecDeque<Result<MessageStream, TransportError>>>,
    ids: Mutex<VecDeque<String>>,
    enqueued: Mutex<Vec<ComfyWorkflow>>,
    next_id: AtomicUsize,
    listen_calls: AtomicUsize,
    interrupts: AtomicUsize,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ids returned by the next `enqueue` calls, in order.
    pub fn with_ids(ids: &[&str]) -> Arc<Self> {
        let client = Self::default();
        client
            .ids
            .lock()
            .unwrap()
            .extend(ids.iter().map(|id| id.to_string()));
        Arc::new(client)
    }

    /// Queue a session and return the sender feeding it.
    pub fn push_session(&self) -> SessionSender {
        let (tx, rx) = mpsc::unbounded();
        self.sessions.lock().unwrap().push_back(Ok(rx.boxed()));
        tx
    }

    /// Make the next `listen` call fail.
    pub fn push_listen_error(&self, error: TransportError) {
        self.sessions.lock().unwrap().push_back(Err(error));
    }

    pub fn enqueued(&self) -> Vec<ComfyWorkflow> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn listen_calls(&self) -> usize {
        self.listen_calls.load(Ordering::SeqCst)
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Client for FakeClient {
    async fn enqueue(&self, workflow: &ComfyWorkflow) -> Result<String, TransportError> {
        self.enqueued.lock().unwrap().push(workflow.clone());
        let scripted = self.ids.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or_else(|| {
            format!("job-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
        }))
    }

    async fn interrupt(&self) -> Result<(), TransportError> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn listen(&self) -> Result<MessageStream, TransportError> {
        self.listen_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.sessions.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(futures::stream::pending().boxed()))
    }
}

/// A connection already attached to `client`.
pub fn connected(client: Arc<FakeClient>) -> Arc<Connection> {
    let connection = Connection::new();
    connection.attach(client);
    Arc::new(connection)
}

// ---------------------------------------------------------------------------
// Document / layers / host
// ---------------------------------------------------------------------------

pub struct FakeLayer {
    id: LayerId,
    name: Mutex<String>,
    bounds: Bounds,
    visible: AtomicBool,
    locked: AtomicBool,
    removed: AtomicBool,
}

impl FakeLayer {
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

impl Layer for FakeLayer {
    fn id(&self) -> LayerId {
        self.id
    }

    fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    fn set_name(&self, name: &str) {
        *self.name.lock().unwrap() = name.to_string();
    }

    fn is_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    fn remove(&self) {
        self.removed.store(true, Ordering::SeqCst);
    }
}

pub struct FakeDocument {
    extent: Extent,
    selection: Mutex<Option<Mask>>,
    active: AtomicBool,
    valid: AtomicBool,
    layers: Mutex<Vec<Arc<FakeLayer>>>,
    next_layer: AtomicU64,
}

impl FakeDocument {
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            extent: Extent::new(width, height),
            selection: Mutex::new(None),
            active: AtomicBool::new(true),
            valid: AtomicBool::new(true),
            layers: Mutex::new(Vec::new()),
            next_layer: AtomicU64::new(1),
        })
    }

    pub fn select(&self, bounds: Bounds) {
        *self.selection.lock().unwrap() = Some(Mask::rectangle(bounds));
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn close(&self) {
        self.valid.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn layers(&self) -> Vec<Arc<FakeLayer>> {
        self.layers.lock().unwrap().clone()
    }
}

impl Document for FakeDocument {
    fn extent(&self) -> Extent {
        self.extent
    }

    fn create_mask_from_selection(&self) -> Option<Mask> {
        self.selection.lock().unwrap().clone()
    }

    fn get_image(&self, _exclude_layer: Option<&dyn Layer>) -> Image {
        Image::blank(self.extent)
    }

    fn insert_layer(
        &self,
        name: &str,
        _image: &Image,
        bounds: Bounds,
    ) -> Result<Arc<dyn Layer>, CoreError> {
        let layer = Arc::new(FakeLayer {
            id: self.next_layer.fetch_add(1, Ordering::SeqCst),
            name: Mutex::new(name.to_string()),
            bounds,
            visible: AtomicBool::new(true),
            locked: AtomicBool::new(true),
            removed: AtomicBool::new(false),
        });
        self.layers.lock().unwrap().push(Arc::clone(&layer));
        Ok(layer)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::SeqCst)
    }
}

/// Host whose active document is switched by the test.
#[derive(Default)]
pub struct FakeHost {
    active: Mutex<Option<Arc<FakeDocument>>>,
}

impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `document` the active one, deactivating the previous.
    pub fn activate(&self, document: &Arc<FakeDocument>) {
        let mut active = self.active.lock().unwrap();
        if let Some(previous) = active.take() {
            previous.set_active(false);
        }
        document.set_active(true);
        *active = Some(Arc::clone(document));
    }

    pub fn clear(&self) {
        if let Some(previous) = self.active.lock().unwrap().take() {
            previous.set_active(false);
        }
    }
}

impl Host for FakeHost {
    fn active_document(&self) -> Option<Arc<dyn Document>> {
        self.active
            .lock()
            .unwrap()
            .clone()
            .map(|doc| doc as Arc<dyn Document>)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn images(count: usize) -> ImageCollection {
    (0..count).map(|_| Image::blank(Extent::new(8, 8))).collect()
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not met within 2s");
}
