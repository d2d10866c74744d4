//! Ordered, non-blocking event delivery
//!
//! Emitters push onto an unbounded queue and return immediately. A single
//! worker per configured context drains the queue, so delivery order always
//! matches emission order. Reconfiguring the context starts a new worker that
//! waits for the previous one to drain before delivering anything.

use super::{ProductEvent, ProductListener, RegistrationListener, RegistrationOutcome};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

pub const DELIVERY_THREAD_NAME: &str = "aerolink-events";

/// Where listener callbacks run
#[derive(Debug, Clone, Default)]
pub enum ExecutionContext {
    /// A dedicated OS thread owned by the dispatcher
    #[default]
    Dedicated,
    /// A task on the given tokio runtime
    Tokio(Handle),
}

impl ExecutionContext {
    fn label(&self) -> &'static str {
        match self {
            ExecutionContext::Dedicated => "dedicated thread",
            ExecutionContext::Tokio(_) => "tokio runtime",
        }
    }
}

pub type ListenerId = u64;

type ListenerTable = Arc<RwLock<Vec<(ListenerId, Arc<dyn ProductListener>)>>>;

enum Delivery {
    Registration {
        listener: Arc<dyn RegistrationListener>,
        outcome: RegistrationOutcome,
    },
    Product(ProductEvent),
    Barrier(oneshot::Sender<()>),
}

struct Worker {
    tx: mpsc::UnboundedSender<Delivery>,
    drained: oneshot::Receiver<()>,
}

/// Cheap to clone; all clones share one queue and one listener table
#[derive(Clone)]
pub struct EventDispatcher {
    worker: Arc<Mutex<Worker>>,
    listeners: ListenerTable,
    next_id: Arc<AtomicU64>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(ExecutionContext::default())
    }
}

impl EventDispatcher {
    pub fn new(context: ExecutionContext) -> Self {
        let listeners: ListenerTable = Arc::new(RwLock::new(Vec::new()));
        let worker = spawn_worker(&context, listeners.clone(), None);

        Self {
            worker: Arc::new(Mutex::new(worker)),
            listeners,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Switch delivery to another context. Events already queued are still
    /// delivered, on the old context, before anything on the new one.
    pub fn configure(&self, context: ExecutionContext) {
        let mut worker = self.worker.lock();

        // Parking a placeholder lets the old worker's channel close once
        // its sender is dropped below.
        let (placeholder_tx, _) = mpsc::unbounded_channel();
        let (_, placeholder_drained) = oneshot::channel();
        let previous = std::mem::replace(
            &mut *worker,
            Worker {
                tx: placeholder_tx,
                drained: placeholder_drained,
            },
        );
        let Worker { tx, drained } = previous;
        drop(tx);

        *worker = spawn_worker(&context, self.listeners.clone(), Some(drained));
        debug!("[EVENTS] Delivery moved to {}", context.label());
    }

    pub fn add_listener(&self, listener: Arc<dyn ProductListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        id
    }

    /// Returns false if the id was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn emit(&self, event: ProductEvent) {
        self.enqueue(Delivery::Product(event));
    }

    pub fn emit_registration(
        &self,
        listener: Arc<dyn RegistrationListener>,
        outcome: RegistrationOutcome,
    ) {
        self.enqueue(Delivery::Registration { listener, outcome });
    }

    /// Resolves once everything emitted before the call has been delivered
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Delivery::Barrier(tx));
        let _ = rx.await;
    }

    fn enqueue(&self, delivery: Delivery) {
        if self.worker.lock().tx.send(delivery).is_err() {
            error!("[EVENTS] Delivery worker is gone, event dropped");
        }
    }
}

fn spawn_worker(
    context: &ExecutionContext,
    listeners: ListenerTable,
    previous: Option<oneshot::Receiver<()>>,
) -> Worker {
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    let (done_tx, drained) = oneshot::channel();

    match context {
        ExecutionContext::Dedicated => {
            let spawned = std::thread::Builder::new()
                .name(DELIVERY_THREAD_NAME.into())
                .spawn(move || {
                    if let Some(previous) = previous {
                        let _ = previous.blocking_recv();
                    }
                    while let Some(delivery) = rx.blocking_recv() {
                        deliver(&listeners, delivery);
                    }
                    let _ = done_tx.send(());
                });

            if let Err(e) = spawned {
                error!("[EVENTS] Failed to start delivery thread: {}", e);
            }
        }
        ExecutionContext::Tokio(handle) => {
            handle.spawn(async move {
                if let Some(previous) = previous {
                    let _ = previous.await;
                }
                while let Some(delivery) = rx.recv().await {
                    deliver(&listeners, delivery);
                }
                let _ = done_tx.send(());
            });
        }
    }

    Worker { tx, drained }
}

fn deliver(listeners: &ListenerTable, delivery: Delivery) {
    match delivery {
        Delivery::Registration { listener, outcome } => {
            guarded("registration", || listener.on_registration(&outcome));
        }
        Delivery::Product(event) => {
            // Snapshot so listeners may add or remove listeners from a callback
            let snapshot: Vec<Arc<dyn ProductListener>> = listeners
                .read()
                .iter()
                .map(|(_, listener)| listener.clone())
                .collect();

            for listener in snapshot {
                guarded("product", || match &event {
                    ProductEvent::Connected(device) => listener.product_connected(device),
                    ProductEvent::Disconnected { identity } => {
                        listener.product_disconnected(identity)
                    }
                    ProductEvent::ComponentConnected(slot) => listener.component_connected(slot),
                    ProductEvent::ComponentDisconnected(slot) => {
                        listener.component_disconnected(slot)
                    }
                });
            }
        }
        Delivery::Barrier(done) => {
            let _ = done.send(());
        }
    }
}

fn guarded(kind: &str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("[EVENTS] A {} listener panicked; continuing delivery", kind);
    }
}
