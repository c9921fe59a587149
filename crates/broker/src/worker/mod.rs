//! Single-thread actor that owns a vendor client.
//!
//! Vendor client libraries are blocking, keep per-thread state and must never see
//! two calls at once. [`ClientWorker`] gives each vendor one dedicated OS thread
//! with its own current-thread tokio runtime. Callers submit closures over a
//! channel and await the reply; the closures run one at a time, in order.

mod context;

pub use context::WorkerContext;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};

use crate::errors::BrokerError;

type Job<C> = Box<dyn FnOnce(&WorkerContext<C>) + Send + 'static>;
type ClientFactory<C> = Box<dyn FnOnce() -> C + Send + 'static>;
type Reply<T> = oneshot::Receiver<thread::Result<T>>;

struct WorkerHandle<C> {
    tx: mpsc::UnboundedSender<Job<C>>,
    thread_id: ThreadId,
    join: JoinHandle<()>,
}

/// Handle to a vendor worker thread.
///
/// The thread is spawned lazily by the first submitted job and lives until
/// [`shutdown`](Self::shutdown) (or until the worker is dropped, which closes
/// the channel and lets the thread drain and exit).
pub struct ClientWorker<C: 'static> {
    vendor: &'static str,
    factory: Mutex<Option<ClientFactory<C>>>,
    handle: Mutex<Option<WorkerHandle<C>>>,
}

impl<C: 'static> ClientWorker<C> {
    /// Creates a worker whose client is built by `factory` on the worker thread.
    pub fn new(vendor: &'static str, factory: impl FnOnce() -> C + Send + 'static) -> Self {
        Self {
            vendor,
            factory: Mutex::new(Some(Box::new(factory))),
            handle: Mutex::new(None),
        }
    }

    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    fn lock_factory(&self) -> MutexGuard<'_, Option<ClientFactory<C>>> {
        self.factory.lock().unwrap_or_else(|poisoned| {
            warn!("{} worker factory mutex was poisoned, recovering", self.vendor);
            poisoned.into_inner()
        })
    }

    fn lock_handle(&self) -> MutexGuard<'_, Option<WorkerHandle<C>>> {
        self.handle.lock().unwrap_or_else(|poisoned| {
            warn!("{} worker handle mutex was poisoned, recovering", self.vendor);
            poisoned.into_inner()
        })
    }

    /// Whether the worker thread has been started and is still alive.
    pub fn is_running(&self) -> bool {
        self.lock_handle()
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
    }

    /// Whether the calling thread is this worker's thread.
    fn on_worker_thread(&self) -> bool {
        let current = thread::current().id();
        self.lock_handle()
            .as_ref()
            .is_some_and(|handle| handle.thread_id == current)
    }

    /// Runs `op` directly when already on the worker thread; hands it back otherwise.
    fn try_inline<T, F>(&self, op: F) -> Result<T, F>
    where
        F: FnOnce(&WorkerContext<C>) -> T,
    {
        if !self.on_worker_thread() {
            return Err(op);
        }
        match WorkerContext::<C>::current() {
            Some(ctx) => Ok(op(&ctx)),
            None => Err(op),
        }
    }

    /// Returns a sender to the worker thread, spawning the thread on first use.
    ///
    /// Never waits for the thread to come up: jobs queue on the channel until the
    /// client is built. A worker that fails to start drops the queue, so waiting
    /// callers see [`BrokerError::WorkerUnavailable`].
    fn sender(&self) -> Result<mpsc::UnboundedSender<Job<C>>, BrokerError> {
        let mut handle = self.lock_handle();
        if let Some(existing) = handle.as_ref() {
            return Ok(existing.tx.clone());
        }

        let factory = self
            .lock_factory()
            .take()
            .ok_or(BrokerError::WorkerUnavailable {
                vendor: self.vendor,
            })?;
        let spawned = self.spawn(factory)?;
        let tx = spawned.tx.clone();
        *handle = Some(spawned);
        Ok(tx)
    }

    fn spawn(&self, factory: ClientFactory<C>) -> Result<WorkerHandle<C>, BrokerError> {
        let vendor = self.vendor;
        let (tx, rx) = mpsc::unbounded_channel::<Job<C>>();

        let join = thread::Builder::new()
            .name(format!("{}-worker", vendor))
            .spawn(move || run_worker(vendor, factory, rx))
            .map_err(|e| {
                error!("Failed to spawn {} worker thread: {}", vendor, e);
                BrokerError::WorkerUnavailable { vendor }
            })?;

        debug!("{} worker spawned on thread {:?}", vendor, join.thread().id());
        Ok(WorkerHandle {
            tx,
            thread_id: join.thread().id(),
            join,
        })
    }

    /// Queues `op` on the worker and returns the receiver for its outcome.
    fn submit<T, F>(&self, op: F) -> Result<Reply<T>, BrokerError>
    where
        F: FnOnce(&WorkerContext<C>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let tx = self.sender()?;
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job<C> = Box::new(move |ctx| {
            let outcome = catch_unwind(AssertUnwindSafe(|| op(ctx)));
            // The caller may have gone away; nothing to do then
            let _ = reply_tx.send(outcome);
        });
        tx.send(job).map_err(|_| BrokerError::WorkerUnavailable {
            vendor: self.vendor,
        })?;
        Ok(reply_rx)
    }

    fn settle<T>(
        vendor: &'static str,
        reply: Result<thread::Result<T>, oneshot::error::RecvError>,
    ) -> Result<T, BrokerError> {
        match reply {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => {
                error!("{} worker job panicked", vendor);
                Err(BrokerError::JobAborted { vendor })
            }
            Err(_) => Err(BrokerError::WorkerUnavailable { vendor }),
        }
    }

    /// Runs `op` on the worker thread and awaits its result.
    ///
    /// When called from the worker thread itself, `op` runs inline.
    pub async fn execute<T, F>(&self, op: F) -> Result<T, BrokerError>
    where
        F: FnOnce(&WorkerContext<C>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let op = match self.try_inline(op) {
            Ok(value) => return Ok(value),
            Err(op) => op,
        };
        let reply = self.submit(op)?;
        Self::settle(self.vendor, reply.await)
    }

    /// Blocking form of [`execute`](Self::execute) for synchronous callers.
    ///
    /// Refuses to block a thread that is driving an async runtime and returns
    /// [`BrokerError::IncompatibleRuntime`] instead.
    pub fn execute_blocking<T, F>(&self, op: F) -> Result<T, BrokerError>
    where
        F: FnOnce(&WorkerContext<C>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let op = match self.try_inline(op) {
            Ok(value) => return Ok(value),
            Err(op) => op,
        };
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BrokerError::IncompatibleRuntime(format!(
                "blocking {} call made from inside an async runtime, use execute().await",
                self.vendor
            )));
        }
        let reply = self.submit(op)?;
        Self::settle(self.vendor, reply.blocking_recv())
    }

    /// Stops the worker: queued jobs drain, then the thread exits and is joined.
    ///
    /// Later submissions fail with [`BrokerError::WorkerUnavailable`].
    pub async fn shutdown(&self) {
        self.lock_factory().take();
        let Some(WorkerHandle {
            tx,
            thread_id,
            join,
        }) = self.lock_handle().take()
        else {
            return;
        };
        drop(tx);

        if thread::current().id() == thread_id {
            // Cannot join ourselves; the loop ends once this job returns
            return;
        }
        match tokio::task::spawn_blocking(move || join.join()).await {
            Ok(Ok(())) => info!("{} worker stopped", self.vendor),
            Ok(Err(_)) => error!("{} worker thread panicked", self.vendor),
            Err(e) => warn!("Failed to join {} worker: {}", self.vendor, e),
        }
    }
}

fn run_worker<C: 'static>(
    vendor: &'static str,
    factory: ClientFactory<C>,
    mut rx: mpsc::UnboundedReceiver<Job<C>>,
) {
    let client = match catch_unwind(AssertUnwindSafe(factory)) {
        Ok(client) => client,
        Err(_) => {
            error!("{} worker failed to start: client factory panicked", vendor);
            return;
        }
    };
    let ctx = match WorkerContext::new(vendor, client) {
        Ok(ctx) => Rc::new(ctx),
        Err(e) => {
            error!("{} worker failed to start: {}", vendor, e);
            return;
        }
    };
    ctx.install();
    info!("{} worker started", vendor);

    let mut processed: u64 = 0;
    while let Some(job) = rx.blocking_recv() {
        job(&ctx);
        processed += 1;
    }

    WorkerContext::<C>::uninstall();
    debug!("{} worker exiting after {} jobs", vendor, processed);
}
