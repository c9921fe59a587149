use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use tokio::runtime::{Builder, Handle, Runtime};

use crate::errors::BrokerError;

thread_local! {
    /// Context of the worker that owns the current thread, if any.
    static CURRENT_CONTEXT: RefCell<Option<Rc<dyn Any>>> = const { RefCell::new(None) };
}

/// State owned by a vendor worker thread: the client and the runtime that drives it.
///
/// Neither field ever leaves the thread, so the client type does not need to be
/// `Send` or `Sync`.
pub struct WorkerContext<C> {
    vendor: &'static str,
    client: RefCell<C>,
    runtime: Runtime,
}

impl<C: 'static> WorkerContext<C> {
    pub(crate) fn new(vendor: &'static str, client: C) -> Result<Self, BrokerError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .thread_name(format!("{}-worker", vendor))
            .build()
            .map_err(|e| {
                BrokerError::IncompatibleRuntime(format!(
                    "{} worker could not build its runtime: {}",
                    vendor, e
                ))
            })?;

        Ok(Self {
            vendor,
            client: RefCell::new(client),
            runtime,
        })
    }

    pub fn vendor(&self) -> &'static str {
        self.vendor
    }

    /// Lends the client for exactly one vendor call.
    ///
    /// The closure gets the worker runtime to drive the client's futures, e.g.
    /// `ctx.with_client(|client, rt| rt.block_on(client.is_open()))`. A second
    /// borrow while the first is alive fails with [`BrokerError::ClientBusy`].
    pub fn with_client<T>(
        &self,
        f: impl FnOnce(&mut C, &Runtime) -> T,
    ) -> Result<T, BrokerError> {
        if Handle::try_current().is_ok() {
            return Err(BrokerError::IncompatibleRuntime(format!(
                "{} client used from inside a running event loop",
                self.vendor
            )));
        }
        let mut client = self
            .client
            .try_borrow_mut()
            .map_err(|_| BrokerError::ClientBusy {
                vendor: self.vendor,
            })?;
        Ok(f(&mut client, &self.runtime))
    }

    /// Publishes this context as the current thread's worker context.
    pub(super) fn install(self: &Rc<Self>) {
        let erased: Rc<dyn Any> = self.clone();
        CURRENT_CONTEXT.with(|slot| *slot.borrow_mut() = Some(erased));
    }

    pub(super) fn uninstall() {
        CURRENT_CONTEXT.with(|slot| slot.borrow_mut().take());
    }

    /// The context installed on this thread, if it holds a client of type `C`.
    pub(super) fn current() -> Option<Rc<Self>> {
        let erased = CURRENT_CONTEXT.with(|slot| slot.borrow().clone())?;
        erased.downcast::<Self>().ok()
    }
}
