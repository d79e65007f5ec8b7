//! Observer registry and ordered execution queue.
//!
//! Every committed config transition is enqueued as its own batch; a single
//! worker drains batches strictly in commit order, so a slow observer never
//! reorders or drops a transition. Within one batch the registered
//! observers run concurrently and failures are isolated per observer.
//!
//! Registration is a setup-phase activity: once the queue is sealed,
//! further registration is a programming error and panics.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use opt_core::config::{ConfigKey, ConfigRecord};

/// Error returned by an observer callback. Failures are logged and isolated;
/// they never abort sibling observers or later batches.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

type ObserverFuture = Pin<Box<dyn Future<Output = Result<(), ObserverError>> + Send>>;
type ObserverFn =
    Arc<dyn Fn(Arc<ConfigRecord>, Arc<ConfigRecord>) -> ObserverFuture + Send + Sync>;

/// Resolves once the observer has completed its first run against a real
/// transition; startup code awaits this to know its reaction has applied.
pub struct FirstRun(oneshot::Receiver<Result<(), ObserverError>>);

impl FirstRun {
    pub async fn wait(self) -> Result<(), ObserverError> {
        match self.0.await {
            Ok(result) => result,
            Err(_) => Err(ObserverError(
                "observer queue dropped before first run".to_string(),
            )),
        }
    }
}

struct Registration {
    name: String,
    scope: Option<ConfigKey>,
    callback: ObserverFn,
    first_run: Option<oneshot::Sender<Result<(), ObserverError>>>,
}

struct Transition {
    new: Arc<ConfigRecord>,
    old: Arc<ConfigRecord>,
}

/// The registry plus its execution queue.
pub struct ObserverQueue {
    tx: mpsc::UnboundedSender<Transition>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Transition>>>,
    registrations: Mutex<Vec<Registration>>,
    sealed: AtomicBool,
    depth_tx: watch::Sender<usize>,
}

impl ObserverQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (depth_tx, _) = watch::channel(0usize);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            registrations: Mutex::new(Vec::new()),
            sealed: AtomicBool::new(false),
            depth_tx,
        }
    }

    /// Register an observer that fires on every committed transition.
    ///
    /// # Panics
    ///
    /// Panics when called after [`seal`](Self::seal); observers must be
    /// known before the first transition is processed.
    pub fn add_listener<F, Fut>(&self, name: impl Into<String>, callback: F) -> FirstRun
    where
        F: Fn(Arc<ConfigRecord>, Arc<ConfigRecord>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ObserverError>> + Send + 'static,
    {
        self.register(name.into(), None, callback)
    }

    /// Register an observer that only fires when the named top-level key's
    /// value actually changed between the old and new record.
    ///
    /// # Panics
    ///
    /// Panics when called after [`seal`](Self::seal).
    pub fn add_scoped_listener<F, Fut>(
        &self,
        name: impl Into<String>,
        scope: ConfigKey,
        callback: F,
    ) -> FirstRun
    where
        F: Fn(Arc<ConfigRecord>, Arc<ConfigRecord>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ObserverError>> + Send + 'static,
    {
        self.register(name.into(), Some(scope), callback)
    }

    fn register<F, Fut>(&self, name: String, scope: Option<ConfigKey>, callback: F) -> FirstRun
    where
        F: Fn(Arc<ConfigRecord>, Arc<ConfigRecord>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ObserverError>> + Send + 'static,
    {
        assert!(
            !self.sealed.load(Ordering::SeqCst),
            "observer {name:?} registered after setup phase"
        );
        let (first_tx, first_rx) = oneshot::channel();
        let callback: ObserverFn =
            Arc::new(move |new, old| Box::pin(callback(new, old)) as ObserverFuture);
        self.registrations.lock().unwrap().push(Registration {
            name,
            scope,
            callback,
            first_run: Some(first_tx),
        });
        FirstRun(first_rx)
    }

    /// End the setup phase and start the worker that drains transitions in
    /// commit order.
    pub fn seal(self: &Arc<Self>) {
        if self.sealed.swap(true, Ordering::SeqCst) {
            return;
        }
        let rx = self
            .rx
            .lock()
            .unwrap()
            .take()
            .expect("observer queue sealed twice");
        let registrations = std::mem::take(&mut *self.registrations.lock().unwrap());
        let queue = Arc::clone(self);
        tokio::spawn(queue.run(rx, registrations));
    }

    /// Enqueue one transition. Never blocks the caller; the batch runs after
    /// every previously enqueued batch has settled.
    pub fn execute(&self, new: Arc<ConfigRecord>, old: Arc<ConfigRecord>) {
        self.depth_tx.send_modify(|depth| *depth += 1);
        if self.tx.send(Transition { new, old }).is_err() {
            // Worker is gone; only possible during teardown.
            self.depth_tx.send_modify(|depth| *depth -= 1);
            log::debug!("transition dropped after observer queue shutdown");
        }
    }

    /// Resolves once every currently pending batch has settled.
    pub async fn wait_for_idle(&self) {
        let mut rx = self.depth_tx.subscribe();
        // Outcome of wait_for is only Err when the sender is gone, which
        // also means nothing is pending anymore.
        let _ = rx.wait_for(|depth| *depth == 0).await;
    }

    async fn run(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<Transition>,
        mut registrations: Vec<Registration>,
    ) {
        while let Some(Transition { new, old }) = rx.recv().await {
            let mut batch: JoinSet<(usize, Result<(), ObserverError>)> = JoinSet::new();

            for (index, registration) in registrations.iter().enumerate() {
                let fires = match registration.scope {
                    None => true,
                    Some(key) => new.slice(key) != old.slice(key),
                };
                if !fires {
                    continue;
                }
                let future = (registration.callback)(Arc::clone(&new), Arc::clone(&old));
                batch.spawn(async move { (index, future.await) });
            }

            while let Some(joined) = batch.join_next().await {
                match joined {
                    Ok((index, result)) => {
                        let registration = &mut registrations[index];
                        if let Err(e) = &result {
                            log::warn!("observer {:?} failed: {e}", registration.name);
                        }
                        if let Some(first_run) = registration.first_run.take() {
                            let _ = first_run.send(result);
                        }
                    }
                    Err(join_error) => {
                        log::warn!("observer task aborted: {join_error}");
                    }
                }
            }

            self.depth_tx.send_modify(|depth| *depth -= 1);
        }
    }
}

impl Default for ObserverQueue {
    fn default() -> Self {
        Self::new()
    }
}
