use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::config::ShutdownConfig;
use crate::diagnostic::{CloseHook, CloseOrigin, CloseReason};
use crate::error::Result;
use crate::participants::Participants;
use crate::registry::WaitRegistry;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Graceful shutdown coordinator.
///
/// Cheap to clone; every clone shares the same state. Construct one per
/// process (or per test) and pass it to everything that loops or waits.
#[derive(Clone)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

struct Inner {
    config: ShutdownConfig,
    shutdown_token: CancellationToken,
    finished_token: CancellationToken,
    closing: AtomicBool,
    waits: WaitRegistry,
    participants: Participants,
    before_close: Mutex<Option<Callback>>,
    after_close: Mutex<Option<Callback>>,
    close_hook: Mutex<Option<CloseHook>>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::with_config(ShutdownConfig::default())
    }

    pub fn with_config(config: ShutdownConfig) -> Self {
        debug!(
            capture_backtrace = config.capture_backtrace,
            drain_warn_secs = config.drain_warn_secs,
            "create new shutdown coordinator"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                shutdown_token: CancellationToken::new(),
                finished_token: CancellationToken::new(),
                closing: AtomicBool::new(false),
                waits: WaitRegistry::new(),
                participants: Participants::new(),
                before_close: Mutex::new(None),
                after_close: Mutex::new(None),
                close_hook: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ShutdownConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    /// Resolves once the coordinator has been closed.
    pub async fn closed(&self) {
        self.inner.shutdown_token.cancelled().await
    }

    /// Resolves once every loop has exited and the after-close callback,
    /// if any, has returned or panicked.
    pub async fn finished(&self) {
        self.inner.finished_token.cancelled().await
    }

    /// Token cancelled when the coordinator closes.
    pub fn subscribe(&self) -> CancellationToken {
        self.inner.shutdown_token.child_token()
    }

    /// Run `f` synchronously at the start of the close sequence, while
    /// `is_closed` still reports false. Replaces any earlier callback; has
    /// no effect once closing has begun.
    pub fn on_before_close<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *lock(&self.inner.before_close) = Some(Box::new(f));
    }

    /// Run `f` once after close, when every loop has exited. Replaces any
    /// earlier callback. Setting it after close is best-effort: it fires
    /// only if the drain has not completed yet.
    pub fn on_closed<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *lock(&self.inner.after_close) = Some(Box::new(f));
    }

    /// Observe every close request. Called after the default log line.
    /// A `close` issued from inside the hook does not invoke it again.
    pub fn on_close_requested<F>(&self, f: F)
    where
        F: Fn(&CloseOrigin) + Send + Sync + 'static,
    {
        *lock(&self.inner.close_hook) = Some(Arc::new(f));
    }

    /// Close the coordinator. Idempotent: only the first call runs the
    /// close sequence, concurrent and later calls return immediately.
    /// Does not wait for loops to exit; await `finished` for that.
    #[track_caller]
    pub fn close(&self) {
        self.request_close(CloseReason::Requested, Location::caller());
    }

    pub(crate) fn request_close(&self, reason: CloseReason, location: &'static Location<'static>) {
        let first = self
            .inner
            .closing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        let origin = CloseOrigin::new(
            reason,
            location,
            self.inner.config.capture_backtrace,
            first,
        );
        origin.log();
        let hook = lock(&self.inner.close_hook).clone();
        if let Some(hook) = hook {
            // a hook calling close() again must not re-enter itself
            if let Some(_entered) = HookEntered::enter() {
                hook(&origin);
            }
        }

        if first {
            self.close_sequence();
        }
    }

    fn close_sequence(&self) {
        // steps after the before callback run on drop, so a panicking
        // callback still leaves the coordinator closed
        let _finish = FinishClose(self);

        let before = lock(&self.inner.before_close).take();
        if let Some(before) = before {
            debug!("run before close callback");
            before();
        }
    }

    fn finish_close(&self) {
        self.inner.shutdown_token.cancel();
        self.inner.participants.seal();

        let cancelled = self.inner.waits.cancel_all();
        debug!(
            waits = cancelled,
            participants = self.inner.participants.active(),
            "shutdown closed, drain participants"
        );

        let inner = self.inner.clone();
        spawn_detached(async move {
            // resolves finished() even if the after callback panics
            let _finished = inner.finished_token.clone().drop_guard();

            inner
                .participants
                .drained(inner.config.drain_warn_after())
                .await;

            let after = lock(&inner.after_close).take();
            if let Some(after) = after {
                debug!("run after close callback");
                after();
            }
            info!("shutdown complete");
        });
    }

    /// Cancel every outstanding wait without closing. Returns how many
    /// waits were interrupted.
    pub fn stop_all_wait(&self) -> usize {
        self.inner.waits.cancel_all()
    }

    /// Cancel the outstanding waits registered under `key`. Returns how
    /// many waits were interrupted.
    pub fn stop_wait(&self, key: &str) -> usize {
        self.inner.waits.cancel_group(key)
    }

    /// Sleep for `duration` unless interrupted. Returns true if the full
    /// duration elapsed, false if the coordinator was closed or the wait
    /// was stopped.
    pub async fn wait(&self, duration: Duration) -> bool {
        self.wait_key("", duration).await
    }

    /// Like `wait`, grouped under `key` so `stop_wait(key)` can interrupt it.
    pub async fn wait_key(&self, key: &str, duration: Duration) -> bool {
        if self.is_closed() {
            return false;
        }

        // child of the shutdown token: a close racing this registration
        // still cancels the entry
        let entry = self
            .inner
            .waits
            .register(key, self.inner.shutdown_token.child_token());

        tokio::select! {
            biased;
            _ = entry.cancelled() => {
                trace!(wait_id = entry.id(), "wait interrupted");
                false
            }
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Call `body` with index 0, 1, 2, ... until the coordinator closes.
    /// Returns once closed and the running iteration has finished. The
    /// after-close callback waits for every running loop to return.
    pub async fn run_loop<F, Fut>(&self, mut body: F) -> Result<()>
    where
        F: FnMut(u64, Shutdown) -> Fut,
        Fut: Future<Output = ()>,
    {
        let _participant = self.inner.participants.join();

        let mut index: u64 = 0;
        while !self.is_closed() {
            trace!(index = index, "loop iteration");
            body(index, self.clone()).await;
            index += 1;
        }

        debug!(iterations = index, "loop exit");
        Ok(())
    }

    pub fn pending_waits(&self) -> usize {
        self.inner.waits.len()
    }

    pub fn participants(&self) -> usize {
        self.inner.participants.active()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shutdown")
            .field("closed", &self.is_closed())
            .field("pending_waits", &self.pending_waits())
            .field("participants", &self.participants())
            .finish_non_exhaustive()
    }
}

struct FinishClose<'a>(&'a Shutdown);

impl Drop for FinishClose<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            error!("before close callback panicked, finish close anyway");
        }
        self.0.finish_close();
    }
}

thread_local! {
    static IN_CLOSE_HOOK: Cell<bool> = const { Cell::new(false) };
}

// Marks the current thread as running the close hook until dropped.
struct HookEntered;

impl HookEntered {
    fn enter() -> Option<Self> {
        if IN_CLOSE_HOOK.with(|entered| entered.replace(true)) {
            return None;
        }
        Some(HookEntered)
    }
}

impl Drop for HookEntered {
    fn drop(&mut self) {
        IN_CLOSE_HOOK.with(|entered| entered.set(false));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Spawn on the current runtime, or on a dedicated thread with its own
// runtime when called from outside one.
fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
        return;
    }

    let spawned = std::thread::Builder::new()
        .name("shutdown-drain".to_string())
        .spawn(move || match Builder::new_current_thread().enable_time().build() {
            Ok(runtime) => runtime.block_on(future),
            Err(e) => error!(error = ?e, "fail build runtime for shutdown drain"),
        });
    if let Err(e) = spawned {
        error!(error = ?e, "fail spawn shutdown drain thread");
    }
}
