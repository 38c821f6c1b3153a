//! Single-flight de-duplication under a concurrency ceiling.
//!
//! Per key the state machine is `IDLE -> IN_FLIGHT -> IDLE`. A call joins
//! the in-flight operation for its key when that entry is younger than the
//! freshness window, and otherwise starts a new one if a ceiling permit is
//! free. Without a permit the call fails with
//! [`ArbiterError::TooManyConcurrent`] and the operation is never invoked.
//!
//! Operations run on their own tokio task, so a caller that stops waiting
//! does not cancel work other callers share. The table entry and the permit
//! are released by drop guards inside that task, on every exit path.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::debounce;
use crate::error::ArbiterError;

pub type Outcome<T, E> = Result<T, ArbiterError<E>>;

pub(crate) type SharedOutcome<T, E> = Shared<BoxFuture<'static, Outcome<T, E>>>;

/// Strategy for one call. The two are alternatives, never combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Share one in-flight execution among concurrent callers of a key.
    SingleFlight,
    /// Collapse a burst of calls for a key into its trailing call.
    Debounce,
}

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    /// Ceiling on operations running at once.
    pub max_concurrent: usize,
    /// In-flight entries older than this are not joined.
    pub freshness: Duration,
    /// Quiet period before a debounced call runs.
    pub debounce: Duration,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 6,
            freshness: Duration::from_secs(5),
            debounce: Duration::from_millis(300),
        }
    }
}

struct InflightEntry {
    id: u64,
    registered_at: Instant,
    /// A `SharedOutcome<T, E>` for the `T`/`E` of the call that registered it.
    shared: Box<dyn Any + Send>,
}

pub(crate) struct Inner {
    pub(crate) config: ArbiterConfig,
    pub(crate) permits: Arc<Semaphore>,
    inflight: Mutex<HashMap<String, InflightEntry>>,
    pub(crate) debounce: Mutex<HashMap<String, Box<dyn Any + Send>>>,
    next_id: AtomicU64,
}

impl Inner {
    pub(crate) fn try_permit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).try_acquire_owned().ok()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Arbitration context. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Arbiter {
    inner: Arc<Inner>,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new(ArbiterConfig::default())
    }
}

impl Arbiter {
    pub fn new(config: ArbiterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(config.max_concurrent)),
                config,
                inflight: Mutex::new(HashMap::new()),
                debounce: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.inner.config
    }

    /// Operations currently holding a ceiling permit.
    pub fn outstanding(&self) -> usize {
        self.inner.config.max_concurrent - self.inner.permits.available_permits()
    }

    /// Keys with a registered single-flight entry, stale or not.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.inflight).len()
    }

    /// Keys with a debounce batch still waiting for its quiet period.
    pub fn pending_debounce(&self) -> usize {
        lock(&self.inner.debounce).len()
    }

    pub async fn call<T, E, F, Fut>(&self, key: &str, mode: CallMode, op: F) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        match mode {
            CallMode::SingleFlight => self.single_flight(key, op).await,
            CallMode::Debounce => debounce::call(&self.inner, key, op).await,
        }
    }

    async fn single_flight<T, E, F, Fut>(&self, key: &str, op: F) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let shared = {
            let mut table = lock(&self.inner.inflight);
            let now = Instant::now();

            match self.joinable::<T, E>(&table, key, now) {
                Some(shared) => {
                    tracing::debug!(key, "joining in-flight request");
                    shared
                }
                None => {
                    let Some(permit) = self.inner.try_permit() else {
                        tracing::debug!(key, "concurrency ceiling reached; rejecting request");
                        return Err(ArbiterError::TooManyConcurrent);
                    };
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    let shared = spawn_operation(Arc::clone(&self.inner), key.to_string(), id, permit, op);
                    table.insert(
                        key.to_string(),
                        InflightEntry {
                            id,
                            registered_at: now,
                            shared: Box::new(shared.clone()),
                        },
                    );
                    shared
                }
            }
        };
        shared.await
    }

    fn joinable<T, E>(
        &self,
        table: &HashMap<String, InflightEntry>,
        key: &str,
        now: Instant,
    ) -> Option<SharedOutcome<T, E>>
    where
        T: Clone + Send + Sync + 'static,
        E: Clone + Send + Sync + 'static,
    {
        let entry = table.get(key)?;
        if now.duration_since(entry.registered_at) >= self.inner.config.freshness {
            tracing::debug!(key, "in-flight entry is stale; starting a new request");
            return None;
        }
        let shared = entry.shared.downcast_ref::<SharedOutcome<T, E>>();
        if shared.is_none() {
            tracing::warn!(key, "in-flight entry has a different result type; starting a new request");
        }
        shared.cloned()
    }
}

/// Removes the table entry it was created for, unless a newer registration
/// has replaced it.
struct InflightRelease {
    inner: Arc<Inner>,
    key: String,
    id: u64,
}

impl Drop for InflightRelease {
    fn drop(&mut self) {
        let mut table = lock(&self.inner.inflight);
        if table.get(&self.key).is_some_and(|e| e.id == self.id) {
            table.remove(&self.key);
        }
    }
}

fn spawn_operation<T, E, F, Fut>(
    inner: Arc<Inner>,
    key: String,
    id: u64,
    permit: OwnedSemaphorePermit,
    op: F,
) -> SharedOutcome<T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let handle = tokio::spawn(async move {
        let _permit = permit;
        let _release = InflightRelease { inner, key, id };
        op().await.map_err(ArbiterError::Operation)
    });

    async move {
        handle
            .await
            .unwrap_or_else(|e| Err(ArbiterError::Aborted(e.to_string())))
    }
    .boxed()
    .shared()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;

    /// Let spawned tasks on the current-thread runtime make progress.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn arbiter(max_concurrent: usize) -> Arbiter {
        Arbiter::new(ArbiterConfig {
            max_concurrent,
            ..ArbiterConfig::default()
        })
    }

    fn counted(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, String>> + Send + 'static {
        let calls = Arc::clone(calls);
        move || {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(value)
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_execution() {
        let arb = arbiter(6);
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b, c) = tokio::join!(
            arb.call("profile-42", CallMode::SingleFlight, counted(&calls, 1)),
            arb.call("profile-42", CallMode::SingleFlight, counted(&calls, 2)),
            arb.call("profile-42", CallMode::SingleFlight, counted(&calls, 3)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!((a, b, c), (Ok(1), Ok(1), Ok(1)));
        assert_eq!(arb.in_flight(), 0);
        assert_eq!(arb.outstanding(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_callers_see_the_same_error() {
        let arb = arbiter(6);
        let calls = Arc::new(AtomicUsize::new(0));
        let failing = |calls: &Arc<AtomicUsize>| {
            let calls = Arc::clone(calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>("upstream 503".to_string())
            }
        };

        let (a, b) = tokio::join!(
            arb.call("k", CallMode::SingleFlight, failing(&calls)),
            arb.call("k", CallMode::SingleFlight, failing(&calls)),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a, Err(ArbiterError::Operation("upstream 503".to_string())));
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_key_runs_again() {
        let arb = arbiter(6);
        let calls = Arc::new(AtomicUsize::new(0));
        assert_eq!(arb.call("k", CallMode::SingleFlight, counted(&calls, 1)).await, Ok(1));
        assert_eq!(arb.call("k", CallMode::SingleFlight, counted(&calls, 2)).await, Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn ceiling_rejects_without_invoking_then_recovers() {
        let arb = arbiter(2);
        let (release_a, wait_a) = oneshot::channel::<()>();
        let (_release_b, wait_b) = oneshot::channel::<()>();

        let a = tokio::spawn({
            let arb = arb.clone();
            async move {
                arb.call("a", CallMode::SingleFlight, move || async move {
                    let _ = wait_a.await;
                    Ok::<_, String>("a")
                })
                .await
            }
        });
        let _b = tokio::spawn({
            let arb = arb.clone();
            async move {
                arb.call("b", CallMode::SingleFlight, move || async move {
                    let _ = wait_b.await;
                    Ok::<_, String>("b")
                })
                .await
            }
        });
        while arb.outstanding() < 2 {
            tokio::task::yield_now().await;
        }

        let invoked = Arc::new(AtomicUsize::new(0));
        let probe = {
            let invoked = Arc::clone(&invoked);
            move || async move {
                invoked.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("c")
            }
        };
        let rejected = arb.call("c", CallMode::SingleFlight, probe.clone()).await;
        assert_eq!(rejected, Err(ArbiterError::TooManyConcurrent));
        assert_eq!(rejected.unwrap_err().to_string(), "Too many concurrent requests");
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        release_a.send(()).unwrap();
        assert_eq!(a.await.unwrap(), Ok("a"));
        assert_eq!(arb.outstanding(), 1);

        assert_eq!(arb.call("c", CallMode::SingleFlight, probe).await, Ok("c"));
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn joining_does_not_need_a_permit() {
        let arb = arbiter(1);
        let (release, wait) = oneshot::channel::<()>();
        let first = tokio::spawn({
            let arb = arb.clone();
            async move {
                arb.call("k", CallMode::SingleFlight, move || async move {
                    let _ = wait.await;
                    Ok::<_, String>(7)
                })
                .await
            }
        });
        while arb.outstanding() < 1 {
            tokio::task::yield_now().await;
        }

        let second = tokio::spawn({
            let arb = arb.clone();
            async move {
                arb.call("k", CallMode::SingleFlight, || async { Ok::<_, String>(99) })
                    .await
            }
        });
        settle().await;
        release.send(()).unwrap();

        assert_eq!(first.await.unwrap(), Ok(7));
        assert_eq!(second.await.unwrap(), Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_entry_is_replaced_and_not_evicted_by_old_completion() {
        let arb = arbiter(6);
        let calls = Arc::new(AtomicUsize::new(0));
        let gated = |calls: &Arc<AtomicUsize>, gate: oneshot::Receiver<()>, value: u32| {
            let calls = Arc::clone(calls);
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let _ = gate.await;
                Ok::<_, String>(value)
            }
        };

        let (release_old, gate_old) = oneshot::channel();
        let old = tokio::spawn({
            let arb = arb.clone();
            let op = gated(&calls, gate_old, 1);
            async move { arb.call("k", CallMode::SingleFlight, op).await }
        });
        settle().await;
        tokio::time::advance(Duration::from_secs(6)).await;

        let (release_new, gate_new) = oneshot::channel();
        let new = tokio::spawn({
            let arb = arb.clone();
            let op = gated(&calls, gate_new, 2);
            async move { arb.call("k", CallMode::SingleFlight, op).await }
        });
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        release_old.send(()).unwrap();
        assert_eq!(old.await.unwrap(), Ok(1));

        // The replacement is still registered, so this call joins it.
        let (_unused, gate_third) = oneshot::channel();
        let third = tokio::spawn({
            let arb = arb.clone();
            let op = gated(&calls, gate_third, 3);
            async move { arb.call("k", CallMode::SingleFlight, op).await }
        });
        settle().await;
        release_new.send(()).unwrap();

        assert_eq!(new.await.unwrap(), Ok(2));
        assert_eq!(third.await.unwrap(), Ok(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicking_operation_releases_its_permit() {
        let arb = arbiter(1);
        let result = arb
            .call("k", CallMode::SingleFlight, || async {
                if true {
                    panic!("boom");
                }
                Ok::<u32, String>(0)
            })
            .await;
        assert!(matches!(result, Err(ArbiterError::Aborted(_))));
        assert_eq!(arb.outstanding(), 0);
        assert_eq!(arb.in_flight(), 0);

        let next = arb
            .call("k", CallMode::SingleFlight, || async { Ok::<u32, String>(1) })
            .await;
        assert_eq!(next, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_caller_does_not_cancel_shared_work() {
        let arb = arbiter(6);
        let finished = Arc::new(AtomicUsize::new(0));
        let op = {
            let finished = Arc::clone(&finished);
            move || async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        };

        let gave_up = tokio::time::timeout(
            Duration::from_millis(10),
            arb.call("k", CallMode::SingleFlight, op),
        )
        .await;
        assert!(gave_up.is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert_eq!(arb.outstanding(), 0);
    }
}
