//! Trailing-edge debounce.
//!
//! Each key has at most one pending batch. Every call in the batch pushes the
//! deadline out by the debounce window and replaces the operation to run; a
//! driver task sleeps until the deadline stops moving, runs the last
//! operation under the ceiling, and broadcasts its outcome to all callers of
//! the batch over a `watch` channel.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::arbiter::{lock, Inner, Outcome};
use crate::error::ArbiterError;

type PendingOp<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

struct DebounceSlot<T, E> {
    deadline: Instant,
    op: PendingOp<T, E>,
    tx: watch::Sender<Option<Outcome<T, E>>>,
}

enum Step<T, E> {
    Wait(Instant),
    Fire(DebounceSlot<T, E>),
    Gone,
}

pub(crate) async fn call<T, E, F, Fut>(inner: &Arc<Inner>, key: &str, op: F) -> Outcome<T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    let op: PendingOp<T, E> = Box::new(move || op().boxed());
    let deadline = Instant::now() + inner.config.debounce;

    let mut rx = {
        let mut slots = lock(&inner.debounce);
        match slots
            .get_mut(key)
            .and_then(|slot| slot.downcast_mut::<DebounceSlot<T, E>>())
        {
            Some(slot) => {
                tracing::trace!(key, "debounce window reset");
                slot.deadline = deadline;
                slot.op = op;
                slot.tx.subscribe()
            }
            None => {
                let (tx, rx) = watch::channel(None);
                // A slot of another result type is superseded; its callers
                // observe the closed channel.
                slots.insert(key.to_string(), Box::new(DebounceSlot { deadline, op, tx }));
                tokio::spawn(drive::<T, E>(Arc::clone(inner), key.to_string()));
                rx
            }
        }
    };

    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(settled) => settled
            .clone()
            .unwrap_or_else(|| Err(ArbiterError::Aborted("debounce settled without an outcome".to_string()))),
        Err(_) => Err(ArbiterError::Aborted("debounced call was superseded".to_string())),
    };
    outcome
}

async fn drive<T, E>(inner: Arc<Inner>, key: String)
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    loop {
        let step = {
            let mut slots = lock(&inner.debounce);
            let deadline = match slots
                .get(&key)
                .and_then(|slot| slot.downcast_ref::<DebounceSlot<T, E>>())
            {
                Some(slot) => slot.deadline,
                None => return,
            };
            if Instant::now() < deadline {
                Step::Wait(deadline)
            } else {
                match slots.remove(&key).map(|slot| slot.downcast::<DebounceSlot<T, E>>()) {
                    Some(Ok(slot)) => Step::Fire(*slot),
                    _ => Step::Gone,
                }
            }
        };

        match step {
            Step::Wait(deadline) => tokio::time::sleep_until(deadline).await,
            Step::Gone => return,
            Step::Fire(slot) => {
                let outcome = run(&inner, &key, slot.op).await;
                slot.tx.send_replace(Some(outcome));
                return;
            }
        }
    }
}

async fn run<T, E>(inner: &Inner, key: &str, op: PendingOp<T, E>) -> Outcome<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    let Some(permit) = inner.try_permit() else {
        tracing::debug!(key, "concurrency ceiling reached; rejecting debounced request");
        return Err(ArbiterError::TooManyConcurrent);
    };
    tracing::debug!(key, "running debounced request");
    let handle = tokio::spawn(async move {
        let _permit = permit;
        op().await
    });
    match handle.await {
        Ok(result) => result.map_err(ArbiterError::Operation),
        Err(e) => Err(ArbiterError::Aborted(e.to_string())),
    }
}
