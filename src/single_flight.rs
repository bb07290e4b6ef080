//! Single-flight async guard
//!
//! At most one underlying call is in flight; callers arriving while it runs
//! await the same result. The slot is cleared when the call completes, so a
//! failed call can be retried by the next caller.

use std::future::Future;
use std::sync::Mutex;

use futures_util::future::{BoxFuture, FutureExt, Shared};

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Memoizes one in-flight operation
pub struct SingleFlight<T, E> {
    inflight: Mutex<Option<Flight<T, E>>>,
}

impl<T, E> Default for SingleFlight<T, E> {
    fn default() -> Self {
        Self {
            inflight: Mutex::new(None),
        }
    }
}

impl<T, E> std::fmt::Debug for SingleFlight<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl<T, E> SingleFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an idle guard
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the in-flight call, or start one with `start`
    ///
    /// `start` is only invoked when nothing is in flight.
    pub async fn run<F, Fut>(&self, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let flight = {
            let mut slot = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match slot.as_ref() {
                Some(flight) => flight.clone(),
                None => {
                    let flight = start().boxed().shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut slot = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *slot = None;
        }

        result
    }
}

impl<T, E> SingleFlight<T, E> {
    /// Whether a call is currently in flight
    pub fn in_flight(&self) -> bool {
        self.inflight
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_call() {
        let guard = Arc::new(SingleFlight::<u32, String>::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let guard = guard.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                guard
                    .run(|| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok(7)
                        }
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!guard.in_flight());
    }

    #[tokio::test]
    async fn test_failure_clears_slot() {
        let guard = SingleFlight::<u32, String>::new();

        let first = guard.run(|| async { Err("down".to_string()) }).await;
        assert_eq!(first, Err("down".to_string()));
        assert!(!guard.in_flight());

        let second = guard.run(|| async { Ok(1) }).await;
        assert_eq!(second, Ok(1));
    }
}
