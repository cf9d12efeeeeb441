//! Cooperative cancellation for blocking work

use crate::error::{Result, UpdateError};
use std::any::Any;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared flag set when a job should stop.
///
/// Blocking git transfers poll it from their progress callbacks; the async
/// side sets it when a timeout expires or the job future is dropped.
///
/// A flag may also own a resource (the update lock) that lives until the
/// last clone is gone. Work started through [`run_blocking`] holds a clone
/// until it returns, so the resource outlives a caller that stopped waiting.
#[derive(Clone, Default)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    held: Option<Arc<dyn Any + Send + Sync>>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// A flag that keeps `resource` alive while any clone exists
    pub fn holding<R: Send + Sync + 'static>(resource: R) -> Self {
        Self {
            cancelled: Arc::default(),
            held: Some(Arc::new(resource)),
        }
    }

    /// A fresh, uncancelled flag sharing this flag's held resource
    pub fn detached(&self) -> Self {
        Self {
            cancelled: Arc::default(),
            held: self.held.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// A guard that cancels this flag when dropped, unless disarmed
    pub fn guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            flag: Some(self.clone()),
        }
    }
}

impl fmt::Debug for CancelFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFlag")
            .field("cancelled", &self.is_cancelled())
            .field("holding", &self.held.is_some())
            .finish()
    }
}

/// Cancels its flag on drop
#[derive(Debug)]
pub struct CancelOnDrop {
    flag: Option<CancelFlag>,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.flag = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(flag) = &self.flag {
            flag.cancel();
        }
    }
}

/// Run `work` on the blocking pool, optionally bounded by `limit`.
///
/// On timeout the flag is set so the work stops at its next check, and
/// `NetworkUnavailable` is returned. Whatever the flag holds stays alive
/// until `work` returns, even when this future is dropped or times out.
pub(crate) async fn run_blocking<T, F>(
    cancel: &CancelFlag,
    limit: Option<Duration>,
    what: &str,
    work: F,
) -> Result<T>
where
    F: FnOnce(CancelFlag) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    if cancel.is_cancelled() {
        return Err(UpdateError::Cancelled);
    }

    let flag = cancel.clone();
    let task = tokio::task::spawn_blocking(move || {
        let keep = flag.clone();
        let result = work(flag);
        drop(keep);
        result
    });
    let joined = match limit {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined,
            Err(_) => {
                cancel.cancel();
                return Err(UpdateError::network(format!(
                    "{} timed out after {}s",
                    what,
                    limit.as_secs()
                )));
            }
        },
        None => task.await,
    };

    joined.map_err(|e| {
        UpdateError::Io(io::Error::other(format!("{} did not complete: {}", what, e)))
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancelFlag::new();
        let other = flag.clone();
        assert!(!other.is_cancelled());
        flag.cancel();
        assert!(other.is_cancelled());
    }

    #[test]
    fn test_guard_cancels_on_drop() {
        let flag = CancelFlag::new();
        drop(flag.guard());
        assert!(flag.is_cancelled());
    }

    #[test]
    fn test_disarmed_guard_does_not_cancel() {
        let flag = CancelFlag::new();
        flag.guard().disarm();
        assert!(!flag.is_cancelled());
    }

    struct DropMarker(Arc<AtomicBool>);

    impl Drop for DropMarker {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_held_resource_lives_until_last_clone() {
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = CancelFlag::holding(DropMarker(dropped.clone()));
        let detached = flag.detached();
        flag.cancel();
        assert!(!detached.is_cancelled());

        drop(flag);
        assert!(!dropped.load(Ordering::SeqCst));
        drop(detached);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_abandoned_work_keeps_held_resource() {
        let dropped = Arc::new(AtomicBool::new(false));
        let finished = Arc::new(AtomicBool::new(false));
        let flag = CancelFlag::holding(DropMarker(dropped.clone()));

        let done = finished.clone();
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            run_blocking(&flag, None, "slow work", move |_| {
                std::thread::sleep(Duration::from_millis(300));
                done.store(true, Ordering::SeqCst);
                Ok(())
            }),
        )
        .await;
        assert!(result.is_err());
        drop(flag);

        // The blocking work still owns a clone
        assert!(!dropped.load(Ordering::SeqCst));
        for _ in 0..100 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(finished.load(Ordering::SeqCst));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_blocking_returns_value() {
        let flag = CancelFlag::new();
        let value = run_blocking(&flag, None, "work", |_| Ok(7)).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_blocking_timeout_cancels() {
        let flag = CancelFlag::new();
        let result: Result<()> = run_blocking(
            &flag,
            Some(Duration::from_millis(50)),
            "slow work",
            |flag| {
                while !flag.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(UpdateError::Cancelled)
            },
        )
        .await;

        assert!(matches!(result, Err(UpdateError::NetworkUnavailable { .. })));
        assert!(flag.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_blocking_refuses_when_cancelled() {
        let flag = CancelFlag::new();
        flag.cancel();
        let result = run_blocking(&flag, None, "work", |_| Ok(())).await;
        assert!(matches!(result, Err(UpdateError::Cancelled)));
    }
}
