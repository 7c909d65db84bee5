//! Cancellable background work owned by an element.

use std::future::Future;
use std::sync::Mutex;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::element::lock;

/// Holds at most one background task and stops it on demand.
///
/// Elements keep one of these for periodic refreshes and call
/// [`TaskSlot::stop`] from `close`.
#[derive(Debug, Default)]
pub struct TaskSlot {
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `work` on the current Tokio runtime, stopping any task already
    /// held. `work` receives a token that is cancelled by [`TaskSlot::stop`].
    ///
    /// Returns false, without running `work`, when called outside a runtime.
    pub fn spawn<F, Fut>(&self, work: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No Tokio runtime, background task not started");
            return false;
        };

        let token = CancellationToken::new();
        let handle = runtime.spawn(work(token.clone()));
        if let Some((previous, task)) = lock(&self.running).replace((token, handle)) {
            previous.cancel();
            task.abort();
        }
        true
    }

    /// Cancel and abort the held task. Returns true if one was running.
    pub fn stop(&self) -> bool {
        match lock(&self.running).take() {
            Some((token, task)) => {
                token.cancel();
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|(_, task)| !task.is_finished())
    }
}

impl Drop for TaskSlot {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_stop_cancels_work() {
        let slot = TaskSlot::new();
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();

        slot.spawn(|token| async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(1)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(slot.is_running());
        assert!(slot.stop());
        assert!(!slot.stop());

        tokio::time::sleep(Duration::from_millis(5)).await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
        assert!(!slot.is_running());
    }

    #[test]
    fn test_spawn_outside_runtime() {
        let slot = TaskSlot::new();
        assert!(!slot.spawn(|_token| std::future::pending::<()>()));
        assert!(!slot.is_running());
        assert!(!slot.stop());
    }

    #[tokio::test]
    async fn test_spawn_replaces_previous() {
        struct Notify(tokio::sync::mpsc::UnboundedSender<&'static str>);

        impl Drop for Notify {
            fn drop(&mut self) {
                let _ = self.0.send("first stopped");
            }
        }

        let slot = TaskSlot::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let guard = Notify(tx);
        slot.spawn(move |token| async move {
            let _guard = guard;
            token.cancelled().await;
        });
        slot.spawn(|_token| std::future::pending::<()>());

        assert_eq!(rx.recv().await, Some("first stopped"));
        assert!(slot.stop());
    }
}
