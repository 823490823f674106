//! Stoppable background tasks.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::lifecycle::stop::{StopListener, StopSignal};

/// A spawned loop together with the signal that stops it.
#[derive(Debug)]
pub struct BackgroundTask {
    name: &'static str,
    stop: StopSignal,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawn `body`, handing it the listener it must watch to exit.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(StopListener) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let stop = StopSignal::new();
        let handle = tokio::spawn(body(stop.listener()));
        tracing::debug!(task = name, "Background task started");
        Self {
            name,
            stop,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the task and wait for it to exit.
    pub async fn stop(self) {
        self.stop.trigger();
        match self.handle.await {
            Ok(()) => tracing::debug!(task = self.name, "Background task stopped"),
            Err(e) if e.is_panic() => {
                tracing::error!(task = self.name, error = %e, "Background task panicked")
            }
            Err(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_loop() {
        let ticks = Arc::new(AtomicU32::new(0));
        let counter = ticks.clone();
        let task = BackgroundTask::spawn("ticker", move |mut stop| async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    _ = stop.stopped() => break,
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert_eq!(task.name(), "ticker");

        task.stop().await;
        let after_stop = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
    }
}
