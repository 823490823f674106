//! Stop signal for the background refresh loops.
//!
//! Each [`BackgroundTask`](crate::lifecycle::BackgroundTask) (the OCSP
//! refresh and the runtime version refresh) owns one [`StopSignal`]; its loop
//! holds the matching [`StopListener`] and exits at its next await point once
//! the signal fires. The signal is level-triggered: a listener created or
//! polled after `trigger` still sees it, and a listener whose signal was
//! dropped counts as stopped.

use tokio::sync::watch;

/// Owner side. Dropping it stops every listener as well.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

/// Loop side, handed to the task body by `BackgroundTask::spawn`.
#[derive(Debug, Clone)]
pub struct StopListener {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn listener(&self) -> StopListener {
        StopListener {
            rx: self.tx.subscribe(),
        }
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopListener {
    /// Resolves once the signal has fired or its owner is gone.
    pub async fn stopped(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_trigger_reaches_every_listener() {
        let signal = StopSignal::new();
        let mut ocsp = signal.listener();
        let mut rtv = signal.listener();
        assert!(!ocsp.is_stopped());

        signal.trigger();
        signal.trigger();
        ocsp.stopped().await;
        rtv.stopped().await;
        assert!(signal.is_triggered());
        assert!(rtv.is_stopped());
    }

    #[tokio::test]
    async fn test_late_listener_sees_earlier_trigger() {
        let signal = StopSignal::default();
        signal.trigger();
        let mut listener = signal.listener();
        tokio::time::timeout(Duration::from_secs(1), listener.stopped())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_dropped_signal_stops_listener() {
        let signal = StopSignal::new();
        let mut listener = signal.listener();
        drop(signal);
        assert!(listener.is_stopped());
        tokio::time::timeout(Duration::from_secs(1), listener.stopped())
            .await
            .unwrap();
    }
}
