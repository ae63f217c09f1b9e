//! Evacuation context.
//!
//! One switch shared by three views: the HTTP handler flips it, the auction
//! client reads it to refuse new work, and the bulker waits on it to speed up
//! reconciliation while the cell drains.

use tokio::sync::watch;
use tracing::info;

/// Create the three views over a fresh, not-yet-evacuating switch.
pub fn evacuation_context() -> (Evacuatable, EvacuationReporter, EvacuationNotifier) {
    let (tx, rx) = watch::channel(false);
    (
        Evacuatable { tx },
        EvacuationReporter { rx: rx.clone() },
        EvacuationNotifier { rx },
    )
}

/// Starts evacuation.
#[derive(Debug, Clone)]
pub struct Evacuatable {
    tx: watch::Sender<bool>,
}

impl Evacuatable {
    /// Begin evacuating. Repeated calls have no further effect.
    pub fn evacuate(&self) {
        let started = self.tx.send_if_modified(|evacuating| {
            if *evacuating {
                return false;
            }
            *evacuating = true;
            true
        });
        if started {
            info!("Evacuation started");
        }
    }
}

/// Reports whether the cell is evacuating.
#[derive(Debug, Clone)]
pub struct EvacuationReporter {
    rx: watch::Receiver<bool>,
}

impl EvacuationReporter {
    pub fn evacuating(&self) -> bool {
        *self.rx.borrow()
    }
}

/// Waits for evacuation to begin.
#[derive(Debug, Clone)]
pub struct EvacuationNotifier {
    rx: watch::Receiver<bool>,
}

impl EvacuationNotifier {
    /// Resolves once evacuation has started, immediately if it already has.
    ///
    /// Never resolves if every `Evacuatable` is dropped first.
    pub async fn wait_for_evacuation(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|evacuating| *evacuating).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_not_evacuating() {
        let (_evacuatable, reporter, _notifier) = evacuation_context();
        assert!(!reporter.evacuating());
    }

    #[test]
    fn test_evacuate_is_idempotent() {
        let (evacuatable, reporter, _notifier) = evacuation_context();
        evacuatable.evacuate();
        evacuatable.evacuate();
        assert!(reporter.evacuating());
    }

    #[tokio::test]
    async fn test_notifier_wakes_on_evacuation() {
        let (evacuatable, _reporter, notifier) = evacuation_context();

        let waiter = tokio::spawn(async move { notifier.wait_for_evacuation().await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        evacuatable.evacuate();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_notifier_resolves_when_already_evacuating() {
        let (evacuatable, _reporter, notifier) = evacuation_context();
        evacuatable.evacuate();

        tokio::time::timeout(Duration::from_secs(1), notifier.wait_for_evacuation())
            .await
            .unwrap();
    }
}
