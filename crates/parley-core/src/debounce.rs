//! Trailing debounce
//!
//! Every push re-arms a timer; when the timer fires, only the most recent
//! value is emitted. Values still pending when the debouncer is dropped are
//! discarded.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

/// Coalesces bursts of values into one trailing emission
#[derive(Debug)]
pub struct Debouncer<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn the debounce task. Must be called from within a Tokio runtime.
    pub fn new<F>(window: Duration, emit: F) -> Self
    where
        F: Fn(T) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run(window, rx, emit));
        Self { tx }
    }

    /// Record a value and restart the window
    pub fn push(&self, value: T) {
        let _ = self.tx.send(value);
    }
}

async fn run<T, F>(window: Duration, mut rx: mpsc::UnboundedReceiver<T>, emit: F)
where
    F: Fn(T),
{
    while let Some(first) = rx.recv().await {
        let mut latest = Some(first);
        let timer = tokio::time::sleep(window);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => {
                    if let Some(value) = latest.take() {
                        emit(value);
                    }
                    break;
                }
                next = rx.recv() => match next {
                    Some(value) => {
                        latest = Some(value);
                        timer.as_mut().reset(Instant::now() + window);
                    }
                    None => return,
                }
            }
        }
    }
}
