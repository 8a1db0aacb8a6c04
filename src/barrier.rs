//! Connection barrier: a one-shot "session is usable" signal.
//!
//! The barrier starts armed and can be released exactly once. Any number of
//! tasks may wait on it; waiting never times out on its own and only ends on
//! release or caller cancellation.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::metrics::BARRIER_RELEASES;
use crate::SetupError;

#[derive(Debug)]
pub struct ConnectionBarrier {
    released_tx: watch::Sender<bool>,
}

impl Default for ConnectionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionBarrier {
    pub fn new() -> Self {
        let (released_tx, _) = watch::channel(false);
        Self { released_tx }
    }

    /// armed -> released. Returns `true` only for the call that performed the transition.
    pub fn release(&self) -> bool {
        let released = self.released_tx.send_if_modified(|released| {
            if *released {
                false
            } else {
                *released = true;
                true
            }
        });

        if released {
            BARRIER_RELEASES.inc();
            debug!("[:ConnectionBarrier:release] barrier released");
        } else {
            trace!("[:ConnectionBarrier:release] already released, ignored");
        }
        released
    }

    pub fn is_released(&self) -> bool {
        *self.released_tx.borrow()
    }

    /// Waits until the barrier is released or `cancel` fires.
    pub async fn wait(
        &self,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SetupError> {
        let mut released_rx = self.released_tx.subscribe();

        tokio::select! {
            biased;
            res = released_rx.wait_for(|released| *released) => {
                // The sender lives as long as `self`, so the channel cannot close here.
                res.map(|_| ()).map_err(|_| SetupError::Interrupted)
            }
            _ = cancel.cancelled() => {
                debug!("[:ConnectionBarrier:wait] wait cancelled before release");
                Err(SetupError::Interrupted)
            }
        }
    }
}
