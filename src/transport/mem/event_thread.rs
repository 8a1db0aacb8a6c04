//! Per-session notification thread.
//!
//! ```text
//! ensemble (any task, under tree lock):
//!   deliver(watcher, event) -> send(unbounded queue)   [non-blocking]
//!                                   ↓
//! event thread (one per session):
//!   queue.recv() -> watcher.process(event)             [in enqueue order]
//! ```

use std::sync::Arc;
use std::thread::JoinHandle;
use std::thread::ThreadId;

use crossbeam_channel::unbounded;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use tracing::debug;
use tracing::trace;

use crate::TransportError;
use crate::WatchedEvent;
use crate::Watcher;

struct Delivery {
    watcher: Arc<dyn Watcher>,
    event: WatchedEvent,
}

pub(crate) struct EventThread {
    session_id: u64,
    sender: Mutex<Option<Sender<Delivery>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for EventThread {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("EventThread").field("session_id", &self.session_id).finish()
    }
}

impl EventThread {
    pub(crate) fn spawn(session_id: u64) -> std::result::Result<Self, TransportError> {
        let (sender, receiver) = unbounded::<Delivery>();

        let handle = std::thread::Builder::new()
            .name(format!("zk-event-{session_id:x}"))
            .spawn(move || {
                for delivery in receiver {
                    trace!(
                        "[:EventThread] session={:x} delivering {:?}",
                        session_id,
                        delivery.event
                    );
                    delivery.watcher.process(delivery.event);
                }
                debug!("[:EventThread] session={:x} event thread stopped", session_id);
            })?;

        Ok(Self {
            session_id,
            sender: Mutex::new(Some(sender)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Queues one notification. Returns `false` once the thread is shut down.
    pub(crate) fn deliver(
        &self,
        watcher: Arc<dyn Watcher>,
        event: WatchedEvent,
    ) -> bool {
        match self.sender.lock().as_ref() {
            Some(sender) => sender.send(Delivery { watcher, event }).is_ok(),
            None => false,
        }
    }

    fn thread_id(&self) -> Option<ThreadId> {
        self.handle.lock().as_ref().map(|h| h.thread().id())
    }

    /// Stops accepting notifications; already queued ones are still delivered
    /// and the thread exits once the queue is drained. Never blocks.
    pub(crate) fn stop(&self) {
        self.sender.lock().take();
    }

    /// Waits for the thread to drain its queue and exit. Blocking.
    ///
    /// No-op when called from the event thread itself.
    pub(crate) fn join(&self) {
        if self.thread_id() == Some(std::thread::current().id()) {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                debug!(
                    "[:EventThread] session={:x} a watcher panicked on the event thread",
                    self.session_id
                );
            }
        }
    }
}
