//! # Status fan-out.
//!
//! The bridge forwards every status [`Event`] from the bus listener into a
//! [`SubscriberSet`], which hands it to each registered [`Subscribe`]
//! implementation on that subscriber's own worker task. A slow collaborator
//! (say, one that writes removals to a database) therefore never delays the
//! session loop or the other subscribers.
//!
//! ```text
//! Bus ─► status listener ─► emit(&Event)
//!                              ├─► [lane: log]     ─► worker ─► LogWriter::on_event
//!                              ├─► [lane: removal] ─► worker ─► StatusFn
//!                              └─► [lane: …]       ─► worker ─► custom
//! ```
//!
//! Each lane is a bounded queue sized by [`Subscribe::queue_capacity`].
//! Events reach one subscriber in publish order. A full lane drops the event
//! for that subscriber only and logs the dropped kind. A panicking
//! subscriber is logged and keeps receiving later events.

use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{error, warn};

use crate::events::Event;

use super::Subscribe;

/// Queue feeding one subscriber's worker.
struct Lane {
    subscriber: &'static str,
    queue: mpsc::Sender<Arc<Event>>,
}

/// Status subscribers, one worker task each.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Spawns one worker per subscriber. Must be called within a Tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let (lanes, workers) = subs.into_iter().map(spawn_lane).unzip();
        Self { lanes, workers }
    }

    /// Queues `event` for every subscriber without waiting on any of them.
    pub fn emit(&self, event: &Event) {
        let shared = Arc::new(event.clone());
        for lane in &self.lanes {
            let dropped = match lane.queue.try_send(Arc::clone(&shared)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "queue full",
                Err(mpsc::error::TrySendError::Closed(_)) => "worker gone",
            };
            warn!(
                subscriber = lane.subscriber,
                kind = shared.kind.as_label(),
                service = shared.service.as_deref(),
                reason = dropped,
                "status event dropped"
            );
        }
    }

    /// Closes every lane and waits until the workers have handled what was queued.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

fn spawn_lane(sub: Arc<dyn Subscribe>) -> (Lane, JoinHandle<()>) {
    let subscriber = sub.name();
    let (queue, mut rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
    let worker = tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let handled = std::panic::AssertUnwindSafe(sub.on_event(ev.as_ref()))
                .catch_unwind()
                .await;
            if let Err(panic) = handled {
                error!(subscriber, kind = ev.kind.as_label(), ?panic, "status subscriber panicked");
            }
        }
    });
    (Lane { subscriber, queue }, worker)
}
