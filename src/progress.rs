// Progress reporting for Aperture
//
// Events go through a bounded channel with a non-blocking send: when the
// consumer falls behind, new events are dropped and the scan carries on.

use crate::models::{Method, RequestDetails};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

/// Capacity of the channel returned by [`channel`].
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    PathsDiscovered {
        count: usize,
    },
    TotalRequests {
        total: usize,
    },
    EndpointStarting {
        method: Method,
        path: String,
    },
    RequestPrepared {
        method: Method,
        path: String,
        request: Box<RequestDetails>,
        completed: usize,
        total: usize,
    },
    RequestCompleted {
        completed: usize,
        total: usize,
    },
}

/// Sending half of the progress channel. A disabled emitter swallows everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressEmitter {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if let Err(e) = tx.try_send(event) {
            trace!(reason = %e, "progress event dropped");
        }
    }
}

/// Bounded progress channel of [`EVENT_CHANNEL_CAPACITY`] events.
pub fn channel() -> (ProgressEmitter, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    (ProgressEmitter { tx: Some(tx) }, rx)
}

/// Read-only view of the request counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total: usize,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.total as f64 * 100.0).min(100.0)
    }
}

/// State shared by one scan's execution path: the event emitter plus the
/// completed/total request counters. The completed count only grows.
#[derive(Debug, Default)]
pub struct ExecutionContext {
    emitter: ProgressEmitter,
    completed: usize,
    total: usize,
}

impl ExecutionContext {
    pub fn new(emitter: ProgressEmitter) -> Self {
        Self {
            emitter,
            completed: 0,
            total: 0,
        }
    }

    pub fn set_total(&mut self, total: usize) {
        self.total = total;
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed,
            total: self.total,
        }
    }

    pub fn emit(&self, event: ProgressEvent) {
        self.emitter.emit(event);
    }

    /// Count one dispatched request and announce it.
    pub fn record_completed(&mut self) {
        self.completed += 1;
        self.emit(ProgressEvent::RequestCompleted {
            completed: self.completed,
            total: self.total,
        });
    }
}

/// Drain events into the log until every emitter is gone.
pub async fn log_progress(mut rx: mpsc::Receiver<ProgressEvent>) {
    let mut snapshot = ProgressSnapshot::default();
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::PathsDiscovered { count } => info!("Discovered {} paths in spec", count),
            ProgressEvent::TotalRequests { total } => {
                snapshot.total = total;
                info!("Planned {} requests", total);
            }
            ProgressEvent::EndpointStarting { method, path } => {
                info!("[{:>5.1}%] Testing {} {}", snapshot.percent(), method, path)
            }
            ProgressEvent::RequestPrepared {
                method,
                path,
                request,
                ..
            } => {
                let body = request
                    .body
                    .as_ref()
                    .map(|b| b.to_string())
                    .unwrap_or_default();
                debug!(
                    creds = %request.auth_user,
                    url = %request.url,
                    body = %body,
                    "{} {}",
                    method,
                    path
                );
            }
            ProgressEvent::RequestCompleted { completed, total } => {
                snapshot = ProgressSnapshot { completed, total };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_channel_drops_instead_of_blocking() {
        let (emitter, mut rx) = channel();
        for count in 0..EVENT_CHANNEL_CAPACITY + 10 {
            emitter.emit(ProgressEvent::PathsDiscovered { count });
        }
        let mut received = 0;
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event, ProgressEvent::PathsDiscovered { count: received });
            received += 1;
        }
        assert_eq!(received, EVENT_CHANNEL_CAPACITY);
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (emitter, rx) = channel();
        drop(rx);
        emitter.emit(ProgressEvent::TotalRequests { total: 4 });
        ProgressEmitter::disabled().emit(ProgressEvent::TotalRequests { total: 4 });
    }

    #[test]
    fn context_counts_completed_requests() {
        let (emitter, mut rx) = channel();
        let mut ctx = ExecutionContext::new(emitter);
        ctx.set_total(4);
        ctx.record_completed();
        ctx.record_completed();
        assert_eq!(ctx.snapshot(), ProgressSnapshot { completed: 2, total: 4 });
        assert_eq!(ctx.snapshot().percent(), 50.0);
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::RequestCompleted { completed: 1, total: 4 }
        );
    }

    #[test]
    fn percent_of_empty_plan_is_zero() {
        assert_eq!(ProgressSnapshot::default().percent(), 0.0);
    }
}
