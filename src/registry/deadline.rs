//! Deadline-bounded registry lookups.
//!
//! Lookups run on a fixed pool of named worker threads fed through a bounded
//! queue; the caller waits on a per-lookup reply channel. A lookup that
//! outlives the deadline is abandoned (its reply is dropped when it
//! eventually arrives) and reported as `Timeout`. When every worker is stuck
//! and the queue is full, new lookups fail fast as `Unavailable` instead of
//! piling up threads.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use crate::error::RegistryError;
use crate::frame::FrameDefinition;
use crate::registry::FrameRegistry;

/// Worker threads used by [`DeadlineFrameRegistry::new`].
pub const DEFAULT_LOOKUP_WORKERS: usize = 4;

/// Queued lookups accepted by [`DeadlineFrameRegistry::new`].
pub const DEFAULT_LOOKUP_QUEUE: usize = 64;

type Reply = Result<FrameDefinition, RegistryError>;

struct Lookup {
    frame_id: String,
    version: Option<String>,
    reply: Sender<Reply>,
}

/// Wraps a registry with a per-lookup deadline.
///
/// Dropping the wrapper closes the queue; workers exit once their current
/// lookup returns.
pub struct DeadlineFrameRegistry<R> {
    inner: Arc<R>,
    tx: Sender<Lookup>,
    workers: Vec<JoinHandle<()>>,
    timeout: Duration,
    queue_capacity: usize,
}

impl<R> std::fmt::Debug for DeadlineFrameRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadlineFrameRegistry")
            .field("workers", &self.workers.len())
            .field("queue_capacity", &self.queue_capacity)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<R: FrameRegistry + 'static> DeadlineFrameRegistry<R> {
    /// Wraps `inner` with the default pool size.
    #[must_use]
    pub fn new(inner: R, timeout: Duration) -> Self {
        Self::with_pool(inner, timeout, DEFAULT_LOOKUP_WORKERS, DEFAULT_LOOKUP_QUEUE)
    }

    /// Wraps `inner` with `workers` lookup threads and room for
    /// `queue_capacity` waiting lookups. Both are clamped to at least one.
    #[must_use]
    pub fn with_pool(inner: R, timeout: Duration, workers: usize, queue_capacity: usize) -> Self {
        let inner = Arc::new(inner);
        let workers = workers.max(1);
        let queue_capacity = queue_capacity.max(1);
        let (tx, rx) = bounded::<Lookup>(queue_capacity);

        let mut handles = Vec::with_capacity(workers);
        for idx in 0..workers {
            let rx: Receiver<Lookup> = rx.clone();
            let inner = Arc::clone(&inner);
            let spawned = thread::Builder::new()
                .name(format!("eoql-frame-lookup-{idx}"))
                .spawn(move || {
                    while let Ok(lookup) = rx.recv() {
                        let result = panic::catch_unwind(AssertUnwindSafe(|| {
                            inner.resolve(&lookup.frame_id, lookup.version.as_deref())
                        }))
                        .unwrap_or_else(|_| {
                            Err(RegistryError::Unavailable {
                                message: format!("frame lookup for '{}' panicked", lookup.frame_id),
                            })
                        });
                        // The caller is gone if the deadline already passed.
                        let _ = lookup.reply.send(result);
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::warn!(idx, error = %e, "failed to spawn frame lookup worker"),
            }
        }

        Self {
            inner,
            tx,
            workers: handles,
            timeout,
            queue_capacity,
        }
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Per-lookup deadline.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of running lookup workers.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    fn submit(&self, lookup: Lookup) -> Result<(), RegistryError> {
        if self.workers.is_empty() {
            return Err(RegistryError::Unavailable {
                message: "no frame lookup workers are running".to_string(),
            });
        }
        match self.tx.try_send(lookup) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(lookup)) => {
                tracing::warn!(
                    frame_id = %lookup.frame_id,
                    capacity = self.queue_capacity,
                    "frame lookup queue full"
                );
                Err(RegistryError::Unavailable {
                    message: format!(
                        "frame lookup queue is full ({} pending)",
                        self.queue_capacity
                    ),
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(RegistryError::Unavailable {
                message: "frame lookup workers have exited".to_string(),
            }),
        }
    }
}

impl<R: FrameRegistry + 'static> FrameRegistry for DeadlineFrameRegistry<R> {
    fn resolve(
        &self,
        frame_id: &str,
        version: Option<&str>,
    ) -> Result<FrameDefinition, RegistryError> {
        let (reply, rx) = bounded(1);
        self.submit(Lookup {
            frame_id: frame_id.to_string(),
            version: version.map(str::to_string),
            reply,
        })?;

        rx.recv_timeout(self.timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => {
                let waited_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(frame_id, waited_ms, "frame lookup timed out");
                RegistryError::Timeout {
                    frame_id: frame_id.to_string(),
                    waited_ms,
                }
            }
            RecvTimeoutError::Disconnected => RegistryError::Unavailable {
                message: "frame lookup worker exited without answering".to_string(),
            },
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryFrameRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Blocks every lookup until the gate channel closes.
    struct StuckRegistry {
        gate: Receiver<()>,
        entered: AtomicUsize,
    }

    impl FrameRegistry for StuckRegistry {
        fn resolve(
            &self,
            frame_id: &str,
            _version: Option<&str>,
        ) -> Result<FrameDefinition, RegistryError> {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.recv();
            Ok(FrameDefinition::new(frame_id, "1", frame_id))
        }
    }

    struct PanickingRegistry;

    impl FrameRegistry for PanickingRegistry {
        fn resolve(
            &self,
            _frame_id: &str,
            _version: Option<&str>,
        ) -> Result<FrameDefinition, RegistryError> {
            panic!("registry crashed");
        }
    }

    fn stuck() -> (StuckRegistry, Sender<()>) {
        let (open, gate) = bounded(0);
        (
            StuckRegistry {
                gate,
                entered: AtomicUsize::new(0),
            },
            open,
        )
    }

    #[test]
    fn test_fast_lookup_passes_through() {
        let inner = InMemoryFrameRegistry::new();
        inner.register(FrameDefinition::new("F", "1", "F")).unwrap();
        let r = DeadlineFrameRegistry::new(inner, Duration::from_secs(5));
        assert_eq!(r.worker_count(), DEFAULT_LOOKUP_WORKERS);
        assert_eq!(r.resolve("F", None).unwrap().resolved_version(), "1");
        assert!(matches!(
            r.resolve("nope", None),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_slow_lookup_times_out() {
        let (registry, open) = stuck();
        let r = DeadlineFrameRegistry::with_pool(registry, Duration::from_millis(20), 1, 4);
        match r.resolve("F", None) {
            Err(RegistryError::Timeout { frame_id, waited_ms }) => {
                assert_eq!(frame_id, "F");
                assert_eq!(waited_ms, 20);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        drop(open);
    }

    #[test]
    fn test_hung_registry_saturates_instead_of_spawning() {
        let (registry, open) = stuck();
        let r = DeadlineFrameRegistry::with_pool(registry, Duration::from_millis(10), 2, 3);

        // Two lookups occupy the workers, three more fill the queue; every
        // caller gives up at the deadline.
        let mut timeouts = 0;
        for _ in 0..5 {
            if matches!(r.resolve("F", None), Err(RegistryError::Timeout { .. })) {
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 5);

        // Abandoned lookups still hold the queue, so further callers fail fast.
        for _ in 0..20 {
            assert!(matches!(
                r.resolve("F", None),
                Err(RegistryError::Unavailable { .. })
            ));
        }
        assert_eq!(r.worker_count(), 2);
        assert_eq!(r.inner().entered.load(Ordering::SeqCst), 2);
        drop(open);
    }

    #[test]
    fn test_crashed_lookup_is_unavailable_and_worker_survives() {
        let r = DeadlineFrameRegistry::with_pool(PanickingRegistry, Duration::from_secs(5), 1, 1);
        for _ in 0..3 {
            assert!(matches!(
                r.resolve("F", None),
                Err(RegistryError::Unavailable { .. })
            ));
        }
        assert_eq!(r.worker_count(), 1);
    }
}
