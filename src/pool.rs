// Copyright 2026 Palate Contributors
// SPDX-License-Identifier: Apache-2.0

//! Bounded pool of reusable renderer contexts.
//!
//! The pool hands out at most `capacity` pooled contexts at a time.
//! Checkout is a bounded wait on a semaphore; return happens through the
//! [`Lease`] guard's `Drop`, so a context is released on every exit path —
//! success, error, or cancellation.
//!
//! When checkout times out under contention, the pool can create a tagged
//! *overflow* context outside its fixed capacity. Overflow contexts are
//! capped by `max_overflow`, logged on creation, and disposed on release —
//! they are never enqueued into the fixed-capacity pool.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::renderer::{RenderContext, Renderer};

/// Errors surfaced by pool checkout.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// `acquire` was called after `shutdown`.
    #[error("renderer pool is closed")]
    Closed,
    /// No pooled context became available within the wait bound and the
    /// overflow budget is spent.
    #[error("renderer pool exhausted after {waited_ms}ms (all pooled and overflow contexts in use)")]
    Exhausted { waited_ms: u64 },
    /// The underlying browser session could not be started.
    #[error("failed to create renderer context")]
    HandleCreation(#[source] anyhow::Error),
}

/// Whether a lease came from the fixed pool or the overflow path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseKind {
    Pooled,
    Overflow,
}

struct PoolInner {
    renderer: Arc<dyn Renderer>,
    capacity: usize,
    idle: Mutex<VecDeque<Box<dyn RenderContext>>>,
    permits: Arc<Semaphore>,
    overflow_permits: Arc<Semaphore>,
    overflow_created: AtomicUsize,
    checked_out: AtomicUsize,
    closed: AtomicBool,
}

impl PoolInner {
    /// Best-effort async disposal of a context from a sync context.
    fn dispose(handle: Box<dyn RenderContext>) {
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            rt.spawn(async move {
                let _ = handle.close().await;
            });
        }
        // Outside a runtime the box is simply dropped; the browser process
        // reclaims the tab at shutdown.
    }
}

/// Fixed-capacity pool of renderer contexts with checkout/return semantics.
#[derive(Clone)]
pub struct RendererPool {
    inner: Arc<PoolInner>,
}

impl RendererPool {
    /// Create a pool and pre-warm `capacity` contexts.
    ///
    /// If some contexts fail to start, the pool runs with the reduced count
    /// and logs a warning. If none can be started the error is fatal.
    pub async fn new(
        renderer: Arc<dyn Renderer>,
        capacity: usize,
        max_overflow: usize,
    ) -> Result<Self, PoolError> {
        let mut idle = VecDeque::with_capacity(capacity);
        let mut last_err: Option<anyhow::Error> = None;

        for i in 0..capacity {
            match renderer.new_context().await {
                Ok(ctx) => {
                    debug!("renderer context {}/{} ready", i + 1, capacity);
                    idle.push_back(ctx);
                }
                Err(e) => {
                    warn!("renderer context {}/{} failed to start: {e:#}", i + 1, capacity);
                    last_err = Some(e);
                }
            }
        }

        if idle.is_empty() {
            return Err(PoolError::HandleCreation(last_err.unwrap_or_else(|| {
                anyhow::anyhow!("pool capacity is zero")
            })));
        }

        let effective = idle.len();
        if effective < capacity {
            warn!("pool running at reduced capacity: {effective}/{capacity}");
        }

        Ok(Self {
            inner: Arc::new(PoolInner {
                renderer,
                capacity: effective,
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(effective)),
                overflow_permits: Arc::new(Semaphore::new(max_overflow)),
                overflow_created: AtomicUsize::new(0),
                checked_out: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Check out a context, waiting at most `timeout` for a pooled one.
    ///
    /// On timeout the pool falls back to creating an overflow context,
    /// bounded by `max_overflow`. Overflow creation is an observable event:
    /// it is logged at warn level and counted in [`Self::overflow_created`].
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                let handle = {
                    let mut idle = self.inner.idle.lock().unwrap();
                    idle.pop_front()
                };
                // A permit was granted but shutdown drained the queue first.
                let Some(handle) = handle else {
                    return Err(PoolError::Closed);
                };
                self.inner.checked_out.fetch_add(1, Ordering::SeqCst);
                Ok(Lease {
                    handle: Some(handle),
                    kind: LeaseKind::Pooled,
                    _permit: Some(permit),
                    pool: Arc::clone(&self.inner),
                })
            }
            // Semaphore closed by shutdown while waiting.
            Ok(Err(_)) => Err(PoolError::Closed),
            // Bounded wait elapsed: overflow path.
            Err(_) => self.acquire_overflow(timeout).await,
        }
    }

    async fn acquire_overflow(&self, waited: Duration) -> Result<Lease, PoolError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(PoolError::Closed);
        }

        let permit = match self.inner.overflow_permits.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                return Err(PoolError::Exhausted {
                    waited_ms: waited.as_millis() as u64,
                })
            }
        };

        let handle = self
            .inner
            .renderer
            .new_context()
            .await
            .map_err(PoolError::HandleCreation)?;

        let live = self.inner.overflow_created.fetch_add(1, Ordering::SeqCst) + 1;
        warn!(
            "pool exhausted after {}ms; created overflow renderer context (total overflow this run: {live})",
            waited.as_millis()
        );

        self.inner.checked_out.fetch_add(1, Ordering::SeqCst);
        Ok(Lease {
            handle: Some(handle),
            kind: LeaseKind::Overflow,
            _permit: Some(permit),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Drain and dispose every idle context and refuse further checkouts.
    /// Idempotent; contexts still on lease are disposed when their lease
    /// drops.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.permits.close();

        let drained: Vec<Box<dyn RenderContext>> = {
            let mut idle = self.inner.idle.lock().unwrap();
            idle.drain(..).collect()
        };
        debug!("pool shutdown: disposing {} idle contexts", drained.len());
        for handle in drained {
            let _ = handle.close().await;
        }
    }

    /// Fixed capacity the pool was built with (after any reduced-start).
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Number of contexts currently on lease (pooled + overflow).
    pub fn checked_out(&self) -> usize {
        self.inner.checked_out.load(Ordering::SeqCst)
    }

    /// Total overflow contexts created over the pool's lifetime.
    pub fn overflow_created(&self) -> usize {
        self.inner.overflow_created.load(Ordering::SeqCst)
    }

    /// Whether `shutdown` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

/// RAII checkout guard. Dropping the lease returns a pooled context to the
/// idle queue (waking one waiter) or disposes an overflow context.
pub struct Lease {
    handle: Option<Box<dyn RenderContext>>,
    kind: LeaseKind,
    // Dropped after the handle is back in the idle queue, so a woken waiter
    // always finds one.
    _permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl Lease {
    /// Access the leased context.
    pub fn context(&mut self) -> &mut dyn RenderContext {
        self.handle
            .as_mut()
            .expect("renderer lease used after release")
            .as_mut()
    }

    /// Whether this lease came from the pool or the overflow path.
    pub fn kind(&self) -> LeaseKind {
        self.kind
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("kind", &self.kind)
            .field("has_handle", &self.handle.is_some())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.pool.checked_out.fetch_sub(1, Ordering::SeqCst);

        let closed = self.pool.closed.load(Ordering::SeqCst);
        if self.kind == LeaseKind::Pooled && !closed {
            let mut idle = self.pool.idle.lock().unwrap();
            if idle.len() < self.pool.capacity {
                idle.push_back(handle);
                return;
            }
            drop(idle);
        }
        // Overflow context, pool closed, or idle queue already full:
        // dispose instead of enqueueing.
        PoolInner::dispose(handle);
    }
}
