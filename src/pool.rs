//! Bounded connection pool with idle eviction.
//!
//! Dispatch acquires a connection per in-flight append; the pool caps
//! concurrent broker traffic at `max_connections` and recycles connections
//! that come back. Idle connections past `max_idle_time` are discarded on
//! checkout rather than reused. Acquisition waits a bounded time and then
//! fails with a pool-exhausted error so a stalled broker cannot wedge the
//! producer silently.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, timeout};
use tracing::trace;

use crate::error::{Result, StreamError};
use crate::metrics;

struct Idle<C> {
    connection: C,
    parked_at: Instant,
}

struct Shared<C> {
    factory: Box<dyn Fn() -> C + Send + Sync>,
    idle: Mutex<Vec<Idle<C>>>,
    permits: Arc<Semaphore>,
    acquire_timeout: Duration,
    max_idle_time: Duration,
}

/// A bounded pool of broker connections.
pub struct ConnectionPool<C> {
    shared: Arc<Shared<C>>,
}

impl<C: Send + 'static> ConnectionPool<C> {
    /// Build a pool that creates connections with `factory` on demand, up
    /// to `max_connections` live at once.
    pub fn new(
        max_connections: usize,
        acquire_timeout: Duration,
        max_idle_time: Duration,
        factory: impl Fn() -> C + Send + Sync + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                factory: Box::new(factory),
                idle: Mutex::new(Vec::with_capacity(max_connections)),
                permits: Arc::new(Semaphore::new(max_connections)),
                acquire_timeout,
                max_idle_time,
            }),
        }
    }

    /// Check out a connection, waiting up to the acquire timeout for one to
    /// free up.
    pub async fn acquire(&self) -> Result<PooledConnection<C>> {
        let started = Instant::now();
        let acquired = timeout(
            self.shared.acquire_timeout,
            Arc::clone(&self.shared.permits).acquire_owned(),
        )
        .await;
        let permit = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(StreamError::ProducerClosed),
            Err(_) => {
                metrics::POOL_EXHAUSTED.inc();
                return Err(StreamError::PoolExhausted {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let connection = self.checkout_idle().unwrap_or_else(|| {
            trace!("pool creating new connection");
            (self.shared.factory)()
        });
        Ok(PooledConnection {
            shared: Arc::clone(&self.shared),
            connection: Some(connection),
            _permit: permit,
        })
    }

    /// Connections currently parked in the idle list.
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    /// Pop the freshest idle connection, dropping any that sat past the
    /// idle deadline.
    fn checkout_idle(&self) -> Option<C> {
        let mut idle = self.shared.idle.lock().ok()?;
        while let Some(entry) = idle.pop() {
            if entry.parked_at.elapsed() <= self.shared.max_idle_time {
                return Some(entry.connection);
            }
            trace!("pool evicting idle connection");
        }
        None
    }
}

impl<C> Clone for ConnectionPool<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A checked-out connection; returns to the pool on drop.
pub struct PooledConnection<C> {
    shared: Arc<Shared<C>>,
    connection: Option<C>,
    _permit: OwnedSemaphorePermit,
}

impl<C> Deref for PooledConnection<C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.connection.as_ref().expect("connection present until drop")
    }
}

impl<C> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut C {
        self.connection.as_mut().expect("connection present until drop")
    }
}

impl<C> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if let Ok(mut idle) = self.shared.idle.lock() {
                idle.push(Idle {
                    connection,
                    parked_at: Instant::now(),
                });
            }
        }
    }
}
