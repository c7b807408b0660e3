use log::debug;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Bounds the number of inbound connections handled at once.
pub struct ConnectionLimiter {
    active: Arc<AtomicUsize>,
    max_connections: usize,
}

/// Held for the lifetime of one inbound connection.
pub struct ConnectionPermit {
    active: Arc<AtomicUsize>,
}

impl ConnectionLimiter {
    pub fn new(max_connections: usize) -> Self {
        Self {
            active: Arc::new(AtomicUsize::new(0)),
            max_connections,
        }
    }

    /// Claim a slot, or `None` when the limit is reached.
    pub fn try_acquire(&self) -> Option<ConnectionPermit> {
        let claimed = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max_connections).then_some(active + 1)
            })
            .is_ok();
        if !claimed {
            return None;
        }
        debug!("Connection admitted ({} active)", self.active_connections());
        Some(ConnectionPermit {
            active: Arc::clone(&self.active),
        })
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
