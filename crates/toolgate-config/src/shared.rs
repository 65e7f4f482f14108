// SPDX-License-Identifier: MIT OR Apache-2.0
//! Copy-on-write configuration handle.

use crate::GatewayConfig;
use std::sync::{Arc, RwLock};

/// Shared, atomically swappable configuration snapshot.
///
/// Requests call [`SharedConfig::current`] exactly once at the start of
/// handling and keep the returned `Arc` for their whole lifetime; a
/// concurrent [`SharedConfig::swap`] replaces the pointer for *future*
/// requests without tearing anything in flight.  Readers take a short read
/// lock to clone the `Arc` and never block on writers beyond that.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<GatewayConfig>>>,
}

impl SharedConfig {
    /// Wrap an initial snapshot.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        }
    }

    /// Capture the current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<GatewayConfig> {
        self.inner
            .read()
            .expect("config lock poisoned")
            .clone()
    }

    /// Atomically replace the snapshot for future readers.
    pub fn swap(&self, config: GatewayConfig) {
        *self.inner.write().expect("config lock poisoned") = Arc::new(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;

    #[test]
    fn current_returns_latest_snapshot() {
        let shared = SharedConfig::new(GatewayConfig::default());
        assert_eq!(shared.current().server.port, 8788);

        shared.swap(GatewayConfig {
            server: ServerConfig {
                port: 1,
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(shared.current().server.port, 1);
    }

    #[test]
    fn in_flight_snapshot_survives_swap() {
        let shared = SharedConfig::new(GatewayConfig::default());
        let held = shared.current();

        shared.swap(GatewayConfig {
            server: ServerConfig {
                port: 9,
                ..Default::default()
            },
            ..Default::default()
        });

        // The request that captured `held` keeps seeing its original view.
        assert_eq!(held.server.port, 8788);
        assert_eq!(shared.current().server.port, 9);
    }

    #[test]
    fn clones_share_the_same_slot() {
        let a = SharedConfig::new(GatewayConfig::default());
        let b = a.clone();
        b.swap(GatewayConfig {
            server: ServerConfig {
                port: 7,
                ..Default::default()
            },
            ..Default::default()
        });
        assert_eq!(a.current().server.port, 7);
    }
}
