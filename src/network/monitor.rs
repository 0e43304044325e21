use std::sync::{Mutex, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info};

use super::{classify, NetworkSignals, NetworkTier, TierThresholds};

/// Holds the current tier and notifies subscribers when it changes.
///
/// Only [`update`](Self::update) writes the tier; everyone else reads it or
/// subscribes.
pub struct NetworkQualityMonitor {
    thresholds: TierThresholds,
    signals: Mutex<NetworkSignals>,
    tier: watch::Sender<NetworkTier>,
}

impl NetworkQualityMonitor {
    pub fn new(thresholds: TierThresholds) -> Self {
        let signals = NetworkSignals::default();
        let initial = classify(&signals, &thresholds);
        let (tier, _) = watch::channel(initial);
        Self {
            thresholds,
            signals: Mutex::new(signals),
            tier,
        }
    }

    /// Reclassify with fresh signals. Returns the new tier if it changed.
    pub fn update(&self, signals: NetworkSignals) -> Option<NetworkTier> {
        let next = classify(&signals, &self.thresholds);
        *self.signals.lock().unwrap_or_else(PoisonError::into_inner) = signals;

        let mut previous = next;
        let changed = self.tier.send_if_modified(|current| {
            previous = *current;
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });

        if changed {
            info!(from = %previous, to = %next, ?signals, "network tier changed");
            Some(next)
        } else {
            debug!(tier = %next, "network signals updated, tier unchanged");
            None
        }
    }

    pub fn tier(&self) -> NetworkTier {
        *self.tier.borrow()
    }

    pub fn signals(&self) -> NetworkSignals {
        *self.signals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_online(&self) -> bool {
        self.tier() != NetworkTier::Offline
    }

    /// Receiver that wakes on every tier change.
    pub fn subscribe(&self) -> watch::Receiver<NetworkTier> {
        self.tier.subscribe()
    }

    pub fn thresholds(&self) -> &TierThresholds {
        &self.thresholds
    }
}

impl Default for NetworkQualityMonitor {
    fn default() -> Self {
        Self::new(TierThresholds::default())
    }
}
