//! Reconciles the power demand received over Modbus with the state the heat pump reports.
//!
//! The serial protocol has no synchronous acknowledgement, so a demand stays
//! pending until an `update()` observes the device in the demanded state.

use std::time::Duration;

use log::{debug, info};
use thiserror::Error;
use tokio::time::Instant;

use crate::protocol::settings::Power;


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub target_power: Power,
    pub pending: bool,
}

/// The pending demand is withheld because the last Modbus read is too old (or never happened).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("power demand is stale (last read: {age:?} ago)")]
pub struct StaleData {
    pub age: Option<Duration>,
}


pub struct CommandReconciler {
    command: PendingCommand,
    last_read_at: Option<Instant>,
    freshness: Duration,
}

impl CommandReconciler {
    pub fn new(freshness: Duration) -> Self {
        Self {
            // take the power demand from the peer at boot
            command: PendingCommand { target_power: Power::Off, pending: true },
            last_read_at: None,
            freshness
        }
    }

    pub fn command(&self) -> PendingCommand {
        self.command
    }

    pub fn last_read_at(&self) -> Option<Instant> {
        self.last_read_at
    }

    /// Record a power demand read from the peer at `now`.
    pub fn observe(&mut self, demand: Power, now: Instant) {
        if self.last_read_at.is_none() || self.command.target_power != demand {
            debug!("new power demand {demand} (was {})", self.command.target_power);
            self.command.pending = true;
        }

        self.command.target_power = demand;
        self.last_read_at = Some(now);
    }

    pub fn is_fresh(&self, now: Instant) -> bool {
        match self.last_read_at {
            Some(at) => now.saturating_duration_since(at) < self.freshness,
            None => false,
        }
    }

    /// The power setting to push to the device before the next `update()`, if any.
    pub fn due(&self, now: Instant) -> Result<Option<Power>, StaleData> {
        if !self.command.pending {
            return Ok(None);
        }

        if !self.is_fresh(now) {
            return Err(StaleData {
                age: self.last_read_at.map(|at| now.saturating_duration_since(at))
            });
        }

        Ok(Some(self.command.target_power))
    }

    /// Compare the power observed after a successful `update()` with the target.
    ///
    /// Returns whether the device is in sync with the demand.
    pub fn confirm(&mut self, observed: Option<Power>) -> bool {
        let in_sync = observed == Some(self.command.target_power);

        if in_sync && self.command.pending {
            info!("power successfully set to {}", self.command.target_power);
            self.command.pending = false;
        }

        in_sync
    }
}
