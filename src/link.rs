//! Health tracking for the three independently failing links
//! (uplink network, Modbus peer, heat pump serial).
//!
//! A [LinkSupervisor] never does I/O on its own. The bridge loop hands it
//! the collaborator ([Link]) and the current time; the supervisor decides
//! whether a connect attempt is due, records the outcome, and resets the
//! collaborator's session whenever the link drops.

use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::time::Instant;


#[derive(Error, Debug)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("peer replied with exception {0}")]
    Exception(String),
    #[error("not connected")]
    NotConnected,
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::Transport(err.to_string())
    }
}


/// A connection owned by an external collaborator.
#[allow(async_fn_in_trait)]
pub trait Link {
    /// Establish (or probe) the connection.
    async fn connect(&mut self) -> Result<(), LinkError>;

    /// Drop any session state so the next [Link::connect] starts clean.
    async fn reset(&mut self);
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connected
}

#[derive(Debug, Clone, Copy)]
pub struct LinkState {
    pub status: LinkStatus,
    pub last_success_at: Option<Instant>,
    pub last_attempt_at: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct LinkPolicy {
    /// Minimum time between two connect attempts.
    pub retry_interval: Duration,

    /// Attempts per read/write before the link is declared down.
    pub attempts: u32,

    /// Fixed delay between two attempts of the same read/write.
    pub attempt_delay: Duration,

    /// Continuous time in `Disconnected` after which the loss is fatal.
    /// `None` for links whose loss is never fatal.
    pub fatal_after: Option<Duration>,
}


pub struct LinkSupervisor {
    name: &'static str,
    policy: LinkPolicy,
    state: LinkState,
    disconnected_since: Instant,
}

impl LinkSupervisor {
    pub fn new(name: &'static str, policy: LinkPolicy, now: Instant) -> Self {
        Self {
            name,
            policy,
            state: LinkState {
                status: LinkStatus::Disconnected,
                last_success_at: None,
                last_attempt_at: None
            },
            disconnected_since: now
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> &LinkPolicy {
        &self.policy
    }

    pub fn state(&self) -> &LinkState {
        &self.state
    }

    pub fn status(&self) -> LinkStatus {
        self.state.status
    }

    pub fn is_connected(&self) -> bool {
        self.state.status == LinkStatus::Connected
    }

    /// Has the retry interval elapsed since the last attempt?
    pub fn due(&self, now: Instant) -> bool {
        match self.state.last_attempt_at {
            Some(at) => now.saturating_duration_since(at) >= self.policy.retry_interval,
            None => true,
        }
    }

    pub fn record_attempt(&mut self, now: Instant) {
        self.state.last_attempt_at = Some(now);
    }

    pub fn record_success(&mut self, now: Instant) {
        self.state.last_success_at = Some(now);

        if self.state.status == LinkStatus::Disconnected {
            let down_for = now.saturating_duration_since(self.disconnected_since);
            info!("{} link connected (down for {down_for:?})", self.name);
            self.state.status = LinkStatus::Connected;
        }
    }

    pub fn record_failure(&mut self, now: Instant, err: &LinkError) {
        if self.state.status == LinkStatus::Connected {
            warn!("{} link lost: {err}", self.name);
            self.state.status = LinkStatus::Disconnected;
            self.disconnected_since = now;
        } else {
            debug!("{} link still down: {err}", self.name);
        }
    }

    /// Time spent continuously in `Disconnected`, `None` while connected.
    pub fn disconnected_for(&self, now: Instant) -> Option<Duration> {
        match self.state.status {
            LinkStatus::Connected => None,
            LinkStatus::Disconnected => Some(now.saturating_duration_since(self.disconnected_since)),
        }
    }

    /// Has this link been down long enough to require a restart?
    pub fn is_fatal(&self, now: Instant) -> bool {
        match (self.policy.fatal_after, self.disconnected_for(now)) {
            (Some(window), Some(down_for)) => down_for >= window,
            _ => false,
        }
    }

    /// Connect `link` if it is down and an attempt is due.
    ///
    /// Returns whether the link is connected afterwards.
    pub async fn ensure_connected<L: Link>(&mut self, link: &mut L, now: Instant) -> bool {
        if self.is_connected() {
            return true;
        }

        if !self.due(now) {
            return false;
        }

        self.record_attempt(now);

        match link.connect().await {
            Ok(()) => self.record_success(now),
            Err(err) => self.record_failure(now, &err),
        }

        self.is_connected()
    }

    /// Mark the link down after a failed read/write and reset the collaborator's session.
    ///
    /// The next connect is due one retry interval after the loss.
    pub async fn drop_link<L: Link>(&mut self, link: &mut L, now: Instant, err: &LinkError) {
        self.record_failure(now, err);
        self.record_attempt(now);
        link.reset().await;
    }
}


/// Evaluate the async expression `$op` up to `policy().attempts` times,
/// sleeping `policy().attempt_delay` between attempts.
///
/// Yields the first `Ok`, or the last `Err`.
#[macro_export]
macro_rules! with_retries {
    ($supervisor:expr, $op:expr) => {{
        let attempts = $supervisor.policy().attempts.max(1);
        let delay = $supervisor.policy().attempt_delay;
        let mut attempt = 1;

        loop {
            match $op.await {
                Ok(value) => break Ok(value),
                Err(err) if attempt < attempts => {
                    log::debug!("{} attempt {attempt}/{attempts} failed: {err}", $supervisor.name());
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                },
                Err(err) => break Err(err),
            }
        }
    }};
}
