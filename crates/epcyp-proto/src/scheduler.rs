//! Auto-update state machine.
//!
//! Pure and clock-free: every transition takes `now` from the caller, so the
//! cooldown and overlap rules can be driven from tests without a timer.
//!
//! ```text
//!            tick reaches 0 / manual refresh (elapsed >= min interval)
//!   Idle ───────────────────────────────────────────────────────────▶ Fetching
//!    ▲  │ manual refresh (elapsed < min interval)                        │
//!    │  ▼                                                                │
//!   Cooldown (rejected, seconds remaining reported)                      │
//!    ▲                                                                   │
//!    └──────────────── complete(ticket) ─────────────────────────────────┘
//! ```
//!
//! While `Fetching`, further refresh requests and ticks are no-ops.  After
//! `stop()` nothing transitions any more and late completions are dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CooldownError;
use crate::reconcile::FeedStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Minimum seconds between two fetches.
    pub min_interval_secs: u64,
    /// Ticks between automatic fetches.
    pub countdown_ticks: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 30,
            countdown_ticks: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    #[default]
    Wait,
    Updating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    Idle,
    Cooldown,
    Fetching,
}

/// Proof that a fetch was started.  Completing with a ticket other than the
/// in-flight one is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket(u64);

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Auto-update off or a fetch in flight; countdown held at its maximum.
    Holding,
    Counting { remaining: u32 },
    /// Countdown hit zero and a fetch should start now.
    Fetch(FetchTicket),
    /// Countdown hit zero inside the cooldown window; it was rearmed.
    Rearmed,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Started(FetchTicket),
    /// A fetch is already in flight; nothing new was queued.
    AlreadyFetching,
    Rejected(CooldownError),
    Stopped,
}

/// Read-only view for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub update_status: UpdateStatus,
    pub auto_update: bool,
    pub countdown: u32,
    pub last_update: Option<DateTime<Utc>>,
    pub cooldown_remaining_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct UpdateScheduler {
    config: SchedulerConfig,
    auto_update: bool,
    status: UpdateStatus,
    countdown: u32,
    last_update: Option<DateTime<Utc>>,
    in_flight: Option<u64>,
    next_generation: u64,
    stopped: bool,
}

impl UpdateScheduler {
    pub fn new(config: SchedulerConfig, auto_update: bool) -> Self {
        Self {
            config,
            auto_update,
            status: UpdateStatus::Wait,
            countdown: config.countdown_ticks,
            last_update: None,
            in_flight: None,
            next_generation: 1,
            stopped: false,
        }
    }

    pub fn config(&self) -> SchedulerConfig {
        self.config
    }

    pub fn update_status(&self) -> UpdateStatus {
        self.status
    }

    pub fn countdown(&self) -> u32 {
        self.countdown
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn auto_update(&self) -> bool {
        self.auto_update
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn state(&self, now: DateTime<Utc>) -> SchedulerState {
        if self.in_flight.is_some() {
            SchedulerState::Fetching
        } else if self.cooldown_remaining(now).is_some() {
            SchedulerState::Cooldown
        } else {
            SchedulerState::Idle
        }
    }

    /// Seconds until a fetch is allowed again, `None` when allowed now.
    ///
    /// A last-update time in the future (clock moved backwards) reports the
    /// full interval.
    pub fn cooldown_remaining(&self, now: DateTime<Utc>) -> Option<u64> {
        let last = self.last_update?;
        let min = self.config.min_interval_secs as i64;
        let elapsed = (now - last).num_seconds();
        if elapsed < 0 {
            return Some(self.config.min_interval_secs);
        }
        if elapsed >= min {
            None
        } else {
            Some((min - elapsed) as u64)
        }
    }

    pub fn status(&self, now: DateTime<Utc>) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(now),
            update_status: self.status,
            auto_update: self.auto_update,
            countdown: self.countdown,
            last_update: self.last_update,
            cooldown_remaining_secs: self.cooldown_remaining(now),
        }
    }

    pub fn set_auto_update(&mut self, enabled: bool) {
        if self.stopped {
            return;
        }
        self.auto_update = enabled;
        if !enabled {
            self.countdown = self.config.countdown_ticks;
        }
    }

    /// Advance one second.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        if self.stopped {
            return TickOutcome::Stopped;
        }
        if !self.auto_update || self.status == UpdateStatus::Updating {
            self.countdown = self.config.countdown_ticks;
            return TickOutcome::Holding;
        }

        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown > 0 {
            return TickOutcome::Counting {
                remaining: self.countdown,
            };
        }

        self.countdown = self.config.countdown_ticks;
        match self.cooldown_remaining(now) {
            None => TickOutcome::Fetch(self.begin_fetch()),
            Some(secs) => {
                debug!("scheduler: countdown expired inside cooldown ({}s left)", secs);
                TickOutcome::Rearmed
            }
        }
    }

    /// Explicit user refresh.
    pub fn request_refresh(&mut self, now: DateTime<Utc>) -> RefreshOutcome {
        if self.stopped {
            return RefreshOutcome::Stopped;
        }
        if self.status == UpdateStatus::Updating {
            return RefreshOutcome::AlreadyFetching;
        }
        match self.cooldown_remaining(now) {
            None => RefreshOutcome::Started(self.begin_fetch()),
            Some(seconds_remaining) => RefreshOutcome::Rejected(CooldownError { seconds_remaining }),
        }
    }

    /// Finish the in-flight fetch.  Returns false when the ticket is stale or
    /// the scheduler was stopped, in which case the result must be dropped.
    pub fn complete(&mut self, ticket: FetchTicket, now: DateTime<Utc>, outcome: FeedStatus) -> bool {
        if self.stopped || self.in_flight != Some(ticket.0) {
            debug!("scheduler: dropping stale fetch #{}", ticket.0);
            return false;
        }
        self.in_flight = None;
        self.status = UpdateStatus::Wait;
        self.countdown = self.config.countdown_ticks;
        if outcome == FeedStatus::Updated {
            self.last_update = Some(now);
        }
        true
    }

    /// Idempotent teardown.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.in_flight = None;
        self.status = UpdateStatus::Wait;
    }

    fn begin_fetch(&mut self) -> FetchTicket {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.in_flight = Some(generation);
        self.status = UpdateStatus::Updating;
        self.countdown = self.config.countdown_ticks;
        FetchTicket(generation)
    }
}
