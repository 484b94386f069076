//! Stall monitor state machine.
//!
//! While the motor drives, a one-shot timer fires every poll period and each
//! firing hands one sense-and-decide cycle to a worker. The cycle either
//! halts the motor (reading below threshold, monitor goes idle) or rearms
//! the timer. A new drive command bumps the generation, so a cycle that was
//! sampling while the command was issued is recognised as stale.

use serde::Serialize;

use crate::{config::ActuatorConfig, error::SampleError, sense::Reading};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MonitorState {
    Idle,
    Active,
}

impl MonitorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Active => "ACTIVE",
        }
    }
}

/// Identifies the cycle a timer firing handed to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleTicket {
    generation: u32,
}

impl CycleTicket {
    pub fn generation(self) -> u32 {
        self.generation
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallDecision {
    /// Current is sufficient, or the sample was inconclusive; poll again.
    Rearm,
    /// Stall detected; halt the motor and stop polling.
    Halt,
    /// A newer drive command owns the timer; do nothing.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct StallMonitor {
    threshold_mv: i32,
    raw_threshold: Option<i32>,
    state: MonitorState,
    generation: u32,
    in_flight: Option<CycleTicket>,
}

impl StallMonitor {
    pub fn new(config: &ActuatorConfig) -> Self {
        Self {
            threshold_mv: config.stall_threshold_mv,
            raw_threshold: config.raw_stall_threshold,
            state: MonitorState::Idle,
            generation: 0,
            in_flight: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == MonitorState::Active
    }

    pub fn cycle_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// A drive command was issued. The caller starts the timer.
    pub fn arm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.state = MonitorState::Active;
        self.in_flight = None;
    }

    pub fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.state = MonitorState::Idle;
        self.in_flight = None;
    }

    /// Timer expiry. Returns the cycle to queue, or `None` when idle or a
    /// cycle is already pending (the firing is absorbed).
    pub fn timer_fired(&mut self) -> Option<CycleTicket> {
        if self.state != MonitorState::Active || self.in_flight.is_some() {
            return None;
        }
        let ticket = CycleTicket {
            generation: self.generation,
        };
        self.in_flight = Some(ticket);
        Some(ticket)
    }

    /// The binding could not queue a ticket. Frees the in-flight slot and
    /// returns whether the timer must be restarted to keep polling.
    pub fn cycle_dropped(&mut self, ticket: CycleTicket) -> bool {
        if self.in_flight != Some(ticket) {
            return false;
        }
        self.in_flight = None;
        self.is_current(ticket)
    }

    /// Whether a ticket still belongs to the current drive command.
    pub fn is_current(&self, ticket: CycleTicket) -> bool {
        self.state == MonitorState::Active && ticket.generation == self.generation
    }

    /// Close out a cycle with its sample.
    pub fn complete(
        &mut self,
        ticket: CycleTicket,
        sample: Result<Reading, SampleError>,
    ) -> StallDecision {
        if self.in_flight == Some(ticket) {
            self.in_flight = None;
        }
        if !self.is_current(ticket) {
            return StallDecision::Superseded;
        }

        let stalled = match sample {
            Ok(Reading::Millivolts(mv)) => mv < self.threshold_mv,
            Ok(Reading::Raw(raw)) => self.raw_threshold.is_some_and(|limit| raw < limit),
            Err(_) => false,
        };

        if stalled {
            self.state = MonitorState::Idle;
            StallDecision::Halt
        } else {
            StallDecision::Rearm
        }
    }
}
