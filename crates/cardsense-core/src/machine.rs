//! Card issuance state machine.
//!
//! The machine is synchronous and performs no I/O: given a state and an
//! event the next state is fully determined. Waiting on the risk check is
//! the job of [`crate::risk::RiskDriver`]; the machine only records the
//! outcome once a `ResolveChecks` event arrives.

use crate::profile::CardProfile;
use log::{info, warn};
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a single issuance attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IssuanceState {
    #[default]
    Idle,
    Verifying,
    Approved,
    Blocked,
}

impl IssuanceState {
    pub const ALL: [IssuanceState; 4] = [
        IssuanceState::Idle,
        IssuanceState::Verifying,
        IssuanceState::Approved,
        IssuanceState::Blocked,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IssuanceState::Idle => "idle",
            IssuanceState::Verifying => "verifying",
            IssuanceState::Approved => "approved",
            IssuanceState::Blocked => "blocked",
        }
    }

    /// `approved` and `blocked` end the current attempt; only `Reset` leaves them.
    pub fn is_settled(&self) -> bool {
        matches!(self, IssuanceState::Approved | IssuanceState::Blocked)
    }
}

impl fmt::Display for IssuanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input accepted by the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuanceEvent {
    RequestCard,
    ResolveChecks { approved: bool, risk_score: u32 },
    Reset,
}

/// Observability hook fired when a state is entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySignal {
    RiskCheckStarted,
    Issued,
    Blocked,
}

impl EntrySignal {
    fn for_state(state: IssuanceState) -> Option<Self> {
        match state {
            IssuanceState::Verifying => Some(EntrySignal::RiskCheckStarted),
            IssuanceState::Approved => Some(EntrySignal::Issued),
            IssuanceState::Blocked => Some(EntrySignal::Blocked),
            IssuanceState::Idle => None,
        }
    }
}

/// Data carried alongside the state.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceContext {
    pub profile: Arc<CardProfile>,
    pub risk_score: Option<u32>,
}

impl IssuanceContext {
    pub fn new(profile: Arc<CardProfile>) -> Self {
        Self {
            profile,
            risk_score: None,
        }
    }
}

/// A state change produced by [`IssuanceMachine::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: IssuanceState,
    pub to: IssuanceState,
    pub signal: Option<EntrySignal>,
}

/// Next state for `event` in `state`, or `None` when the event does not apply.
pub fn transition(state: IssuanceState, event: &IssuanceEvent) -> Option<IssuanceState> {
    match (state, event) {
        (IssuanceState::Idle, IssuanceEvent::RequestCard) => Some(IssuanceState::Verifying),
        (IssuanceState::Verifying, IssuanceEvent::ResolveChecks { approved: true, .. }) => {
            Some(IssuanceState::Approved)
        }
        (IssuanceState::Verifying, IssuanceEvent::ResolveChecks { approved: false, .. }) => {
            Some(IssuanceState::Blocked)
        }
        (IssuanceState::Approved | IssuanceState::Blocked, IssuanceEvent::Reset) => {
            Some(IssuanceState::Idle)
        }
        _ => None,
    }
}

/// Receives entry signals synchronously, once per transition.
pub trait IssuanceObserver: Send {
    fn on_entry(&mut self, signal: EntrySignal, context: &IssuanceContext);
}

/// Default observer: writes each signal to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl IssuanceObserver for LogObserver {
    fn on_entry(&mut self, signal: EntrySignal, context: &IssuanceContext) {
        match signal {
            EntrySignal::RiskCheckStarted => {
                info!("running risk checks for {}", context.profile.card_id)
            }
            EntrySignal::Issued => info!("virtual card issued for {}", context.profile.user_name),
            EntrySignal::Blocked => warn!("issuance blocked for {}", context.profile.user_name),
        }
    }
}

/// Issuance machine instance bound to one card profile.
pub struct IssuanceMachine {
    state: IssuanceState,
    context: IssuanceContext,
    verifying_entries: u64,
    observer: Box<dyn IssuanceObserver>,
}

impl fmt::Debug for IssuanceMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuanceMachine")
            .field("state", &self.state)
            .field("context", &self.context)
            .field("verifying_entries", &self.verifying_entries)
            .finish()
    }
}

impl IssuanceMachine {
    /// Create a machine in `idle` that logs its entry signals.
    pub fn new(profile: Arc<CardProfile>) -> Self {
        Self::with_observer(profile, Box::new(LogObserver))
    }

    pub fn with_observer(profile: Arc<CardProfile>, observer: Box<dyn IssuanceObserver>) -> Self {
        Self {
            state: IssuanceState::Idle,
            context: IssuanceContext::new(profile),
            verifying_entries: 0,
            observer,
        }
    }

    pub fn state(&self) -> IssuanceState {
        self.state
    }

    pub fn context(&self) -> &IssuanceContext {
        &self.context
    }

    /// Identity of the most recent `verifying` entry. Zero before the first
    /// `RequestCard`.
    pub fn verifying_entry(&self) -> u64 {
        self.verifying_entries
    }

    /// Apply `event`. Events that do not apply to the current state are
    /// ignored and return `None`.
    pub fn send(&mut self, event: IssuanceEvent) -> Option<Transition> {
        let from = self.state;
        let to = transition(from, &event)?;

        match event {
            IssuanceEvent::ResolveChecks { risk_score, .. } => {
                self.context.risk_score = Some(risk_score);
            }
            IssuanceEvent::Reset => self.context.risk_score = None,
            IssuanceEvent::RequestCard => {}
        }

        self.state = to;
        if to == IssuanceState::Verifying {
            self.verifying_entries += 1;
        }

        let signal = EntrySignal::for_state(to);
        if let Some(signal) = signal {
            self.observer.on_entry(signal, &self.context);
        }

        Some(Transition { from, to, signal })
    }
}
