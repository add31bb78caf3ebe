//! Onboarding screen controller.
//!
//! Wires button presses to issuance events and lock actions. Layout and
//! styling live with whatever front end consumes this; the controller only
//! decides what each control means in the current state.

use crate::controls::{with_card_lock, CardControls, CardLockStatus};
use crate::error::{CardsenseError, CardsenseResult};
use crate::lifecycle::{AppState, AppStateListeners, ListenerHandle};
use crate::machine::{IssuanceEvent, IssuanceMachine, IssuanceState, Transition};
use crate::profile::{CardProfile, ProfileProvider};
use crate::risk::RiskPolicy;
use crate::session::{IssuanceSession, SessionHandle};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Primary button for an issuance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionButton {
    pub label: &'static str,
    pub intent: Option<IssuanceEvent>,
}

impl ActionButton {
    pub fn disabled(&self) -> bool {
        self.intent.is_none()
    }
}

pub fn primary_action(state: IssuanceState) -> ActionButton {
    match state {
        IssuanceState::Idle => ActionButton {
            label: "Spin up virtual card",
            intent: Some(IssuanceEvent::RequestCard),
        },
        IssuanceState::Verifying => ActionButton {
            label: "Completing checks…",
            intent: None,
        },
        IssuanceState::Approved => ActionButton {
            label: "Share card details securely",
            intent: Some(IssuanceEvent::Reset),
        },
        IssuanceState::Blocked => ActionButton {
            label: "Review insights and retry",
            intent: Some(IssuanceEvent::Reset),
        },
    }
}

/// Headline copy shown for an issuance state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssuanceCopy {
    pub eyebrow: &'static str,
    pub title: &'static str,
}

pub fn issuance_copy(state: IssuanceState) -> IssuanceCopy {
    let (eyebrow, title) = match state {
        IssuanceState::Idle => ("Activation", "Issue a travel-safe virtual card in seconds"),
        IssuanceState::Verifying => ("Intelligence", "Running velocity and travel-risk checks"),
        IssuanceState::Approved => ("Success", "Your virtual card is live"),
        IssuanceState::Blocked => ("Action needed", "We spotted something that needs review"),
    };
    IssuanceCopy { eyebrow, title }
}

/// Local view of the lock button; not a statement about the card itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockState {
    #[default]
    Idle,
    Locking,
    Locked,
}

/// What a lock press achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Locked { channel_id: String },
    NotLocked(CardLockStatus),
    /// A lock was already in progress; the press was ignored.
    Busy,
}

/// Knobs for [`OnboardingScreen::mount`].
#[derive(Debug, Clone)]
pub struct ScreenOptions {
    pub risk: RiskPolicy,
    pub mutation_delay: Duration,
    pub rng_seed: Option<u64>,
    pub app_state: Option<AppStateListeners>,
}

impl Default for ScreenOptions {
    fn default() -> Self {
        Self {
            risk: RiskPolicy::default(),
            mutation_delay: Duration::from_millis(380),
            rng_seed: None,
            app_state: None,
        }
    }
}

pub struct OnboardingScreen {
    profile: Arc<CardProfile>,
    session: SessionHandle,
    controls: Arc<dyn CardControls>,
    mutation_delay: Duration,
    lock_state: Mutex<LockState>,
    app_state: Arc<Mutex<AppState>>,
    _app_listener: Option<ListenerHandle>,
}

impl OnboardingScreen {
    /// Fetch the profile and start an issuance session for it.
    ///
    /// A profile failure is returned as-is; the caller shows a retryable
    /// error and calls `mount` again.
    pub async fn mount(
        provider: &dyn ProfileProvider,
        controls: Arc<dyn CardControls>,
        options: ScreenOptions,
    ) -> CardsenseResult<Self> {
        let profile = Arc::new(provider.fetch_profile().await?);
        let machine = IssuanceMachine::new(profile.clone());
        let session = match options.rng_seed {
            Some(seed) => IssuanceSession::with_rng(machine, options.risk, StdRng::seed_from_u64(seed)),
            None => IssuanceSession::new(machine, options.risk),
        };

        let app_state = Arc::new(Mutex::new(
            options
                .app_state
                .as_ref()
                .map(AppStateListeners::current)
                .unwrap_or_default(),
        ));
        let app_listener = options.app_state.as_ref().map(|listeners| {
            let seen = app_state.clone();
            let card_id = profile.card_id.clone();
            listeners.register(move |state| {
                debug!("onboarding screen for {card_id} observed app state {state:?}");
                *seen.lock().unwrap_or_else(|p| p.into_inner()) = state;
            })
        });

        info!("onboarding screen mounted for {}", profile.card_id);
        Ok(Self {
            profile,
            session: session.spawn(),
            controls,
            mutation_delay: options.mutation_delay,
            lock_state: Mutex::new(LockState::Idle),
            app_state,
            _app_listener: app_listener,
        })
    }

    pub fn profile(&self) -> &CardProfile {
        &self.profile
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    pub fn issuance_state(&self) -> IssuanceState {
        self.session.current_state()
    }

    pub fn primary_action(&self) -> ActionButton {
        primary_action(self.issuance_state())
    }

    pub fn copy(&self) -> IssuanceCopy {
        issuance_copy(self.issuance_state())
    }

    pub fn channel_id(&self) -> &str {
        self.controls.secure_channel_id()
    }

    pub fn lock_state(&self) -> LockState {
        *self.lock_state_mut()
    }

    pub fn app_state(&self) -> AppState {
        *self.app_state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_state_mut(&self) -> MutexGuard<'_, LockState> {
        self.lock_state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Press the primary button. Disabled buttons do nothing.
    pub async fn press_primary(&self) -> CardsenseResult<Option<Transition>> {
        match self.primary_action().intent {
            Some(event) => self.session.send(event).await,
            None => Ok(None),
        }
    }

    /// Run the remote lock flow under a lock/unlock bracket.
    pub async fn lock_card(&self) -> CardsenseResult<LockOutcome> {
        {
            let mut state = self.lock_state_mut();
            if *state == LockState::Locking {
                return Ok(LockOutcome::Busy);
            }
            *state = LockState::Locking;
        }

        let delay = self.mutation_delay;
        let result = with_card_lock(&self.controls, &self.profile.card_id, || async move {
            tokio::time::sleep(delay).await;
            Ok::<_, CardsenseError>(CardLockStatus::Locked)
        })
        .await;

        let mut state = self.lock_state_mut();
        match result {
            Ok(CardLockStatus::Locked) => {
                *state = LockState::Locked;
                let channel_id = self.channel_id().to_string();
                info!("remote lock engaged via {channel_id}");
                Ok(LockOutcome::Locked { channel_id })
            }
            Ok(other) => {
                *state = LockState::Idle;
                Ok(LockOutcome::NotLocked(other))
            }
            Err(err) => {
                *state = LockState::Idle;
                Err(err)
            }
        }
    }

    /// Apply a spending limit while the card is locked.
    pub async fn set_spending_limit(&self, amount: u64) -> CardsenseResult<()> {
        let card_id = self.profile.card_id.as_str();
        let controls = self.controls.clone();
        with_card_lock(&self.controls, card_id, || async move {
            controls.set_spending_limit(card_id, amount).await
        })
        .await
    }

    /// Tear the screen down, cancelling any pending risk check.
    pub async fn unmount(self) {
        self.session.teardown().await;
    }
}
