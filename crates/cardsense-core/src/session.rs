//! Issuance session: the machine and its risk driver on a single task.
//!
//! All mutation happens on the session task, one command or resolution at a
//! time. Callers talk to it through a [`SessionHandle`], which exposes the
//! usual dispatch/observe surface (`send`, `current_state`,
//! `current_context`). Dropping or tearing down the handle cancels any
//! outstanding risk run.

use crate::error::{CardsenseError, CardsenseResult};
use crate::machine::{IssuanceContext, IssuanceEvent, IssuanceMachine, IssuanceState, Transition};
use crate::risk::{Resolution, RiskDriver, RiskPolicy};
use log::debug;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const COMMAND_BUFFER: usize = 32;

/// Point-in-time view of the machine published after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuanceSnapshot {
    pub state: IssuanceState,
    pub context: IssuanceContext,
    pub entry: u64,
}

impl IssuanceSnapshot {
    fn of(machine: &IssuanceMachine) -> Self {
        Self {
            state: machine.state(),
            context: machine.context().clone(),
            entry: machine.verifying_entry(),
        }
    }
}

struct SessionCommand {
    event: IssuanceEvent,
    reply: oneshot::Sender<Option<Transition>>,
}

/// A machine paired with the driver that resolves its risk checks.
pub struct IssuanceSession {
    machine: IssuanceMachine,
    driver: RiskDriver,
    resolutions: mpsc::UnboundedReceiver<Resolution>,
}

impl IssuanceSession {
    pub fn new(machine: IssuanceMachine, policy: RiskPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            machine,
            driver: RiskDriver::new(policy, tx),
            resolutions: rx,
        }
    }

    pub fn with_rng(machine: IssuanceMachine, policy: RiskPolicy, rng: StdRng) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            machine,
            driver: RiskDriver::with_rng(policy, rng, tx),
            resolutions: rx,
        }
    }

    /// Move the session onto its own task. Must be called inside a tokio runtime.
    pub fn spawn(self) -> SessionHandle {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(IssuanceSnapshot::of(&self.machine));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run(self, command_rx, snapshot_tx, shutdown.clone()));

        SessionHandle {
            commands: command_tx,
            snapshot: snapshot_rx,
            shutdown,
            task: Some(task),
        }
    }
}

async fn run(
    session: IssuanceSession,
    mut commands: mpsc::Receiver<SessionCommand>,
    snapshots: watch::Sender<IssuanceSnapshot>,
    shutdown: CancellationToken,
) {
    let IssuanceSession {
        mut machine,
        mut driver,
        mut resolutions,
    } = session;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            command = commands.recv() => {
                let Some(SessionCommand { event, reply }) = command else {
                    break;
                };
                let step = apply(&mut machine, &mut driver, &snapshots, event);
                let _ = reply.send(step);
            }
            Some(resolution) = resolutions.recv() => {
                if driver.accepts(&resolution, machine.state(), machine.verifying_entry()) {
                    apply(&mut machine, &mut driver, &snapshots, resolution.assessment.into_event());
                }
            }
        }
    }

    debug!("issuance session for {} torn down", machine.context().profile.card_id);
    driver.cancel();
}

fn apply(
    machine: &mut IssuanceMachine,
    driver: &mut RiskDriver,
    snapshots: &watch::Sender<IssuanceSnapshot>,
    event: IssuanceEvent,
) -> Option<Transition> {
    let step = machine.send(event);
    match step {
        Some(step) => {
            debug!("issuance {} -> {} on {event:?}", step.from, step.to);
            driver.sync(machine.state(), machine.verifying_entry());
            snapshots.send_replace(IssuanceSnapshot::of(machine));
        }
        None => debug!("ignoring {event:?} in state {}", machine.state()),
    }
    step
}

/// Dispatch/observe handle for a running session.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    snapshot: watch::Receiver<IssuanceSnapshot>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SessionHandle {
    /// Deliver `event` and wait until the session has processed it.
    /// Returns the transition it caused, if any.
    pub async fn send(&self, event: IssuanceEvent) -> CardsenseResult<Option<Transition>> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(SessionCommand { event, reply })
            .await
            .map_err(|_| CardsenseError::SessionClosed)?;
        response.await.map_err(|_| CardsenseError::SessionClosed)
    }

    pub fn current_state(&self) -> IssuanceState {
        self.snapshot.borrow().state
    }

    pub fn current_context(&self) -> IssuanceContext {
        self.snapshot.borrow().context.clone()
    }

    pub fn snapshot(&self) -> IssuanceSnapshot {
        self.snapshot.borrow().clone()
    }

    /// New receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<IssuanceSnapshot> {
        self.snapshot.clone()
    }

    /// Wait until the session is no longer `verifying`.
    pub async fn settled(&self) -> CardsenseResult<IssuanceSnapshot> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(|snapshot| snapshot.state != IssuanceState::Verifying)
            .await
            .map_err(|_| CardsenseError::SessionClosed)?;
        Ok(snapshot.clone())
    }

    /// Stop the session and cancel any pending risk run.
    pub async fn teardown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::CardProfile;
    use rand::SeedableRng;
    use std::sync::Arc;
    use std::time::Duration;

    fn spawn_fixed(score: u32) -> SessionHandle {
        let policy = RiskPolicy {
            min_score: score,
            max_score: score,
            ..RiskPolicy::default()
        };
        let machine = IssuanceMachine::new(Arc::new(CardProfile::demo()));
        IssuanceSession::with_rng(machine, policy, StdRng::seed_from_u64(0)).spawn()
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_starts_idle() {
        let handle = spawn_fixed(400);
        assert_eq!(handle.current_state(), IssuanceState::Idle);
        assert_eq!(handle.current_context().risk_score, None);
        assert_eq!(handle.current_context().profile.card_id, "cs-44492");
        assert_eq!(handle.snapshot().entry, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_event_reports_no_transition() {
        let handle = spawn_fixed(400);
        let step = handle.send(IssuanceEvent::Reset).await.unwrap();
        assert!(step.is_none());
        assert_eq!(handle.current_state(), IssuanceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn send_after_teardown_fails() {
        let handle = spawn_fixed(400);
        let commands = handle.commands.clone();
        handle.teardown().await;

        let (reply, _response) = oneshot::channel();
        let sent = commands
            .send(SessionCommand {
                event: IssuanceEvent::RequestCard,
                reply,
            })
            .await;
        assert!(sent.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_verifying_then_result() {
        let handle = spawn_fixed(780);
        let mut rx = handle.subscribe();
        handle.send(IssuanceEvent::RequestCard).await.unwrap();

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, IssuanceState::Verifying);

        tokio::time::sleep(Duration::from_millis(800)).await;
        rx.changed().await.unwrap();
        let snapshot = rx.borrow_and_update().clone();
        assert_eq!(snapshot.state, IssuanceState::Blocked);
        assert_eq!(snapshot.context.risk_score, Some(780));
    }
}
