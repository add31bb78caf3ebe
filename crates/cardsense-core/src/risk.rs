//! Asynchronous risk resolution for the `verifying` state.
//!
//! Every entry into `verifying` gets at most one live evaluation run. A run
//! waits out the configured latency under its own cancellation token and
//! then posts a [`Resolution`] tagged with the entry it belongs to. Runs
//! are cancelled as soon as the machine is somewhere else, and anything a
//! stale run still manages to post is rejected by [`RiskDriver::accepts`].

use crate::config::CardsenseConfig;
use crate::machine::{IssuanceEvent, IssuanceState};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Score range, approval cut-off and simulated latency of a risk check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskPolicy {
    pub min_score: u32,
    pub max_score: u32,
    pub approval_threshold: u32,
    pub delay: Duration,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            min_score: 200,
            max_score: 850,
            approval_threshold: 720,
            delay: Duration::from_millis(720),
        }
    }
}

impl RiskPolicy {
    pub fn from_config(config: &CardsenseConfig) -> Self {
        Self {
            min_score: config.risk.min_score,
            max_score: config.risk.max_score,
            approval_threshold: config.risk.approval_threshold,
            delay: config.risk_delay(),
        }
    }

    /// Draw a score uniformly from `[min_score, max_score]` and decide on it.
    pub fn assess<R: Rng + ?Sized>(&self, rng: &mut R) -> RiskAssessment {
        let span = self.max_score.saturating_sub(self.min_score) as f64;
        let unit: f64 = rng.gen();
        let risk_score = self.min_score + (unit * span).round() as u32;
        self.decide(risk_score)
    }

    pub fn decide(&self, risk_score: u32) -> RiskAssessment {
        RiskAssessment {
            approved: risk_score < self.approval_threshold,
            risk_score,
        }
    }
}

/// Outcome of one risk evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskAssessment {
    pub approved: bool,
    pub risk_score: u32,
}

impl RiskAssessment {
    pub fn into_event(self) -> IssuanceEvent {
        IssuanceEvent::ResolveChecks {
            approved: self.approved,
            risk_score: self.risk_score,
        }
    }
}

/// Result posted by a run, keyed by the `verifying` entry that started it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub entry: u64,
    pub assessment: RiskAssessment,
}

struct RiskRun {
    entry: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Starts and cancels evaluation runs as the machine moves between states.
pub struct RiskDriver {
    policy: RiskPolicy,
    rng: StdRng,
    scope: CancellationToken,
    live: Option<RiskRun>,
    resolutions: mpsc::UnboundedSender<Resolution>,
}

impl RiskDriver {
    pub fn new(policy: RiskPolicy, resolutions: mpsc::UnboundedSender<Resolution>) -> Self {
        Self::with_rng(policy, StdRng::from_entropy(), resolutions)
    }

    /// Use a caller-supplied RNG, e.g. a seeded one for reproducible runs.
    pub fn with_rng(
        policy: RiskPolicy,
        rng: StdRng,
        resolutions: mpsc::UnboundedSender<Resolution>,
    ) -> Self {
        Self {
            policy,
            rng,
            scope: CancellationToken::new(),
            live: None,
            resolutions,
        }
    }

    pub fn policy(&self) -> &RiskPolicy {
        &self.policy
    }

    /// Entry identity of the run currently in flight.
    pub fn live_entry(&self) -> Option<u64> {
        self.live.as_ref().map(|run| run.entry)
    }

    /// Align runs with the machine. Returns `true` when a new run started.
    ///
    /// A run is started only for a `verifying` entry that does not already
    /// have one, so repeated calls for the same entry never duplicate work.
    pub fn sync(&mut self, state: IssuanceState, entry: u64) -> bool {
        if state != IssuanceState::Verifying {
            self.cancel_live();
            return false;
        }

        if self.live_entry() == Some(entry) {
            return false;
        }

        self.cancel_live();
        self.live = Some(self.spawn_run(entry));
        true
    }

    /// Whether `resolution` still belongs to the machine's current entry.
    /// An accepted resolution completes the live run.
    pub fn accepts(&mut self, resolution: &Resolution, state: IssuanceState, entry: u64) -> bool {
        let current = state == IssuanceState::Verifying
            && resolution.entry == entry
            && self.live_entry() == Some(entry);

        if current {
            self.live = None;
        } else {
            debug!(
                "discarding stale risk resolution for entry {} (state {state}, entry {entry})",
                resolution.entry
            );
        }
        current
    }

    /// Cancel every run started by this driver.
    pub fn cancel(&mut self) {
        self.cancel_live();
        self.scope.cancel();
    }

    fn cancel_live(&mut self) {
        if let Some(run) = self.live.take() {
            debug!("cancelling risk run for entry {}", run.entry);
            run.token.cancel();
            run.handle.abort();
        }
    }

    fn spawn_run(&mut self, entry: u64) -> RiskRun {
        let assessment = self.policy.assess(&mut self.rng);
        let delay = self.policy.delay;
        let token = self.scope.child_token();
        let run_token = token.clone();
        let tx = self.resolutions.clone();

        debug!("starting risk run for entry {entry}");
        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = run_token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if !run_token.is_cancelled() {
                        let _ = tx.send(Resolution { entry, assessment });
                    }
                }
            }
        });

        RiskRun {
            entry,
            token,
            handle,
        }
    }
}

impl Drop for RiskDriver {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn driver(delay_ms: u64) -> (RiskDriver, mpsc::UnboundedReceiver<Resolution>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let policy = RiskPolicy {
            delay: Duration::from_millis(delay_ms),
            ..RiskPolicy::default()
        };
        (RiskDriver::with_rng(policy, StdRng::seed_from_u64(42), tx), rx)
    }

    #[test]
    fn assessed_scores_stay_in_range() {
        let policy = RiskPolicy::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen_approved = false;
        let mut seen_blocked = false;
        for _ in 0..5_000 {
            let outcome = policy.assess(&mut rng);
            assert!((200..=850).contains(&outcome.risk_score));
            assert_eq!(outcome.approved, outcome.risk_score < 720);
            seen_approved |= outcome.approved;
            seen_blocked |= !outcome.approved;
        }
        assert!(seen_approved && seen_blocked);
    }

    #[test]
    fn threshold_is_exclusive() {
        let policy = RiskPolicy::default();
        assert!(policy.decide(719).approved);
        assert!(!policy.decide(720).approved);
        assert_eq!(
            policy.decide(500).into_event(),
            IssuanceEvent::ResolveChecks {
                approved: true,
                risk_score: 500
            }
        );
    }

    #[test]
    fn degenerate_range_yields_fixed_score() {
        let policy = RiskPolicy {
            min_score: 400,
            max_score: 400,
            ..RiskPolicy::default()
        };
        let outcome = policy.assess(&mut StdRng::seed_from_u64(9));
        assert_eq!(outcome.risk_score, 400);
    }

    #[tokio::test(start_paused = true)]
    async fn run_posts_resolution_after_delay() {
        let (mut driver, mut rx) = driver(720);
        assert!(driver.sync(IssuanceState::Verifying, 1));

        tokio::time::sleep(Duration::from_millis(719)).await;
        assert!(rx.try_recv().is_err());

        let resolution = rx.recv().await.unwrap();
        assert_eq!(resolution.entry, 1);
        assert!(driver.accepts(&resolution, IssuanceState::Verifying, 1));
        assert_eq!(driver.live_entry(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn same_entry_never_starts_twice() {
        let (mut driver, mut rx) = driver(100);
        assert!(driver.sync(IssuanceState::Verifying, 3));
        assert!(!driver.sync(IssuanceState::Verifying, 3));
        assert!(!driver.sync(IssuanceState::Verifying, 3));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn leaving_verifying_cancels_run() {
        let (mut driver, mut rx) = driver(720);
        driver.sync(IssuanceState::Verifying, 1);
        tokio::time::sleep(Duration::from_millis(100)).await;
        driver.sync(IssuanceState::Approved, 1);
        assert_eq!(driver.live_entry(), None);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_resolution_is_rejected() {
        let (mut driver, _rx) = driver(720);
        driver.sync(IssuanceState::Verifying, 2);
        let stale = Resolution {
            entry: 1,
            assessment: RiskPolicy::default().decide(300),
        };
        assert!(!driver.accepts(&stale, IssuanceState::Verifying, 2));
        assert!(!driver.accepts(&stale, IssuanceState::Idle, 1));
        assert_eq!(driver.live_entry(), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_everything() {
        let (mut driver, mut rx) = driver(50);
        driver.sync(IssuanceState::Verifying, 1);
        driver.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err());
    }
}
