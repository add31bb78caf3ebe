//! Card profile records and the providers that supply them.

use crate::config::{CardsenseConfig, ProfileSource};
use crate::error::{CardsenseError, CardsenseResult};
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardLevel {
    Essential,
    Revolv,
    Voyager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Currency {
    #[serde(rename = "USD")]
    Usd,
    #[serde(rename = "GBP")]
    Gbp,
    #[serde(rename = "EUR")]
    Eur,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Gbp => "GBP",
            Currency::Eur => "EUR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Up,
    Down,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingInsight {
    pub id: String,
    pub title: String,
    pub amount: f64,
    pub trend: Trend,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextBestAction {
    pub id: String,
    pub label: String,
    pub impact: Impact,
}

/// Everything the onboarding flow knows about a cardholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardProfile {
    pub card_id: String,
    pub user_name: String,
    pub card_level: CardLevel,
    pub currency: Currency,
    pub credit_limit: f64,
    pub current_balance: f64,
    pub insights: Vec<SpendingInsight>,
    pub next_best_actions: Vec<NextBestAction>,
}

impl CardProfile {
    /// Remaining headroom on the card; negative when over limit.
    pub fn available_credit(&self) -> f64 {
        self.credit_limit - self.current_balance
    }

    /// Profile served by the demo provider.
    pub fn demo() -> Self {
        Self {
            card_id: "cs-44492".to_string(),
            user_name: "Priya Sen".to_string(),
            card_level: CardLevel::Voyager,
            currency: Currency::Gbp,
            credit_limit: 3200.0,
            current_balance: 1180.0,
            insights: vec![
                insight("fx", "FX spend this week", 480.0, Trend::Up),
                insight("subs", "Subscriptions coming due", 5.0, Trend::Flat),
                insight("travel", "Travel wallet top-up suggested", 300.0, Trend::Down),
            ],
            next_best_actions: vec![
                action("freeze", "Enable travel-safe card freeze", Impact::High),
                action("alerts", "Tune cross-border alerts", Impact::Medium),
                action("budget", "Lock FX budget for this trip", Impact::Medium),
            ],
        }
    }
}

fn insight(id: &str, title: &str, amount: f64, trend: Trend) -> SpendingInsight {
    SpendingInsight {
        id: id.to_string(),
        title: title.to_string(),
        amount,
        trend,
    }
}

fn action(id: &str, label: &str, impact: Impact) -> NextBestAction {
    NextBestAction {
        id: id.to_string(),
        label: label.to_string(),
        impact,
    }
}

/// Source of the card profile the onboarding screen is built around.
///
/// Fetching may fail; callers are expected to surface the error and retry
/// rather than construct an issuance session without a profile.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn fetch_profile(&self) -> CardsenseResult<CardProfile>;
}

/// Simulated network wait of `latency + uniform(0, jitter)`.
pub fn simulated_latency<R: Rng + ?Sized>(latency: Duration, jitter: Duration, rng: &mut R) -> Duration {
    let jitter_ms = jitter.as_millis() as u64;
    if jitter_ms == 0 {
        return latency;
    }
    let extra = rng.gen_range(0..jitter_ms);
    latency + Duration::from_millis(extra)
}

/// Serves [`CardProfile::demo`] after a simulated network round trip.
#[derive(Debug, Clone)]
pub struct DemoProfileProvider {
    latency: Duration,
    jitter: Duration,
}

impl DemoProfileProvider {
    pub fn new(latency: Duration, jitter: Duration) -> Self {
        Self { latency, jitter }
    }
}

#[async_trait]
impl ProfileProvider for DemoProfileProvider {
    async fn fetch_profile(&self) -> CardsenseResult<CardProfile> {
        let wait = simulated_latency(self.latency, self.jitter, &mut rand::thread_rng());
        tokio::time::sleep(wait).await;
        Ok(CardProfile::demo())
    }
}

/// Reads a JSON profile from disk on every fetch.
#[derive(Debug, Clone)]
pub struct FileProfileProvider {
    path: PathBuf,
}

impl FileProfileProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl ProfileProvider for FileProfileProvider {
    async fn fetch_profile(&self) -> CardsenseResult<CardProfile> {
        let contents = tokio::fs::read_to_string(&self.path).await.map_err(|err| {
            CardsenseError::ProfileUnavailable(format!("{}: {err}", self.path.display()))
        })?;
        let profile = serde_json::from_str::<CardProfile>(&contents)?;
        Ok(profile)
    }
}

/// Build the provider selected by `profile.source`.
pub fn provider_from_config(config: &CardsenseConfig) -> CardsenseResult<Arc<dyn ProfileProvider>> {
    match config.profile.source {
        ProfileSource::Demo => Ok(Arc::new(DemoProfileProvider::new(
            Duration::from_millis(config.profile.latency_ms),
            Duration::from_millis(config.profile.jitter_ms),
        ))),
        ProfileSource::File => {
            let path = config.profile_path().ok_or_else(|| {
                CardsenseError::InvalidConfig("profile.path missing for file source".into())
            })?;
            Ok(Arc::new(FileProfileProvider::new(path)))
        }
    }
}
