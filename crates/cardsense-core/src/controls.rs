//! Card lock/unlock capability and the scoped `with_card_lock` helper.

use crate::error::{CardsenseError, CardsenseResult};
use async_trait::async_trait;
use log::{debug, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Channel id reported by [`FallbackControls`].
pub const FALLBACK_CHANNEL_ID: &str = "mock-secure-channel";

/// Lock status reported by a single lock or unlock round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardLockStatus {
    Locked,
    Unlocked,
}

impl CardLockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardLockStatus::Locked => "locked",
            CardLockStatus::Unlocked => "unlocked",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "locked" => Some(CardLockStatus::Locked),
            "unlocked" => Some(CardLockStatus::Unlocked),
            _ => None,
        }
    }
}

impl fmt::Display for CardLockStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Abstraction over the card-controls channel.
///
/// Implementations may talk to a real secure channel and are assumed to be
/// fallible; errors must be returned to the caller rather than swallowed.
/// Calls are expected to be idempotent.
#[async_trait]
pub trait CardControls: Send + Sync {
    /// Identifier of the channel carrying lock requests.
    fn secure_channel_id(&self) -> &str;

    async fn lock_card(&self, card_id: &str) -> CardsenseResult<CardLockStatus>;

    async fn unlock_card(&self, card_id: &str) -> CardsenseResult<CardLockStatus>;

    async fn set_spending_limit(&self, card_id: &str, amount: u64) -> CardsenseResult<()>;
}

/// In-process stand-in used when no secure channel is available.
#[derive(Debug, Default, Clone, Copy)]
pub struct FallbackControls;

#[async_trait]
impl CardControls for FallbackControls {
    fn secure_channel_id(&self) -> &str {
        FALLBACK_CHANNEL_ID
    }

    async fn lock_card(&self, _card_id: &str) -> CardsenseResult<CardLockStatus> {
        Ok(CardLockStatus::Locked)
    }

    async fn unlock_card(&self, _card_id: &str) -> CardsenseResult<CardLockStatus> {
        Ok(CardLockStatus::Unlocked)
    }

    async fn set_spending_limit(&self, _card_id: &str, _amount: u64) -> CardsenseResult<()> {
        Ok(())
    }
}

/// Which implementation [`resolve_controls`] settled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlsKind {
    Secure,
    Fallback,
}

/// The capability chosen at startup.
#[derive(Clone)]
pub struct ResolvedControls {
    pub controls: Arc<dyn CardControls>,
    pub kind: ControlsKind,
}

impl fmt::Debug for ResolvedControls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedControls")
            .field("channel", &self.controls.secure_channel_id())
            .field("kind", &self.kind)
            .finish()
    }
}

/// Settle on the loaded secure channel, or [`FallbackControls`] if loading failed.
pub fn resolve_controls(loaded: CardsenseResult<Arc<dyn CardControls>>) -> ResolvedControls {
    match loaded {
        Ok(controls) => ResolvedControls {
            controls,
            kind: ControlsKind::Secure,
        },
        Err(err) => {
            debug!("card controls channel unavailable, using in-process fallback: {err}");
            ResolvedControls {
                controls: Arc::new(FallbackControls),
                kind: ControlsKind::Fallback,
            }
        }
    }
}

/// Unlocks the card on drop unless the bracket completed normally.
struct UnlockGuard {
    controls: Arc<dyn CardControls>,
    card_id: String,
    armed: bool,
}

impl UnlockGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for UnlockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let controls = self.controls.clone();
        let card_id = std::mem::take(&mut self.card_id);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                debug!("lock bracket for {card_id} abandoned; unlocking in background");
                runtime.spawn(async move {
                    if let Err(err) = controls.unlock_card(&card_id).await {
                        warn!("background unlock for {card_id} failed: {err}");
                    }
                });
            }
            Err(_) => warn!("lock bracket for {card_id} abandoned outside a runtime; card left locked"),
        }
    }
}

/// Run `action` while `card_id` is locked.
///
/// The card is locked first and the action starts only once the lock
/// round trip completes. Unlock is attempted exactly once whether the
/// action succeeds or fails. An action error wins over an unlock error.
/// If the returned future is dropped mid-way, the unlock still runs once on
/// the current runtime.
pub async fn with_card_lock<T, E, F, Fut>(
    controls: &Arc<dyn CardControls>,
    card_id: &str,
    action: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<CardsenseError>,
{
    controls.lock_card(card_id).await.map_err(E::from)?;

    let mut guard = UnlockGuard {
        controls: controls.clone(),
        card_id: card_id.to_string(),
        armed: true,
    };

    let outcome = action().await;

    // Once spawned, the unlock belongs to its own task; the guard stands down.
    let unlock = {
        let controls = controls.clone();
        let card_id = card_id.to_string();
        tokio::spawn(async move { controls.unlock_card(&card_id).await })
    };
    guard.disarm();
    let unlocked = unlock.await.unwrap_or_else(|err| {
        Err(CardsenseError::Controls(format!(
            "unlock task for {card_id} did not complete: {err}"
        )))
    });

    match (outcome, unlocked) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(err)) => Err(E::from(err)),
        (Err(err), Ok(_)) => Err(err),
        (Err(err), Err(unlock_err)) => {
            warn!("unlock for {card_id} failed after action error: {unlock_err}");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recording {
        calls: Mutex<Vec<String>>,
        fail_lock: bool,
        fail_unlock: bool,
        unlock_delay: Duration,
    }

    impl Recording {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CardControls for Recording {
        fn secure_channel_id(&self) -> &str {
            "test-channel"
        }

        async fn lock_card(&self, card_id: &str) -> CardsenseResult<CardLockStatus> {
            self.calls.lock().unwrap().push(format!("lock:{card_id}"));
            if self.fail_lock {
                return Err(CardsenseError::Controls("lock refused".into()));
            }
            Ok(CardLockStatus::Locked)
        }

        async fn unlock_card(&self, card_id: &str) -> CardsenseResult<CardLockStatus> {
            self.calls.lock().unwrap().push(format!("unlock:{card_id}"));
            if !self.unlock_delay.is_zero() {
                tokio::time::sleep(self.unlock_delay).await;
            }
            if self.fail_unlock {
                return Err(CardsenseError::Controls("unlock refused".into()));
            }
            Ok(CardLockStatus::Unlocked)
        }

        async fn set_spending_limit(&self, _card_id: &str, _amount: u64) -> CardsenseResult<()> {
            Ok(())
        }
    }

    fn controls(recording: Recording) -> (Arc<Recording>, Arc<dyn CardControls>) {
        let recording = Arc::new(recording);
        let dynamic: Arc<dyn CardControls> = recording.clone();
        (recording, dynamic)
    }

    #[tokio::test]
    async fn action_runs_between_lock_and_unlock() {
        let (recording, controls) = controls(Recording::default());
        let observer = recording.clone();

        let value: Result<u32, CardsenseError> = with_card_lock(&controls, "cs-1", || async move {
            observer.calls.lock().unwrap().push("action".into());
            Ok(7)
        })
        .await;

        assert_eq!(value.unwrap(), 7);
        assert_eq!(recording.calls(), vec!["lock:cs-1", "action", "unlock:cs-1"]);
    }

    #[tokio::test]
    async fn failing_action_still_unlocks_once() {
        let (recording, controls) = controls(Recording::default());

        let err = with_card_lock(&controls, "cs-1", || async {
            Err::<(), _>(CardsenseError::Controls("boom".into()))
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("boom"));
        assert_eq!(recording.calls(), vec!["lock:cs-1", "unlock:cs-1"]);
    }

    #[tokio::test]
    async fn action_error_wins_over_unlock_error() {
        let (recording, controls) = controls(Recording {
            fail_unlock: true,
            ..Recording::default()
        });

        let err = with_card_lock(&controls, "cs-1", || async {
            Err::<(), _>(CardsenseError::ProfileUnavailable("action".into()))
        })
        .await
        .unwrap_err();

        assert_eq!(err.code(), "CS3000");
        assert_eq!(recording.calls().len(), 2);
    }

    #[tokio::test]
    async fn unlock_error_surfaces_after_successful_action() {
        let (_, controls) = controls(Recording {
            fail_unlock: true,
            ..Recording::default()
        });

        let err = with_card_lock(&controls, "cs-1", || async { Ok::<_, CardsenseError>(()) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unlock refused"));
    }

    #[tokio::test]
    async fn lock_failure_skips_action_and_unlock() {
        let (recording, controls) = controls(Recording {
            fail_lock: true,
            ..Recording::default()
        });

        let observer = recording.clone();
        let err = with_card_lock(&controls, "cs-1", || async move {
            observer.calls.lock().unwrap().push("action".into());
            Ok::<(), CardsenseError>(())
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("lock refused"));
        assert_eq!(recording.calls(), vec!["lock:cs-1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_bracket_unlocks_in_background() {
        let (recording, controls) = controls(Recording::default());

        let bracket = with_card_lock(&controls, "cs-9", || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), CardsenseError>(())
        });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), bracket).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(recording.calls(), vec!["lock:cs-9", "unlock:cs-9"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_unlock_unlocks_once() {
        let (recording, controls) = controls(Recording {
            unlock_delay: Duration::from_millis(50),
            ..Recording::default()
        });

        let bracket = with_card_lock(&controls, "cs-1", || async { Ok::<(), CardsenseError>(()) });
        let timed_out = tokio::time::timeout(Duration::from_millis(10), bracket).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(recording.calls(), vec!["lock:cs-1", "unlock:cs-1"]);
    }

    #[tokio::test]
    async fn fallback_always_succeeds() {
        let fallback = FallbackControls;
        assert_eq!(fallback.secure_channel_id(), FALLBACK_CHANNEL_ID);
        assert_eq!(fallback.lock_card("x").await.unwrap(), CardLockStatus::Locked);
        assert_eq!(fallback.unlock_card("x").await.unwrap(), CardLockStatus::Unlocked);
        fallback.set_spending_limit("x", 500).await.unwrap();
    }

    #[test]
    fn resolve_substitutes_fallback_on_load_error() {
        let resolved = resolve_controls(Err(CardsenseError::Controls("no helper".into())));
        assert_eq!(resolved.kind, ControlsKind::Fallback);
        assert_eq!(resolved.controls.secure_channel_id(), FALLBACK_CHANNEL_ID);

        let secure: Arc<dyn CardControls> = Arc::new(Recording::default());
        let resolved = resolve_controls(Ok(secure));
        assert_eq!(resolved.kind, ControlsKind::Secure);
        assert_eq!(resolved.controls.secure_channel_id(), "test-channel");
    }

    #[test]
    fn lock_status_parses_helper_output() {
        assert_eq!(CardLockStatus::parse(" LOCKED\n"), Some(CardLockStatus::Locked));
        assert_eq!(CardLockStatus::parse("unlocked"), Some(CardLockStatus::Unlocked));
        assert_eq!(CardLockStatus::parse("maybe"), None);
    }
}
