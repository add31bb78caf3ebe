pub mod config;
pub mod controls;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod machine;
pub mod profile;
pub mod risk;
pub mod screen;
pub mod session;

pub use config::{CardsenseConfig, ControlsCfg, ProfileCfg, ProfileSource, RiskCfg};
pub use controls::{
    resolve_controls, with_card_lock, CardControls, CardLockStatus, ControlsKind,
    FallbackControls, ResolvedControls,
};
pub use error::{CardsenseError, CardsenseResult};
pub use machine::{IssuanceContext, IssuanceEvent, IssuanceMachine, IssuanceState};
pub use profile::{CardProfile, ProfileProvider};
pub use risk::{RiskAssessment, RiskDriver, RiskPolicy};
pub use screen::{LockOutcome, LockState, OnboardingScreen, ScreenOptions};
pub use session::{IssuanceSession, IssuanceSnapshot, SessionHandle};
