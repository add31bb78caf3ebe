//! Card-controls bridge. `system` talks to the platform helper; `command`
//! and `parse` cover process and output handling. [`resolve_card_controls`]
//! picks the helper or the in-process fallback once at startup.

mod command;
mod parse;
mod system;

use cardsense_core::config::CardsenseConfig;
use cardsense_core::controls::{resolve_controls, CardControls, ResolvedControls};
use cardsense_core::error::{CardsenseError, CardsenseResult};
use std::sync::Arc;

pub use system::{SecureChannelControls, DEFAULT_CONTROLS_PATHS};

/// Connect to the secure channel, substituting the fallback when it cannot
/// be loaded and `controls.allow_fallback` permits it.
pub async fn resolve_card_controls(config: &CardsenseConfig) -> CardsenseResult<ResolvedControls> {
    let loaded = SecureChannelControls::connect(config).await;
    match loaded {
        Err(err) if !config.controls.allow_fallback => Err(CardsenseError::Controls(format!(
            "secure channel unavailable and fallback disabled: {err}"
        ))),
        loaded => Ok(resolve_controls(
            loaded.map(|controls| Arc::new(controls) as Arc<dyn CardControls>),
        )),
    }
}
