//! `CardControls` backed by the platform `card-controls` helper.
//!
//! The helper speaks a line protocol on stdout:
//!
//! ```text
//! card-controls channel-id          -> channel<TAB><id>
//! card-controls lock <card>         -> <card><TAB>locked
//! card-controls unlock <card>       -> <card><TAB>unlocked
//! card-controls limit <card> <amt>  -> <card><TAB><amt>
//! ```
//!
//! Non-zero exits are classified into `CardsenseError` variants.

use crate::command::{CommandRunner, Output};
use crate::parse::{is_valid_card_id, parse_tabular_pairs, value_for};
use async_trait::async_trait;
use cardsense_core::config::CardsenseConfig;
use cardsense_core::controls::{CardControls, CardLockStatus};
use cardsense_core::error::{CardsenseError, CardsenseResult};
use log::debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default locations probed for the helper binary.
pub const DEFAULT_CONTROLS_PATHS: &[&str] = &[
    "/usr/libexec/cardsense/card-controls",
    "/usr/local/libexec/cardsense/card-controls",
    "/usr/bin/card-controls",
    "/usr/local/bin/card-controls",
];

/// Secure channel reached through the `card-controls` helper.
#[derive(Debug, Clone)]
pub struct SecureChannelControls {
    runner: CommandRunner,
    channel_id: String,
}

impl SecureChannelControls {
    /// Locate the helper per configuration and perform the channel handshake.
    pub async fn connect(config: &CardsenseConfig) -> CardsenseResult<Self> {
        let timeout = config.controls_timeout();
        let runner = match config.controls_binary_path() {
            Some(path) => Self::runner_with_path(path, timeout)?,
            None => Self::discover(timeout)?,
        };
        Self::handshake(runner).await
    }

    /// Connect to an explicit helper binary.
    pub async fn with_path(path: PathBuf, timeout: Duration) -> CardsenseResult<Self> {
        let runner = Self::runner_with_path(path, timeout)?;
        Self::handshake(runner).await
    }

    fn runner_with_path(path: PathBuf, timeout: Duration) -> CardsenseResult<CommandRunner> {
        if !path.exists() {
            return Err(CardsenseError::InvalidConfig(format!(
                "card-controls helper not found at {}",
                path.display()
            )));
        }
        Ok(CommandRunner::new(path, timeout))
    }

    /// Walk `DEFAULT_CONTROLS_PATHS` until a helper is found.
    fn discover(timeout: Duration) -> CardsenseResult<CommandRunner> {
        for candidate in DEFAULT_CONTROLS_PATHS {
            let p = Path::new(candidate);
            if p.exists() {
                return Self::runner_with_path(p.to_path_buf(), timeout);
            }
        }
        Err(CardsenseError::InvalidConfig(format!(
            "unable to locate card-controls helper; tried {:?}",
            DEFAULT_CONTROLS_PATHS
        )))
    }

    async fn handshake(runner: CommandRunner) -> CardsenseResult<Self> {
        let out = Self::run_checked(&runner, &["channel-id"]).await?;
        let pairs = parse_tabular_pairs(&out.stdout);
        let channel_id = value_for(&pairs, "channel")
            .ok_or_else(|| {
                CardsenseError::Controls(format!(
                    "{} channel-id returned no channel: {}",
                    runner.binary().display(),
                    out.stdout.trim()
                ))
            })?
            .to_string();

        debug!(
            "card-controls helper {} opened channel {channel_id}",
            runner.binary().display()
        );
        Ok(Self { runner, channel_id })
    }

    pub fn binary(&self) -> &Path {
        self.runner.binary()
    }

    /// Run the helper and turn non-zero exits into descriptive errors.
    async fn run_checked(runner: &CommandRunner, args: &[&str]) -> CardsenseResult<Output> {
        let out = runner.run(args).await?;
        if out.status != 0 {
            return Err(Self::classify_cli_error(runner.binary(), args, &out));
        }
        Ok(out)
    }

    /// Map helper output into the right `CardsenseError` bucket.
    fn classify_cli_error(binary: &Path, args: &[&str], output: &Output) -> CardsenseError {
        let stderr = output.stderr.trim();
        let stdout = output.stdout.trim();
        let diagnostic = if !stderr.is_empty() { stderr } else { stdout };
        let diagnostic_lower = diagnostic.to_ascii_lowercase();

        if diagnostic_lower.contains("unknown card") || diagnostic_lower.contains("no such card") {
            let card = args.get(1).copied().unwrap_or_default();
            return CardsenseError::InvalidCardId(card.to_string());
        }

        CardsenseError::Controls(format!(
            "{} {} exited with code {}: {}",
            binary.display(),
            args.join(" "),
            output.status,
            diagnostic
        ))
    }

    fn ensure_card_id(card_id: &str) -> CardsenseResult<()> {
        if is_valid_card_id(card_id) {
            Ok(())
        } else {
            Err(CardsenseError::InvalidCardId(card_id.to_string()))
        }
    }

    /// Send `verb` for `card_id` and read back the reported lock status.
    async fn lock_round_trip(&self, verb: &str, card_id: &str) -> CardsenseResult<CardLockStatus> {
        Self::ensure_card_id(card_id)?;
        let out = Self::run_checked(&self.runner, &[verb, card_id]).await?;
        let pairs = parse_tabular_pairs(&out.stdout);
        value_for(&pairs, card_id)
            .and_then(CardLockStatus::parse)
            .ok_or_else(|| {
                CardsenseError::Controls(format!(
                    "{} {verb} {card_id} returned unexpected output: {}",
                    self.runner.binary().display(),
                    out.stdout.trim()
                ))
            })
    }
}

#[async_trait]
impl CardControls for SecureChannelControls {
    fn secure_channel_id(&self) -> &str {
        &self.channel_id
    }

    async fn lock_card(&self, card_id: &str) -> CardsenseResult<CardLockStatus> {
        self.lock_round_trip("lock", card_id).await
    }

    async fn unlock_card(&self, card_id: &str) -> CardsenseResult<CardLockStatus> {
        self.lock_round_trip("unlock", card_id).await
    }

    async fn set_spending_limit(&self, card_id: &str, amount: u64) -> CardsenseResult<()> {
        Self::ensure_card_id(card_id)?;
        let amount = amount.to_string();
        Self::run_checked(&self.runner, &["limit", card_id, &amount]).await?;
        Ok(())
    }
}
