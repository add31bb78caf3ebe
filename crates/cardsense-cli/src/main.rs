//! CardSense command-line interface: profile inspection, issuance runs, and
//! card-controls actions.

use anyhow::{Context, Result};
use cardsense_bridge::resolve_card_controls;
use cardsense_core::{
    logging,
    profile::provider_from_config,
    screen::{issuance_copy, LockOutcome, OnboardingScreen, ScreenOptions},
    CardsenseConfig, ControlsKind, IssuanceEvent, ResolvedControls, RiskPolicy,
};
use clap::{Parser, Subcommand};
use log::{info, warn};
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::PathBuf;

const CONFIG_ENV: &str = "CARDSENSE_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "/etc/cardsense/cardsense.toml";

/// Top-level options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "cardsense",
    version,
    about = "Virtual card onboarding: risk-checked issuance and remote card controls."
)]
struct Cli {
    /// Path to the configuration file (defaults to $CARDSENSE_CONFIG, then /etc/cardsense/cardsense.toml).
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the card profile and print it as JSON.
    Profile,

    /// Request a virtual card and wait for the risk check to settle.
    Issue {
        /// Seed the risk check for a reproducible outcome.
        #[arg(long)]
        seed: Option<u64>,

        /// Send `Reset` once the result settles, returning the card to idle.
        #[arg(long)]
        auto_reset: bool,
    },

    /// Lock the card through the secure channel.
    Lock,

    /// Apply a spending limit while the card is locked.
    Limit {
        /// New limit in whole currency units.
        amount: u64,
    },

    /// Show which card-controls channel is active.
    Channel,

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Configuration file to validate; defaults to the active config path.
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load_config(path: &PathBuf) -> Result<CardsenseConfig> {
    CardsenseConfig::load_or_default(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))
}

async fn run() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let path = config_path(&cli);

    match cli.command {
        Commands::Profile => {
            let config = load_config(&path)?;
            let provider = provider_from_config(&config)?;
            let profile = provider
                .fetch_profile()
                .await
                .context("card profile unavailable; retry shortly")?;
            println!("{}", to_string_pretty(&profile)?);
        }
        Commands::Issue { seed, auto_reset } => {
            let config = load_config(&path)?;
            let screen = mount(&config, seed).await?;
            println!("{}", screen.copy().title);
            screen.press_primary().await?;
            println!("{}", screen.copy().title);

            let settled = screen.session().settled().await?;
            let copy = issuance_copy(settled.state);
            println!(
                "{}: {} (risk score {})",
                copy.eyebrow,
                copy.title,
                settled
                    .context
                    .risk_score
                    .map(|score| score.to_string())
                    .unwrap_or_else(|| "n/a".to_string())
            );

            if auto_reset {
                screen.session().send(IssuanceEvent::Reset).await?;
                println!("reset: {}", screen.issuance_state());
            } else {
                println!("next: {}", screen.primary_action().label);
            }
            screen.unmount().await;
        }
        Commands::Lock => {
            let config = load_config(&path)?;
            let screen = mount(&config, None).await?;
            match screen.lock_card().await? {
                LockOutcome::Locked { channel_id } => {
                    println!("Card locked. Remote lock engaged via {channel_id}");
                }
                LockOutcome::NotLocked(status) => {
                    warn!("lock round trip reported {status}");
                    println!("Card not locked (channel reported {status}).");
                }
                LockOutcome::Busy => println!("A lock is already in progress."),
            }
            screen.unmount().await;
        }
        Commands::Limit { amount } => {
            let config = load_config(&path)?;
            let screen = mount(&config, None).await?;
            screen
                .set_spending_limit(amount)
                .await
                .with_context(|| format!("failed to set spending limit for {}", screen.profile().card_id))?;
            println!(
                "Spending limit for {} set to {amount} {}.",
                screen.profile().card_id,
                screen.profile().currency.code()
            );
            screen.unmount().await;
        }
        Commands::Channel => {
            let config = load_config(&path)?;
            let resolved = controls(&config).await?;
            let kind = match resolved.kind {
                ControlsKind::Secure => "secure channel",
                ControlsKind::Fallback => "in-process fallback",
            };
            println!("{} ({kind})", resolved.controls.secure_channel_id());
        }
        Commands::Validate { file, schema } => {
            if schema {
                let schema = schema_for!(CardsenseConfig);
                println!("{}", to_string_pretty(&schema)?);
                return Ok(());
            }

            let file = file.unwrap_or(path);
            let cfg = CardsenseConfig::load(&file)
                .with_context(|| format!("failed to load configuration from {}", file.display()))?;
            println!(
                "Configuration valid (risk scores {}..={}, approval below {}).",
                cfg.risk.min_score, cfg.risk.max_score, cfg.risk.approval_threshold
            );
        }
    }

    Ok(())
}

async fn controls(config: &CardsenseConfig) -> Result<ResolvedControls> {
    let resolved = resolve_card_controls(config)
        .await
        .context("failed to resolve card controls")?;
    if resolved.kind == ControlsKind::Fallback {
        info!("card-controls helper unavailable; using in-process fallback");
    }
    Ok(resolved)
}

async fn mount(config: &CardsenseConfig, seed: Option<u64>) -> Result<OnboardingScreen> {
    let provider = provider_from_config(config)?;
    let resolved = controls(config).await?;
    let options = ScreenOptions {
        risk: RiskPolicy::from_config(config),
        mutation_delay: config.mutation_delay(),
        rng_seed: seed,
        app_state: None,
    };
    OnboardingScreen::mount(provider.as_ref(), resolved.controls, options)
        .await
        .context("card profile unavailable; retry shortly")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_accepts_seed_and_auto_reset() {
        let cli = Cli::try_parse_from(["cardsense", "issue", "--seed", "7", "--auto-reset"]).unwrap();
        match cli.command {
            Commands::Issue { seed, auto_reset } => {
                assert_eq!(seed, Some(7));
                assert!(auto_reset);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn issue_defaults_leave_result_on_screen() {
        let cli = Cli::try_parse_from(["cardsense", "issue"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Issue {
                seed: None,
                auto_reset: false
            }
        ));
    }
}
