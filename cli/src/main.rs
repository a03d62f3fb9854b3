// contactlink: drive proximity contact scenarios from the command line
//
// Runs the link manager against in-process simulated peers and manages the
// persisted link configuration.

mod config;
mod scenario;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use contactlink_core::store::FIRST_SHARE_KEY;
use contactlink_core::{LinkNotification, PreferenceStore, SledPreferences};
use scenario::Scenario;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "contactlink")]
#[command(about = "ContactLink: proximity contact sharing simulator", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted contact against a simulated peer
    Simulate {
        #[arg(value_enum)]
        scenario: Scenario,
        /// Print the final link snapshot as JSON
        #[arg(long)]
        json: bool,
        /// Persist preferences in the data directory
        #[arg(long)]
        persist: bool,
    },
    /// List available scenarios
    Scenarios,
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show persisted state
    Status,
    /// Run every scenario and check the notifications
    Test,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the full config file
    Show,
    /// Restore defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = config::Config::load()
        .map(|c| c.log_level)
        .unwrap_or_else(|_| "warn".to_string());
    contactlink_core::init_tracing(&level);

    match cli.command {
        Commands::Simulate {
            scenario,
            json,
            persist,
        } => cmd_simulate(scenario, json, persist).await,
        Commands::Scenarios => cmd_scenarios(),
        Commands::Config { action } => cmd_config(action),
        Commands::Status => cmd_status(),
        Commands::Test => cmd_test().await,
    }
}

fn describe(notification: &LinkNotification) -> ColoredString {
    match notification {
        LinkNotification::InRange => "in range".cyan(),
        LinkNotification::ConfirmationRequested => "confirmation requested".yellow(),
        LinkNotification::SendComplete => "send complete".green(),
        LinkNotification::Debounce(hint) => format!("debounce ({:?})", hint).yellow(),
        LinkNotification::ResumeSend => "resuming send".cyan(),
        LinkNotification::ProtocolUnsupported => "protocol unsupported".red(),
        LinkNotification::ReceiveComplete { play_feedback } => {
            format!("receive complete (feedback: {})", play_feedback).green()
        }
        LinkNotification::OutOfRange => "out of range".dimmed(),
    }
}

fn open_preferences(config: &config::Config) -> Result<Arc<SledPreferences>> {
    let path = config.preferences_path()?;
    let path = path
        .to_str()
        .context("Preference path is not valid UTF-8")?
        .to_string();
    let preferences = SledPreferences::open(&path).context("Failed to open preferences")?;
    Ok(Arc::new(preferences))
}

async fn cmd_simulate(scenario: Scenario, json: bool, persist: bool) -> Result<()> {
    let config = config::Config::load()?;
    let preferences: Option<Arc<dyn PreferenceStore>> = if persist {
        Some(open_preferences(&config)?)
    } else {
        None
    };

    println!(
        "{} {}",
        "Simulating".bold(),
        scenario.name().bright_cyan()
    );
    println!("  {}", scenario.description().dimmed());
    println!();

    let run = scenario::run(
        scenario,
        &config.link,
        &config.foreground_app,
        preferences,
        |notification| println!("  {} {}", "→".bright_blue(), describe(notification)),
    )
    .await?;

    println!();
    println!("Final state:    {} / {}", run.snapshot.link_state, run.snapshot.send_state);
    println!("Delivered:      {}", run.delivered);
    println!("Handoffs:       {}", run.handoffs);
    println!("Sends complete: {}", run.snapshot.stats.sends_completed);

    if json {
        println!();
        println!("{}", run.snapshot.to_json()?);
    }

    Ok(())
}

fn cmd_scenarios() -> Result<()> {
    println!("{}", "Scenarios".bold());
    println!();
    for scenario in Scenario::all() {
        println!(
            "  {:<18} {}",
            scenario.name().bright_cyan(),
            scenario.description()
        );
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load()?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<30} {}", key.bright_cyan(), value);
            }
        }

        ConfigAction::Show => {
            println!("{}", config::Config::config_file()?.display().to_string().dimmed());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        ConfigAction::Reset => {
            config::Config::default().save()?;
            println!("{} Configuration reset to defaults", "✓".green());
        }
    }

    Ok(())
}

fn cmd_status() -> Result<()> {
    let config = config::Config::load()?;
    let preferences = open_preferences(&config)?;
    let first_share = preferences
        .get_bool(FIRST_SHARE_KEY)
        .context("Failed to read preferences")?
        .unwrap_or(false);

    println!("{}", "ContactLink Status".bold());
    println!();
    println!("Config:      {}", config::Config::config_file()?.display());
    println!("Preferences: {}", config.preferences_path()?.display());
    println!("Foreground:  {}", config.foreground_app);
    println!(
        "First share: {}",
        if first_share {
            "done".green()
        } else {
            "pending".yellow()
        }
    );

    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("{}", "Running scenario checks...".bold());
    println!();

    let config = config::Config::default();
    let mut failures = 0;

    for scenario in Scenario::all() {
        let run = scenario::run(*scenario, &config.link, &config.foreground_app, None, |_| {})
            .await?;
        if run.matches(*scenario) {
            println!("{} {}", "✓".green(), scenario.name());
        } else {
            failures += 1;
            println!("{} {}", "✗".red(), scenario.name());
            println!("    expected: {:?}", scenario.expected());
            println!("    observed: {:?}", run.notifications);
            println!(
                "    send state: expected {}, observed {}",
                scenario.expected_send_state(),
                run.snapshot.send_state
            );
        }
    }

    println!();
    if failures > 0 {
        anyhow::bail!("{} scenario(s) failed", failures);
    }
    println!("{}", "All scenarios passed!".green().bold());
    Ok(())
}
