//! Daily run example
//!
//! Runs one acquisition the way a scheduler would invoke it:
//! - Loading configuration from an optional JSON file, `.env` and the environment
//! - Subscribing to run events
//! - Running until done or until SIGTERM/SIGINT
//! - Printing the machine-readable result and exiting non-zero on failure
//!
//! ```bash
//! RUST_LOG=edition_dl=debug cargo run --example daily_run -- [config.json] [YYYY-MM-DD]
//! ```

use edition_dl::{Config, Event, Orchestrator, run_until_signal};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("edition_dl=info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(std::path::PathBuf::from);
    let target = args
        .next()
        .map(|raw| chrono::NaiveDate::parse_from_str(&raw, "%Y-%m-%d"))
        .transpose()?;

    let config = Config::load(config_path.as_deref(), Some(std::path::Path::new(".env")))?;
    let orchestrator = Orchestrator::from_config(config).await?;

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::StateChanged { to, .. } => println!("→ {to:?}"),
                Event::EditionLocated { reference } => {
                    println!("✓ Found edition at {}", reference.source_url)
                }
                Event::Archived { entry } => {
                    println!("✓ Archived {} on {}", entry.storage_key, entry.provider)
                }
                Event::PurgeCompleted { report } => {
                    println!("✓ Purged {} expired editions", report.removed)
                }
                _ => {}
            }
        }
    });

    let result = run_until_signal(&orchestrator, target).await;
    println!("{}", serde_json::to_string_pretty(&result)?);

    for entry in orchestrator.recent_editions().await.unwrap_or_default() {
        println!("  {} {}", entry.date, entry.public_url);
    }

    if !result.acquired() {
        std::process::exit(1);
    }
    Ok(())
}
