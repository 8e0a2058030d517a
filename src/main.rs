//! Atelier CLI
//!
//! Command-line interface for the Atelier site editor.

use anyhow::Context;
use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;

use atelier::cli::{commands, BackupAction, Cli, Commands, TokenAction};
use atelier::EditorConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("Atelier v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        EditorConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    cli.apply_overrides(&mut config);
    config.validate().context("invalid configuration")?;

    match cli.command {
        Some(cmd) => handle_command(&config, cmd).await.map_err(|e| {
            let context = match e.recovery_suggestion() {
                Some(hint) => format!("{}: {}", e.error_code(), hint),
                None => e.error_code().to_string(),
            };
            anyhow::Error::new(e).context(context)
        }),
        None => {
            println!("Atelier v{}", env!("CARGO_PKG_VERSION"));
            println!("Use --help for available commands");
            Ok(())
        }
    }
}

async fn handle_command(config: &EditorConfig, cmd: Commands) -> atelier::Result<()> {
    match cmd {
        Commands::Validate => commands::validate(config).await,
        Commands::Fetch { page, out } => commands::fetch(config, &page, out.as_deref()).await,
        Commands::Versions { page, limit } => commands::versions(config, &page, limit).await,
        Commands::ShowVersion { page, id } => commands::show_version(config, &page, &id).await,
        Commands::Restore { page, id, yes } => commands::restore(config, &page, &id, yes).await,
        Commands::Backup { action } => match action {
            BackupAction::Status => commands::backup_status(config),
            BackupAction::Clear => commands::backup_clear(config),
        },
        Commands::Sync { document, yes } => commands::sync(config, &document, yes).await,
        Commands::Token { action } => match action {
            TokenAction::Set { token } => commands::token_set(config, &token),
            TokenAction::Clear => commands::token_clear(config),
            TokenAction::Status => commands::token_status(config),
        },
    }
}
