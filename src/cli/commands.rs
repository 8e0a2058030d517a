//! CLI Command Implementations
//!
//! Implements the actual logic for each CLI command.

use std::env;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};

use crate::config::EditorConfig;
use crate::error::{EditorError, Result};
use crate::remote::{ContentBackend, GitHubBackend};
use crate::session::EditorSession;
use crate::state::{lock, FileStore, KeyValueStore, LocalBackup, RestoreOutcome, TokenStore};
use crate::sync::{DocumentSource, DrainOutcome, FileDocument, SaveOutcome, SharedDocument};

/// Environment variable that supplies a token without storing it.
const TOKEN_ENV: &str = "ATELIER_TOKEN";

fn token_store(config: &EditorConfig) -> TokenStore {
    TokenStore::new(
        Arc::new(FileStore::new(config.state_dir.join("session"))),
        Arc::new(FileStore::new(config.state_dir.clone())),
        Duration::from_secs(config.token_ttl_secs),
    )
}

fn site_storage(config: &EditorConfig) -> Arc<dyn KeyValueStore> {
    Arc::new(FileStore::new(config.site_state_dir()))
}

fn resolve_token(config: &EditorConfig) -> Result<String> {
    if let Ok(token) = env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }
    token_store(config)
        .load()?
        .ok_or_else(|| EditorError::InvalidConfig {
            reason: format!(
                "no access token; set {} or run `atelier-cli token set`",
                TOKEN_ENV
            ),
        })
}

fn open_session(config: &EditorConfig, document: Arc<dyn DocumentSource>) -> Result<EditorSession> {
    let token = resolve_token(config)?;
    let backend: Arc<dyn ContentBackend> = Arc::new(GitHubBackend::from_config(config, token)?);
    Ok(EditorSession::new(
        config.clone(),
        backend,
        site_storage(config),
        document,
    ))
}

/// Ask a yes/no question on stdin. Anything but `y`/`yes` is a no.
fn ask(prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

/// Check repository access.
pub async fn validate(config: &EditorConfig) -> Result<()> {
    info!("Validating access to {}/{}", config.owner, config.repo);

    let session = open_session(config, Arc::new(SharedDocument::new()))?;
    if session.client().validate_access().await {
        println!("Access OK: {}/{}", config.owner, config.repo);
        Ok(())
    } else {
        Err(EditorError::Forbidden {
            reason: format!("token cannot access {}/{}", config.owner, config.repo),
        })
    }
}

/// Print or write a page.
pub async fn fetch(config: &EditorConfig, page: &str, out: Option<&Path>) -> Result<()> {
    info!("Fetching {}", page);

    let session = open_session(config, Arc::new(SharedDocument::new()))?;
    let content = session.open_page(page).await?;

    match out {
        Some(path) => {
            fs::write(path, &content).map_err(|e| EditorError::StorageWrite {
                path: path.to_path_buf(),
                source: e,
            })?;
            println!("Wrote {} ({} bytes)", path.display(), content.len());
        }
        None => println!("{}", content),
    }

    Ok(())
}

/// List recent versions of a page.
pub async fn versions(config: &EditorConfig, page: &str, limit: Option<usize>) -> Result<()> {
    info!("Listing versions of {}", page);

    let mut config = config.clone();
    if let Some(limit) = limit {
        config.commit_history_limit = limit;
    }
    let session = open_session(&config, Arc::new(SharedDocument::new()))?;
    let commits = session.versions().load(page).await?;

    if commits.is_empty() {
        println!("No versions found.");
        return Ok(());
    }

    println!("Versions of {}:", page);
    println!("{:-<60}", "");
    for commit in &commits {
        let message = commit.message.lines().next().unwrap_or_default();
        println!(
            "{}  {}  {:<12} {}",
            commit.short_id(),
            commit.date.format("%Y-%m-%d %H:%M"),
            commit.author,
            message
        );
    }
    println!("{:-<60}", "");

    Ok(())
}

/// Print a page as of a version.
pub async fn show_version(config: &EditorConfig, page: &str, id: &str) -> Result<()> {
    info!("Showing {} at {}", page, id);

    let session = open_session(config, Arc::new(SharedDocument::new()))?;
    let content = session.versions().preview(page, id).await?;
    println!("{}", content);

    Ok(())
}

/// Restore a page to a version.
pub async fn restore(config: &EditorConfig, page: &str, id: &str, yes: bool) -> Result<()> {
    info!("Restoring {} to {}", page, id);

    let session = open_session(config, Arc::new(SharedDocument::new()))?;
    session.open_page(page).await?;

    let confirm = |prompt: &str| yes || ask(prompt);
    if !yes && !confirm("Restore this version? It becomes a new commit on the editing branch.") {
        println!("Cancelled.");
        return Ok(());
    }

    match session.restore_version(id, &confirm).await? {
        Some(receipt) => println!("Restored {} from {} (commit {})", page, id, receipt.commit_id),
        None => println!("Cancelled."),
    }

    Ok(())
}

/// Show what the local backup holds.
pub fn backup_status(config: &EditorConfig) -> Result<()> {
    let backup = LocalBackup::new(site_storage(config));

    let Some(snapshot) = backup.read()? else {
        println!("No local backup for {}/{}.", config.owner, config.repo);
        return Ok(());
    };

    let when = backup.backup_time()?.unwrap_or_else(|| "unknown".to_string());
    println!("Local backup for {}/{}", config.owner, config.repo);
    println!("{:-<60}", "");
    println!("Written:          {}", when);
    println!("Page:             {}", snapshot.page.as_deref().unwrap_or("-"));
    println!("Pending changes:  {}", snapshot.pending_changes.len());
    println!("Offline queue:    {}", snapshot.offline_queue.len());
    println!("Trash:            {}", snapshot.trash.len());
    println!("Notes:            {}", snapshot.notes.len());
    println!("Tracked elements: {}", snapshot.element_history.len());

    for change in &snapshot.pending_changes {
        println!(
            "  {} {} [{}]: {:?} -> {:?}",
            change.page,
            change.kind,
            change.idx,
            change.orig,
            change.new.as_str()
        );
    }

    Ok(())
}

/// Delete the local backup.
pub fn backup_clear(config: &EditorConfig) -> Result<()> {
    info!("Clearing local backup for {}/{}", config.owner, config.repo);

    LocalBackup::new(site_storage(config)).clear()?;
    println!("Local backup cleared.");

    Ok(())
}

/// Restore the local backup and push it, reading page content from a local
/// copy of the site.
pub async fn sync(config: &EditorConfig, document: &Path, yes: bool) -> Result<()> {
    info!("Syncing local backup using {}", document.display());

    let session = open_session(config, Arc::new(FileDocument::new(document)))?;
    let confirm = |prompt: &str| yes || ask(prompt);

    match session.recover_backup(&confirm)? {
        RestoreOutcome::NoBackup | RestoreOutcome::NothingToRestore => {
            println!("Nothing to sync.");
            return Ok(());
        }
        RestoreOutcome::Declined => {
            println!("Cancelled.");
            return Ok(());
        }
        RestoreOutcome::Restored { pending, queued } => {
            println!("Restored {} pending change(s), {} queued save(s).", pending, queued);
        }
    }

    let page = lock(session.store()).current_page().map(str::to_string);
    if let Some(page) = &page {
        session.open_page(page).await?;
    }

    match session.scheduler().drain_offline_queue().await {
        DrainOutcome::Stopped {
            remaining, error, ..
        } => {
            warn!("Offline queue sync stopped: {}", error);
            println!("{} queued save(s) left; run sync again later.", remaining);
            return Err(error);
        }
        DrainOutcome::Drained { items } => println!("Synced {} queued save(s).", items),
        DrainOutcome::Empty | DrainOutcome::Skipped => {}
    }

    match session.save_now().await? {
        SaveOutcome::Saved { commit_id, changes } => {
            println!("Saved {} change(s) in commit {}.", changes, commit_id)
        }
        SaveOutcome::Nothing => {}
        other => warn!("Save did not complete: {:?}", other),
    }

    Ok(())
}

/// Store a token.
pub fn token_set(config: &EditorConfig, token: &str) -> Result<()> {
    let store = token_store(config);
    if !store.save(token)? {
        return Err(EditorError::InvalidConfig {
            reason: "token must start with ghp_ or github_pat_".to_string(),
        });
    }

    if let Some(expires) = store.expires_at()? {
        println!("Token stored, expires {}", expires.format("%Y-%m-%d %H:%M UTC"));
    }

    Ok(())
}

/// Remove the stored token.
pub fn token_clear(config: &EditorConfig) -> Result<()> {
    token_store(config).clear()?;
    println!("Token removed.");

    Ok(())
}

/// Show token state.
pub fn token_status(config: &EditorConfig) -> Result<()> {
    if env::var(TOKEN_ENV).is_ok() {
        println!("Using token from {}.", TOKEN_ENV);
        return Ok(());
    }

    let store = token_store(config);
    match store.load()? {
        Some(_) => match store.expires_at()? {
            Some(expires) => println!("Token stored, expires {}", expires.format("%Y-%m-%d %H:%M UTC")),
            None => println!("Token stored."),
        },
        None => println!("No token stored."),
    }

    Ok(())
}
