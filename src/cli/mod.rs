//! CLI Module
//!
//! Command-line interface for inspecting and syncing an Atelier site.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::EditorConfig;

/// Atelier - visual site editing with versioned persistence
#[derive(Parser, Debug)]
#[command(name = "atelier")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (JSON)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Repository owner
    #[arg(long, global = true)]
    pub owner: Option<String>,

    /// Repository name
    #[arg(long, global = true)]
    pub repo: Option<String>,

    /// Editing branch
    #[arg(long, global = true)]
    pub branch: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&self, config: &mut EditorConfig) {
        if let Some(owner) = &self.owner {
            config.owner = owner.clone();
        }
        if let Some(repo) = &self.repo {
            config.repo = repo.clone();
        }
        if let Some(branch) = &self.branch {
            config.branch = branch.clone();
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the access token can reach the repository
    #[command(name = "validate")]
    Validate,

    /// Print a page as the editor would load it
    #[command(name = "fetch")]
    Fetch {
        /// Page path, e.g. index.html
        page: String,

        /// Write the content to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List recent versions of a page
    #[command(name = "versions")]
    Versions {
        /// Page path
        page: String,

        /// Number of versions to list
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print a page as of a version
    #[command(name = "show-version")]
    ShowVersion {
        /// Page path
        page: String,

        /// Commit id (full or at least 7 characters)
        id: String,
    },

    /// Restore a page to a version with a new commit
    #[command(name = "restore")]
    Restore {
        /// Page path
        page: String,

        /// Commit id
        id: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect or clear the local backup
    #[command(name = "backup")]
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },

    /// Restore the local backup and push it using a local copy of the site
    #[command(name = "sync")]
    Sync {
        /// Directory holding the edited pages
        #[arg(short, long)]
        document: PathBuf,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage the stored access token
    #[command(name = "token")]
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupAction {
    /// Show what the local backup holds
    Status,
    /// Delete the local backup
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum TokenAction {
    /// Store a personal access token
    Set {
        /// Token (ghp_... or github_pat_...)
        token: String,
    },
    /// Remove the stored token
    Clear,
    /// Show whether a token is stored and when it expires
    Status,
}
