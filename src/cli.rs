//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Session-gated browser cookie vault.
///
/// Cookievault exports browser cookies as validated, encrypted payloads and
/// imports them back, behind a token session with automatic refresh.
#[derive(Parser, Debug)]
#[command(name = "cookievault")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Auth API base URL
    #[arg(
        long,
        env = "COOKIEVAULT_API_URL",
        default_value = "http://localhost:3000",
        global = true
    )]
    pub api_url: String,

    /// Keep session state in memory only instead of the session file
    #[arg(long, global = true)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Vault operations.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create an account and open a session
    Register {
        /// Account email
        #[arg(long)]
        email: String,
        /// Account password
        #[arg(long, env = "COOKIEVAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Log in with email/password credentials
    Login {
        /// Account email
        #[arg(long)]
        email: String,
        /// Account password
        #[arg(long, env = "COOKIEVAULT_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Invalidate the server session and clear local state
    Logout,

    /// Show session and device status
    Status,

    /// Encrypt a domain's cookies from a Netscape cookies.txt file
    Export {
        /// Domain whose cookies to export (includes subdomains)
        #[arg(long)]
        domain: String,
        /// Netscape cookies.txt file to read
        #[arg(long)]
        cookies: PathBuf,
        /// Where to write the encrypted payload (JSON)
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Decrypt a payload and write the cookies as a Netscape file
    Import {
        /// Encrypted payload file (JSON)
        #[arg(long)]
        payload: PathBuf,
        /// Where to write the imported cookies.txt
        #[arg(short, long)]
        out: PathBuf,
    },
}
