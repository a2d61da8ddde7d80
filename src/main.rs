//! CLI entry point for the cookievault tool.

use std::fs;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cookievault::{
    BackoffPolicy, Connectivity, CookieCipher, CookieVault, DeviceFingerprint, EncryptedPayload,
    ErrorManager, FileStore, KeyValueStore, MemoryCookieStore, MemoryStore, ResilientFetch,
    SessionConfig, SessionManager, TokenStore,
    cookie::{parse_netscape_cookies, resolve_master_key, serialize_netscape_cookies},
};
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (warn)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let session = build_session(&args)?;
    if session.resume().await? {
        debug!("resumed persisted session");
    }

    match args.command {
        Command::Register { email, password } => {
            if session.register(&email, &password).await? {
                println!("Registered and logged in as {email}");
            } else {
                bail!("registration rejected by server");
            }
        }

        Command::Login { email, password } => {
            if session.login(&email, &password).await? {
                println!("Logged in as {email}");
            } else {
                bail!("login rejected: check email and password");
            }
        }

        Command::Logout => {
            session.logout().await;
            println!("Logged out");
        }

        Command::Status => {
            print_status(&session).await?;
        }

        Command::Export {
            domain,
            cookies,
            out,
        } => {
            export_command(&session, &domain, &cookies, &out).await?;
        }

        Command::Import { payload, out } => {
            import_command(&session, &payload, &out).await?;
        }
    }

    Ok(())
}

fn build_session(args: &Args) -> Result<SessionManager> {
    let base = url::Url::parse(&args.api_url)
        .with_context(|| format!("invalid API base URL: {}", args.api_url))?;
    if !matches!(base.scheme(), "http" | "https") {
        bail!("API base URL must be http(s), got {}", base.scheme());
    }

    let fetch = ResilientFetch::new(BackoffPolicy::default(), Connectivity::shared());
    let store: Arc<dyn KeyValueStore> = if args.ephemeral {
        MemoryStore::shared()
    } else {
        Arc::new(FileStore::at_default_location()?)
    };
    let fingerprint = DeviceFingerprint::detect();
    debug!(device_id = %fingerprint.device_id(), "device fingerprint");
    Ok(SessionManager::new(
        SessionConfig::new(&args.api_url),
        fetch,
        TokenStore::new(store),
        fingerprint,
    ))
}

fn build_vault(session: SessionManager, cookies: Arc<MemoryCookieStore>) -> Result<CookieVault> {
    let master_key = resolve_master_key()?;
    Ok(CookieVault::new(
        CookieCipher::new(master_key),
        session,
        cookies,
        Arc::new(ErrorManager::default()),
    ))
}

async fn print_status(session: &SessionManager) -> Result<()> {
    match session.current_session().await? {
        Some(current) => {
            let state = if session.is_authenticated().await {
                "authenticated"
            } else {
                "expired"
            };
            println!("Session: {state}");
            println!("User:    {} <{}>", current.user.name, current.user.email);
            if let Some(device_id) = &current.device_id {
                println!("Device:  {device_id}");
            }
        }
        None => println!("Session: none (run `cookievault login`)"),
    }
    Ok(())
}

async fn export_command(
    session: &SessionManager,
    domain: &str,
    cookies_path: &Path,
    out: &Path,
) -> Result<()> {
    let file = fs::File::open(cookies_path)
        .with_context(|| format!("cannot open cookie file {}", cookies_path.display()))?;
    let parsed = parse_netscape_cookies(BufReader::new(file))?;
    for (line, reason) in &parsed.warnings {
        warn!(line, reason = %reason, "skipped malformed cookie line");
    }

    let staged = MemoryCookieStore::with_cookies(parsed.cookies);
    let vault = build_vault(session.clone(), staged)?;
    let outcome = vault.export_cookies(domain).await?;

    fs::write(out, serde_json::to_vec_pretty(&outcome.payload)?)
        .with_context(|| format!("cannot write payload to {}", out.display()))?;

    info!(total = outcome.total, valid = outcome.valid, "export complete");
    println!(
        "Exported {} of {} cookies for {domain} to {}",
        outcome.valid,
        outcome.total,
        out.display()
    );
    Ok(())
}

async fn import_command(session: &SessionManager, payload_path: &Path, out: &Path) -> Result<()> {
    let raw = fs::read(payload_path)
        .with_context(|| format!("cannot read payload {}", payload_path.display()))?;
    let payload: EncryptedPayload =
        serde_json::from_slice(&raw).context("payload file is not a valid encrypted payload")?;

    let staged = Arc::new(MemoryCookieStore::new());
    let vault = build_vault(session.clone(), staged.clone())?;
    let outcome = vault.import_cookies(&payload).await?;

    fs::write(out, serialize_netscape_cookies(&staged.snapshot()))
        .with_context(|| format!("cannot write cookies to {}", out.display()))?;

    info!(
        total = outcome.total,
        imported = outcome.imported,
        "import complete"
    );
    println!(
        "Imported {} of {} cookies to {}",
        outcome.imported,
        outcome.total,
        out.display()
    );
    Ok(())
}
