//! Lockbox CLI - Command line interface for an encrypted vault.
//!
//! Every command that touches content prompts for the password first; the
//! vault never stays unlocked between invocations.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use zeroize::Zeroizing;

use lockbox_catalog::{CatalogEntry, EntryId, EntryKind};
use lockbox_common::Secret;
use lockbox_crypto::generate_recovery_code;
use lockbox_vault::{PasswordGenerator, PasswordPolicy, Vault, VaultConfig, VaultWorker};

#[derive(Parser)]
#[command(name = "lockbox")]
#[command(about = "Lockbox - Password-protected encrypted vault")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Vault root directory.
    #[arg(long, env = "LOCKBOX_VAULT", global = true, default_value = ".lockbox")]
    vault: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up a new vault.
    Init {
        /// Password policy: "simple", "recommended" or "strong".
        #[arg(long, default_value = "recommended")]
        policy: PasswordPolicy,

        /// Do not generate a recovery code.
        #[arg(long)]
        no_recovery: bool,
    },

    /// Encrypt a file into the vault.
    Import {
        /// Kind of file: photo, video or document.
        #[arg(short, long, default_value = "document")]
        kind: EntryKind,

        /// Source file.
        file: PathBuf,
    },

    /// Decrypt a file out of the vault.
    Export {
        /// Entry id as shown by `list` (e.g. f3).
        id: EntryId,

        /// Destination file path.
        dest: PathBuf,
    },

    /// List vault entries.
    List {
        /// Only show this kind.
        #[arg(short, long)]
        kind: Option<EntryKind>,

        /// Show the trash instead.
        #[arg(long)]
        trash: bool,
    },

    /// Move an entry to the trash.
    Trash { id: EntryId },

    /// Restore an entry from the trash.
    Restore { id: EntryId },

    /// Delete an entry permanently.
    Purge { id: EntryId },

    /// Permanently delete everything in the trash.
    EmptyTrash,

    /// Encrypted notes.
    Note {
        #[command(subcommand)]
        action: NoteAction,
    },

    /// Encrypted credential entries.
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Change the vault password.
    Passwd {
        #[arg(long, default_value = "recommended")]
        policy: PasswordPolicy,
    },

    /// Reset a forgotten password with the recovery code.
    Recover {
        #[arg(long, default_value = "recommended")]
        policy: PasswordPolicy,
    },

    /// Show or set the auto-lock timeout.
    Timeout {
        /// New timeout in milliseconds (0 locks on any backgrounding).
        ms: Option<u64>,
    },

    /// Generate a random password.
    GeneratePassword {
        #[arg(short, long, default_value_t = 16)]
        length: usize,

        #[arg(long)]
        no_upper: bool,

        #[arg(long)]
        no_digits: bool,

        #[arg(long)]
        no_symbols: bool,
    },

    /// Show vault status.
    Status {
        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Erase all vault data.
    Erase {
        /// Confirm the erase.
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum NoteAction {
    /// Add a note; the body is read from stdin unless given.
    Add {
        title: String,
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Show a note.
    Show { id: EntryId },
    /// Replace a note's title and body.
    Edit {
        id: EntryId,
        title: String,
        #[arg(short, long)]
        body: Option<String>,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Add a credential; the password is prompted for.
    Add { app: String, username: String },
    /// Show a credential.
    Show {
        id: EntryId,
        /// Print the password instead of masking it.
        #[arg(long)]
        reveal: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    if let Commands::GeneratePassword {
        length,
        no_upper,
        no_digits,
        no_symbols,
    } = cli.command
    {
        return cmd_generate_password(length, !no_upper, !no_digits, !no_symbols);
    }

    let worker = open_vault(&cli.vault)?;

    match cli.command {
        Commands::Init {
            policy,
            no_recovery,
        } => cmd_init(&worker, policy, no_recovery).await,

        Commands::Import { kind, file } => cmd_import(&worker, kind, file).await,

        Commands::Export { id, dest } => cmd_export(&worker, id, dest).await,

        Commands::List { kind, trash } => cmd_list(&worker, kind, trash).await,

        Commands::Trash { id } => cmd_trash(&worker, id).await,

        Commands::Restore { id } => cmd_restore(&worker, id).await,

        Commands::Purge { id } => cmd_purge(&worker, id).await,

        Commands::EmptyTrash => cmd_empty_trash(&worker).await,

        Commands::Note { action } => cmd_note(&worker, action).await,

        Commands::Credential { action } => cmd_credential(&worker, action).await,

        Commands::Passwd { policy } => cmd_passwd(&worker, policy).await,

        Commands::Recover { policy } => cmd_recover(&worker, policy).await,

        Commands::Timeout { ms } => cmd_timeout(&worker, ms).await,

        Commands::Status { json } => cmd_status(&worker, json),

        Commands::Erase { yes } => cmd_erase(&worker, yes).await,

        Commands::GeneratePassword { .. } => Ok(()),
    }
}

/// Install the log subscriber. `LOCKBOX_LOG` overrides `--verbose`.
fn init_logging(verbose: bool) -> Result<()> {
    let builder = FmtSubscriber::builder()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    match EnvFilter::try_from_env("LOCKBOX_LOG") {
        Ok(filter) => {
            tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish())?
        }
        Err(_) => {
            let level = if verbose { Level::DEBUG } else { Level::INFO };
            tracing::subscriber::set_global_default(builder.with_max_level(level).finish())?
        }
    }
    Ok(())
}

fn open_vault(root: &Path) -> Result<VaultWorker> {
    let vault = Vault::open(VaultConfig::new(root))
        .with_context(|| format!("Failed to open vault at {}", root.display()))?;
    Ok(VaultWorker::new(Arc::new(vault)))
}

/// Prompt for a secret without echo.
fn prompt_secret(prompt: &str) -> Result<Secret> {
    let input = Zeroizing::new(rpassword::prompt_password(prompt).context("Failed to read input")?);
    Ok(Secret::from(input.as_str()))
}

/// Prompt twice for a new password and check it against `policy`.
fn prompt_new_password(policy: PasswordPolicy) -> Result<Secret> {
    let password = prompt_secret("New password: ")?;
    let confirm = prompt_secret("Confirm password: ")?;

    if password.as_bytes() != confirm.as_bytes() {
        bail!("Passwords do not match");
    }

    let text = password
        .as_str()
        .context("Password must be valid UTF-8")?;
    policy.validate(text)?;
    Ok(password)
}

/// Prompt for the password and unlock, counting failures.
async fn unlock(worker: &VaultWorker) -> Result<()> {
    let vault = worker.vault();
    if !vault.is_setup_done()? {
        bail!("Vault is not set up; run `lockbox init` first");
    }

    let password = prompt_secret("Password: ")?;
    match worker.unlock(password).await {
        Ok(()) => {
            vault.reset_failed_attempts()?;
            Ok(())
        }
        Err(e) if e.is_authentication_failure() => {
            let attempts = vault.record_failed_attempt()?;
            bail!("Wrong password ({} failed attempts)", attempts)
        }
        Err(e) => Err(e).context("Failed to unlock vault"),
    }
}

fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn print_entry(vault: &Vault, entry: &CatalogEntry) -> Result<()> {
    let name = vault.display_name(entry)?.unwrap_or_else(|| "(unnamed)".to_string());
    println!(
        "  {:<6} {:<10} {}  {}",
        entry.id.to_string(),
        entry.kind.as_str(),
        format_timestamp(entry.timestamp),
        name
    );
    Ok(())
}

fn read_body(body: Option<String>) -> Result<String> {
    match body {
        Some(body) => Ok(body),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read note body from stdin")?;
            Ok(buf)
        }
    }
}

/// Set up a new vault.
async fn cmd_init(worker: &VaultWorker, policy: PasswordPolicy, no_recovery: bool) -> Result<()> {
    let vault = worker.vault();
    if vault.is_setup_done()? {
        bail!("Vault is already set up at {}", vault.config().root.display());
    }

    info!("Setting up vault at {}", vault.config().root.display());
    let password = prompt_new_password(policy)?;
    worker
        .setup_vault(password)
        .await
        .context("Failed to set up vault")?;

    println!("Vault created at {}", vault.config().root.display());

    if !no_recovery {
        let code = generate_recovery_code();
        let text = code.as_str().context("Recovery code is not text")?;
        vault
            .enable_recovery(text)
            .context("Failed to enable recovery")?;

        println!();
        println!("Recovery code (shown once, store it offline):");
        println!("  {}", text);
    }

    vault.lock();
    Ok(())
}

/// Encrypt a file into the vault.
async fn cmd_import(worker: &VaultWorker, kind: EntryKind, file: PathBuf) -> Result<()> {
    unlock(worker).await?;
    info!("Importing {} as {}", file.display(), kind);

    let entry = worker
        .import_file_path(kind, file.clone())
        .await
        .with_context(|| format!("Failed to import {}", file.display()))?;

    println!("Imported {} as {}", file.display(), entry.id);
    Ok(())
}

/// Decrypt a file out of the vault.
async fn cmd_export(worker: &VaultWorker, id: EntryId, dest: PathBuf) -> Result<()> {
    unlock(worker).await?;

    let written = worker
        .export_file(id, dest.clone())
        .await
        .with_context(|| format!("Failed to export {}", id))?;

    println!("Exported {} to {} ({} bytes)", id, dest.display(), written);
    Ok(())
}

/// List entries.
async fn cmd_list(worker: &VaultWorker, kind: Option<EntryKind>, trash: bool) -> Result<()> {
    unlock(worker).await?;
    let vault = worker.vault();

    let entries = if trash {
        vault
            .list_trash()?
            .into_iter()
            .filter(|e| kind.map_or(true, |k| e.kind == k))
            .collect()
    } else {
        let kinds: Vec<EntryKind> = match kind {
            Some(kind) => vec![kind],
            None => EntryKind::ALL.to_vec(),
        };
        let mut entries = Vec::new();
        for kind in kinds {
            entries.extend(vault.list_active(kind)?);
        }
        entries
    };

    if entries.is_empty() {
        println!("{}", if trash { "Trash is empty." } else { "Vault is empty." });
    } else {
        for entry in &entries {
            print_entry(vault, entry)?;
        }
    }
    Ok(())
}

async fn cmd_trash(worker: &VaultWorker, id: EntryId) -> Result<()> {
    unlock(worker).await?;
    worker.vault().move_to_trash(id)?;
    println!("Moved {} to trash", id);
    Ok(())
}

async fn cmd_restore(worker: &VaultWorker, id: EntryId) -> Result<()> {
    unlock(worker).await?;
    worker.vault().restore(id)?;
    println!("Restored {}", id);
    Ok(())
}

async fn cmd_purge(worker: &VaultWorker, id: EntryId) -> Result<()> {
    unlock(worker).await?;
    worker.vault().delete_permanently(id)?;
    println!("Deleted {} permanently", id);
    Ok(())
}

async fn cmd_empty_trash(worker: &VaultWorker) -> Result<()> {
    unlock(worker).await?;
    let removed = worker.vault().empty_trash()?;
    println!("Deleted {} entries permanently", removed);
    Ok(())
}

async fn cmd_note(worker: &VaultWorker, action: NoteAction) -> Result<()> {
    unlock(worker).await?;
    let vault = worker.vault();

    match action {
        NoteAction::Add { title, body } => {
            let body = read_body(body)?;
            let entry = vault.add_note(&title, &body)?;
            println!("Added note {}", entry.id);
        }
        NoteAction::Show { id } => {
            let note = vault.read_note(id)?;
            println!("{}", note.title);
            println!();
            println!("{}", note.body);
        }
        NoteAction::Edit { id, title, body } => {
            let body = read_body(body)?;
            vault.update_note(id, &title, &body)?;
            println!("Updated note {}", id);
        }
    }
    Ok(())
}

async fn cmd_credential(worker: &VaultWorker, action: CredentialAction) -> Result<()> {
    unlock(worker).await?;
    let vault = worker.vault();

    match action {
        CredentialAction::Add { app, username } => {
            let secret = prompt_secret(&format!("Password for {}: ", app))?;
            let password = secret
                .as_str()
                .context("Password must be valid UTF-8")?;
            let entry = vault.add_credential(&app, &username, password)?;
            println!("Added credential {}", entry.id);
        }
        CredentialAction::Show { id, reveal } => {
            let credential = vault.read_credential(id)?;
            println!("App:      {}", credential.app);
            println!("Username: {}", credential.username);
            if reveal {
                println!("Password: {}", credential.password);
            } else {
                println!("Password: {}", "*".repeat(8));
            }
        }
    }
    Ok(())
}

/// Change the vault password.
async fn cmd_passwd(worker: &VaultWorker, policy: PasswordPolicy) -> Result<()> {
    unlock(worker).await?;
    let password = prompt_new_password(policy)?;

    worker
        .change_secret(password)
        .await
        .context("Failed to change password")?;

    println!("Password changed.");
    Ok(())
}

/// Reset the password with the recovery code.
async fn cmd_recover(worker: &VaultWorker, policy: PasswordPolicy) -> Result<()> {
    let vault = worker.vault();
    if !vault.recovery_enabled()? {
        bail!("Recovery is not enabled for this vault");
    }

    let code = prompt_secret("Recovery code: ")?;
    let password = prompt_new_password(policy)?;

    match worker.reset_secret_with_recovery(code, password).await {
        Ok(()) => {
            println!("Password reset.");
            Ok(())
        }
        Err(e) if e.is_authentication_failure() => {
            let attempts = vault.record_failed_attempt()?;
            bail!("Wrong recovery code ({} failed attempts)", attempts)
        }
        Err(e) => Err(e).context("Failed to reset password"),
    }
}

/// Show or set the auto-lock timeout.
async fn cmd_timeout(worker: &VaultWorker, ms: Option<u64>) -> Result<()> {
    let vault = worker.vault();
    match ms {
        None => println!("Auto-lock timeout: {} ms", vault.lock_timeout_ms()?),
        Some(ms) => {
            unlock(worker).await?;
            vault.set_lock_timeout_ms(ms)?;
            println!("Auto-lock timeout set to {} ms", ms);
        }
    }
    Ok(())
}

fn cmd_generate_password(length: usize, upper: bool, digits: bool, symbols: bool) -> Result<()> {
    let generator = PasswordGenerator {
        upper,
        digits,
        symbols,
        length,
    };
    let password = generator.generate()?;
    println!("{}", password.as_str().context("Generated password is not text")?);
    Ok(())
}

fn cmd_status(worker: &VaultWorker, json: bool) -> Result<()> {
    let vault = worker.vault();
    let setup_done = vault.is_setup_done()?;
    let recovery = vault.recovery_enabled()?;
    let timeout = vault.lock_timeout_ms()?;
    let failed = vault.failed_attempts()?;

    if json {
        let status = serde_json::json!({
            "root": vault.config().root,
            "setup_done": setup_done,
            "recovery_enabled": recovery,
            "lock_timeout_ms": timeout,
            "failed_attempts": failed,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("Vault: {}", vault.config().root.display());
        println!("  Set up:           {}", setup_done);
        println!("  Recovery enabled: {}", recovery);
        println!("  Auto-lock:        {} ms", timeout);
        println!("  Failed attempts:  {}", failed);
    }
    Ok(())
}

/// Erase everything in the vault.
async fn cmd_erase(worker: &VaultWorker, yes: bool) -> Result<()> {
    if !yes {
        bail!("This deletes all vault data; pass --yes to confirm");
    }
    unlock(worker).await?;
    worker.vault().erase_all().context("Failed to erase vault")?;
    println!("All vault data erased.");
    Ok(())
}
