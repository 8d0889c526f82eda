/*!
Sessionvault CLI - inspect and manage an encrypted session payload on disk.

The payload is never modified by `show` or `verify`; only `delete` removes it.
*/

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use sessionvault_core::{
    container, create_local_orchestrator, AesGcmCipher, PayloadCipher, PersistConfig,
    PersistError, Record, StorageAdapter, UnavailableCipher,
};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::{debug, error, info};
use zeroize::Zeroizing;

#[derive(Parser)]
#[command(name = "sessionvault")]
#[command(about = "Inspect and manage encrypted session payloads")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Directory holding the payload
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    /// Payload file name
    #[arg(short, long, global = true, default_value = sessionvault_core::config::DEFAULT_FILE_NAME)]
    file: String,

    /// AES-256 payload key as 64 hex characters
    #[arg(long, global = true, env = "SESSIONVAULT_KEY", hide_env_values = true)]
    key_hex: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decrypt the payload and list its records
    Show {
        /// Print records as JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Check that the payload decrypts and decodes cleanly
    Verify,
    /// Delete the payload
    Delete {
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "Domain")]
    domain: String,
    #[tabled(rename = "Path")]
    path: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Expires")]
    expires: String,
    #[tabled(rename = "Flags")]
    flags: String,
    #[tabled(rename = "Priority")]
    priority: String,
}

impl From<&Record> for RecordRow {
    fn from(record: &Record) -> Self {
        let mut flags = Vec::new();
        if record.flags.secure {
            flags.push("secure");
        }
        if record.flags.http_only {
            flags.push("httponly");
        }
        if record.flags.cross_site_restricted {
            flags.push("samesite");
        }

        Self {
            domain: record.domain.clone(),
            path: record.path.clone(),
            name: record.name.clone(),
            value: truncate_value(&record.value, 32),
            created: format_timestamp(record.creation),
            expires: if record.is_session() {
                "session".to_string()
            } else {
                format_timestamp(record.expiration)
            },
            flags: flags.join(","),
            priority: format!("{:?}", record.priority),
        }
    }
}

/// What `verify` found at the payload location
#[derive(Debug)]
enum PayloadStatus {
    Missing,
    Readable { records: usize, payload_bytes: usize },
    Unreadable(PersistError),
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = PersistConfig::with_base_dir(&cli.dir).with_file_name(cli.file.clone());
    config.validate()?;

    match cli.command {
        Commands::Show { json } => show_payload(&config, cli.key_hex.as_deref(), json)?,
        Commands::Verify => verify_payload(&config, cli.key_hex.as_deref())?,
        Commands::Delete { force } => delete_payload(config, force).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug"))
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_key(key_hex: Option<&str>) -> Result<AesGcmCipher, anyhow::Error> {
    let key_hex = key_hex.ok_or_else(|| {
        anyhow!("a payload key is required (--key-hex or SESSIONVAULT_KEY)")
    })?;
    let key = Zeroizing::new(hex::decode(key_hex.trim()).context("payload key is not valid hex")?);
    Ok(AesGcmCipher::from_slice(&key)?)
}

/// Read and decode the payload without touching it on disk
fn inspect_payload(
    config: &PersistConfig,
    cipher: &impl PayloadCipher,
) -> Result<PayloadStatus, anyhow::Error> {
    let storage = config.local_storage();
    let sealed = match storage.read(&config.file_name)? {
        Some(sealed) => sealed,
        None => return Ok(PayloadStatus::Missing),
    };
    debug!(bytes = sealed.len(), "Read payload");

    let decoded = cipher
        .decrypt(&sealed)
        .and_then(|plaintext| container::decode(&config.magic_token, &plaintext));

    match decoded {
        Ok(records) => Ok(PayloadStatus::Readable {
            records: records.len(),
            payload_bytes: sealed.len(),
        }),
        Err(PersistError::CipherUnavailable) => bail!("no usable cipher for this payload"),
        Err(e) => Ok(PayloadStatus::Unreadable(e)),
    }
}

fn load_records(
    config: &PersistConfig,
    cipher: &impl PayloadCipher,
) -> Result<Option<Vec<Record>>, anyhow::Error> {
    let storage = config.local_storage();
    let Some(sealed) = storage.read(&config.file_name)? else {
        return Ok(None);
    };
    let plaintext = cipher.decrypt(&sealed)?;
    Ok(Some(container::decode(&config.magic_token, &plaintext)?))
}

fn render_records(records: &[Record], json: bool) -> Result<String, anyhow::Error> {
    if json {
        return Ok(serde_json::to_string_pretty(records)?);
    }
    let rows: Vec<RecordRow> = records.iter().map(RecordRow::from).collect();
    Ok(format!("{}\n{} record(s)", Table::new(rows), records.len()))
}

fn show_payload(
    config: &PersistConfig,
    key_hex: Option<&str>,
    json: bool,
) -> Result<(), anyhow::Error> {
    let cipher = parse_key(key_hex)?;
    let path = config.local_storage().resolve_path(&config.file_name);
    info!("Showing payload: {}", path.display());

    match load_records(config, &cipher) {
        Ok(None) => println!("No payload found at: {}", path.display()),
        Ok(Some(records)) if records.is_empty() && !json => println!("Payload holds no records"),
        Ok(Some(records)) => println!("{}", render_records(&records, json)?),
        Err(e) => {
            error!("Failed to read payload: {}", e);
            return Err(e);
        }
    }

    Ok(())
}

fn verify_payload(config: &PersistConfig, key_hex: Option<&str>) -> Result<(), anyhow::Error> {
    let path = config.local_storage().resolve_path(&config.file_name);
    info!("Verifying payload: {}", path.display());

    let status = match key_hex {
        Some(_) => inspect_payload(config, &parse_key(key_hex)?)?,
        // Without a key only presence can be checked
        None => match inspect_payload(config, &UnavailableCipher::new()) {
            Ok(status) => status,
            Err(_) => {
                println!("? Payload present, no key supplied to verify it");
                return Ok(());
            }
        },
    };

    match status {
        PayloadStatus::Missing => {
            println!("- No payload at {}", path.display());
        }
        PayloadStatus::Readable {
            records,
            payload_bytes,
        } => {
            println!(
                "✓ Payload is readable: {records} record(s), {}",
                format_size(payload_bytes as u64)
            );
        }
        PayloadStatus::Unreadable(e) => {
            error!("✗ Payload is unreadable: {}", e);
            return Err(anyhow!("payload would be discarded on restore: {e}"));
        }
    }

    Ok(())
}

async fn delete_payload(config: PersistConfig, force: bool) -> Result<(), anyhow::Error> {
    let path = config.local_storage().resolve_path(&config.file_name);
    if !path.exists() {
        println!("No payload found at: {}", path.display());
        return Ok(());
    }

    if !force {
        print!(
            "Are you sure you want to delete payload '{}'? (y/N): ",
            path.display()
        );
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().to_lowercase().starts_with('y') {
            println!("Deletion cancelled");
            return Ok(());
        }
    }

    // Deleting needs no key
    let orchestrator = create_local_orchestrator(config, UnavailableCipher::new())?;
    orchestrator.delete().await?;
    println!("✓ Payload deleted successfully");

    Ok(())
}

fn truncate_value(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let head: String = value.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{head}…")
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: i64) -> String {
    use chrono::{Local, TimeZone};

    match Local.timestamp_opt(timestamp, 0) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => timestamp.to_string(),
    }
}
