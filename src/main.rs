use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use brokerseal::reconcile::preview;
use brokerseal::upgrade::{self, CcApi, UpgradeLogger, UpgradeOptions, validate};
use brokerseal::{
    ConfigFile, Database, EncryptionSettings, PasswordMetadataStore, default_database_path,
    label_name, setup_encryption, verify_all,
};
use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod auth;

#[derive(Debug, Parser)]
#[command(name = "brokerseal")]
#[command(
    version,
    about = "Encryption-at-rest key rotation and bulk instance upgrades for a service broker."
)]
struct Cli {
    /// Path to the broker's SQLite database
    #[arg(long, global = true, value_name = "PATH", env = "DB_PATH")]
    db: Option<PathBuf>,

    /// JSON config file with an `encryption` section
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Whether the database should be encrypted
    #[arg(
        long,
        global = true,
        value_name = "BOOL",
        env = "ENCRYPTION_ENABLED",
        action = ArgAction::Set
    )]
    encryption_enabled: Option<bool>,

    /// JSON list of {label, primary, password: {secret}}
    #[arg(
        long,
        global = true,
        value_name = "JSON",
        env = "ENCRYPTION_PASSWORDS",
        hide_env_values = true
    )]
    encryption_passwords: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Reconciles configured passwords and re-encrypts the database if the primary changed
    Rotate,

    /// Lists stored password metadata
    Status,

    /// Checks that every protected field can be read with the configured passwords
    Check,

    /// Upgrades every instance of a broker's plans that has an upgrade available
    #[command(arg_required_else_help = true)]
    UpgradeAll {
        /// Service broker name
        broker: String,

        /// Number of concurrent upgrades
        #[arg(long, default_value_t = upgrade::DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Platform API endpoint
        #[arg(long, env = "CF_API", value_name = "URL")]
        api: String,

        /// Access token, sent verbatim as the Authorization header
        #[arg(long, env = "CF_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,

        /// Skip TLS certificate validation
        #[arg(long, default_value_t = false)]
        skip_ssl_validation: bool,
    },
}

impl Cli {
    fn settings(&self) -> Result<EncryptionSettings> {
        let file = match &self.config {
            Some(path) => Some(ConfigFile::load(path)?),
            None => None,
        };
        Ok(EncryptionSettings::resolve(
            self.encryption_enabled,
            self.encryption_passwords.as_deref(),
            file.as_ref(),
        )?)
    }

    async fn database(&self) -> Result<Database> {
        let path = match &self.db {
            Some(p) => p.clone(),
            None => default_database_path()?,
        };
        Database::open(&path)
            .await
            .with_context(|| format!("error opening database {}", path.display()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    match &args.command {
        Commands::Rotate => {
            let cancel = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&cancel);
            ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))
                .context("error installing interrupt handler")?;

            let settings = args.settings()?;
            let db = args.database().await?;
            let setup = setup_encryption(&db, &settings, &cancel).await;
            db.close().await;
            let setup = setup?;

            match setup.rotated_rows {
                Some(rows) => println!(
                    "rotated {rows} rows from {} to {}",
                    label_name(&setup.reconciliation.stored_primary_label),
                    label_name(&setup.reconciliation.configured_primary_label),
                ),
                None => println!("encryption unchanged"),
            }
            for label in &setup.deleted_labels {
                println!("removed stale password '{label}'");
            }
            if !setup.unreadable.is_empty() {
                println!("{} fields cannot be read", setup.unreadable.len());
            }
            println!(
                "primary password: {}",
                label_name(&setup.reconciliation.configured_primary_label)
            );
        }

        Commands::Status => {
            let db = args.database().await?;
            let entries = PasswordMetadataStore::new(db.pool().clone()).load().await;
            db.close().await;
            let entries = entries?;

            if entries.is_empty() {
                println!("No password metadata stored.");
                return Ok(());
            }

            let rows: Vec<[String; 4]> = entries
                .iter()
                .map(|m| {
                    [
                        m.label.clone(),
                        if m.primary { "yes" } else { "no" }.to_string(),
                        m.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        m.updated_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    ]
                })
                .collect();
            let headers = ["Label", "Primary", "Created", "Updated"];
            let widths: Vec<usize> = (0..4)
                .map(|i| {
                    rows.iter()
                        .map(|r| r[i].len())
                        .chain(std::iter::once(headers[i].len()))
                        .max()
                        .unwrap_or_default()
                })
                .collect();
            let [lw, pw, cw, uw] = [widths[0], widths[1], widths[2], widths[3]];

            println!(
                "{:<lw$}  {:<pw$}  {:<cw$}  {:<uw$}",
                headers[0], headers[1], headers[2], headers[3]
            );
            println!("{:-<lw$}  {:-<pw$}  {:-<cw$}  {:-<uw$}", "", "", "", "");
            for [label, primary, created, updated] in &rows {
                println!("{label:<lw$}  {primary:<pw$}  {created:<cw$}  {updated:<uw$}");
            }
        }

        Commands::Check => {
            let settings = args.settings()?;
            let db = args.database().await?;
            let result = check(&db, &settings).await;
            db.close().await;
            let failures = result?;

            if !failures.is_empty() {
                for f in &failures {
                    eprintln!("{f}");
                }
                bail!("{} fields cannot be read", failures.len());
            }
            println!("all fields readable");
        }

        Commands::UpgradeAll {
            broker,
            batch_size,
            api,
            token,
            skip_ssl_validation,
        } => {
            validate::broker_name(broker)?;
            validate::batch_size(*batch_size)?;
            validate::api_url(api)?;
            let token = auth::read_token(token.clone())?;
            validate::token(&token)?;

            let client = CcApi::new(api, &token, *skip_ssl_validation)?;
            let options = UpgradeOptions {
                batch_size: *batch_size,
                ..Default::default()
            };
            upgrade::upgrade_all(
                Arc::new(client),
                broker,
                options,
                Arc::new(UpgradeLogger::stdout()),
            )
            .await
            .context("upgrade-all failed")?;
        }
    }

    Ok(())
}

/// Read every protected field with whatever the current configuration can
/// decrypt, including rows not yet moved to a new primary. Writes nothing.
async fn check(
    db: &Database,
    settings: &EncryptionSettings,
) -> Result<Vec<brokerseal::RecordError>> {
    let store = PasswordMetadataStore::new(db.pool().clone());
    let config = preview(&store, settings.enabled, &settings.passwords)
        .await
        .context("error parsing encryption configuration")?;
    let encryptor = config.rotation_encryptor.as_ref().unwrap_or(&config.encryptor);

    Ok(verify_all(db.pool(), encryptor)
        .await
        .context("error checking database records")?)
}
