//! # Vault RAG CLI (`vrag`)
//!
//! The `vrag` binary is the primary interface for Vault RAG. It provides
//! commands for configuration scaffolding, key management, document
//! ingestion, querying, statistics, and audit ledger verification.
//!
//! ## Usage
//!
//! ```bash
//! vrag --config ./config/vrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vrag init` | Write a commented starter configuration file |
//! | `vrag setup-key` | Generate the AES-256 encryption key |
//! | `vrag ingest <path>` | Ingest a document or a directory of documents |
//! | `vrag query -q "<question>"` | Ask a question over the encrypted corpus |
//! | `vrag query` | Interactive query loop |
//! | `vrag stats` | Show collection, provider, and ledger statistics |
//! | `vrag verify-audit` | Re-walk the audit ledger hash chain |
//! | `vrag drop --yes` | Drop the vector collection |
//!
//! ## Examples
//!
//! ```bash
//! # First-time setup
//! vrag init --config ./config/vrag.toml
//! vrag setup-key --config ./config/vrag.toml
//!
//! # Ingest a directory of notes
//! vrag ingest ./docs --verbose --config ./config/vrag.toml
//!
//! # One-shot question with retrieved context shown
//! vrag query -q "when is the deployment freeze?" --show-context
//!
//! # Ledger integrity check
//! vrag verify-audit
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use vault_rag::audit::AuditLedger;
use vault_rag::config::{self, Config};
use vault_rag::index::open_index;
use vault_rag::{crypto, ingest, query, stats};

/// Vault RAG CLI — retrieval-augmented generation over an encrypted
/// document corpus.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Run `vrag init` to create one.
#[derive(Parser)]
#[command(
    name = "vrag",
    about = "Vault RAG — privacy-preserving retrieval-augmented generation over an encrypted corpus",
    version,
    long_about = "Vault RAG parses, chunks, and embeds documents locally, encrypts every chunk \
    with AES-256-GCM before indexing, and answers questions by decrypting retrieved chunks in \
    memory. All operations are recorded in a hash-chained audit ledger."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/vrag.toml`. All encryption, provider,
    /// index, and audit settings are read from this file.
    #[arg(long, global = true, default_value = "./config/vrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Write a commented starter configuration file.
    ///
    /// Creates the file at the `--config` path. Refuses to overwrite an
    /// existing file unless `--force` is given.
    Init {
        /// Overwrite an existing configuration file.
        #[arg(long)]
        force: bool,
    },

    /// Generate the encryption key file.
    ///
    /// Writes 32 random bytes to `encryption.key_file` with owner-only
    /// permissions. Refuses to overwrite an existing key unless
    /// `--force` is given; overwriting makes previously ingested data
    /// unreadable.
    SetupKey {
        /// Overwrite an existing key file.
        #[arg(long)]
        force: bool,
    },

    /// Ingest a document or a directory of documents.
    ///
    /// Each file is parsed, chunked, embedded, encrypted, and stored.
    /// Directories are processed non-recursively in filename order; one
    /// failing file does not stop the batch.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,

        /// Print a per-file result line for directory ingestion.
        #[arg(long)]
        verbose: bool,
    },

    /// Ask a question over the encrypted corpus.
    ///
    /// Without `--query`, starts an interactive loop that reads one
    /// question per line until an empty line or EOF.
    Query {
        /// The question to ask.
        #[arg(short, long)]
        query: Option<String>,

        /// Number of chunks to retrieve (overrides `query.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Show the decrypted chunks the answer was built from.
        #[arg(long)]
        show_context: bool,
    },

    /// Show collection, provider, and audit ledger statistics.
    Stats,

    /// Re-walk the audit ledger and verify its hash chain.
    ///
    /// Exits non-zero if any record has been altered, removed, or
    /// reordered since it was written.
    VerifyAudit,

    /// Drop the vector collection.
    ///
    /// Deletes every stored vector and ciphertext token. The audit
    /// ledger and the key file are left untouched.
    Drop {
        /// Confirm the drop. Required.
        #[arg(long)]
        yes: bool,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    // `init` runs before a config file exists.
    if let Commands::Init { force } = &cli.command {
        config::write_starter_config(&cli.config, *force)?;
        println!("Starter configuration written: {}", cli.config.display());
        println!("Next: run `vrag setup-key` to generate the encryption key.");
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
        Commands::SetupKey { force } => {
            run_setup_key(&cfg, force)?;
        }
        Commands::Ingest { path, verbose } => {
            ingest::run_ingest(&cfg, &path, verbose).await?;
        }
        Commands::Query {
            query,
            top_k,
            show_context,
        } => {
            query::run_query(&cfg, query, top_k, show_context).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::VerifyAudit => {
            run_verify_audit(&cfg)?;
        }
        Commands::Drop { yes } => {
            run_drop(&cfg, yes).await?;
        }
    }

    Ok(())
}

fn run_setup_key(config: &Config, force: bool) -> anyhow::Result<()> {
    let key = crypto::generate_key();
    crypto::write_key_file(&config.encryption.key_file, &key, force)?;
    println!(
        "Encryption key generated: {}",
        config.encryption.key_file.display()
    );
    println!("IMPORTANT: Back up this key file. Data encrypted with it cannot be recovered without it.");
    Ok(())
}

fn run_verify_audit(config: &Config) -> anyhow::Result<()> {
    let ledger = AuditLedger::open(&config.audit)?;
    let count = ledger.verify()?;
    println!("Audit log verified: {} records intact", count);
    Ok(())
}

async fn run_drop(config: &Config, yes: bool) -> anyhow::Result<()> {
    if !yes {
        anyhow::bail!(
            "Refusing to drop collection '{}' without --yes",
            config.index.collection
        );
    }

    let index = open_index(&config.index)?;
    index.drop_collection().await?;

    let ledger = AuditLedger::open(&config.audit)?;
    let mut meta = BTreeMap::new();
    meta.insert("collection".to_string(), json!(config.index.collection));
    ledger.append("system", "collection_dropped", meta, None)?;

    println!("Collection '{}' dropped.", config.index.collection);
    Ok(())
}
