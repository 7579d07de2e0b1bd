use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tollgate_core::models::Listing;
use tollgate_core::{DedupStore, DomainKey, GovernanceConfig, identify};
use tollgate_db::{Database, DatabaseConfig, DedupRepository};

#[derive(Parser)]
#[command(name = "tollgate", version, about = "Inspect and edit the dedup history")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the normalized URL, dedup key and domain key (no database needed)
    Key {
        /// URL to identify
        #[arg(short, long)]
        url: String,

        /// Base URL for resolving relative URLs
        #[arg(short, long)]
        base: Option<String>,
    },

    /// Check whether a URL was already recorded
    Seen {
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        base: Option<String>,
    },

    /// Record a URL as processed
    Record {
        #[arg(short, long)]
        url: String,

        #[arg(short, long)]
        base: Option<String>,

        /// Listing title to store alongside the URL
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Delete a record by dedup key so the item is surfaced again
    Forget {
        /// Dedup key (32 hex chars)
        #[arg(short, long)]
        id: String,
    },

    /// Show a stored record by dedup key
    Show {
        #[arg(short, long)]
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Setup tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("tollgate=info".parse()?)
                .add_directive("tollgate_core=info".parse()?)
                .add_directive("tollgate_db=info".parse()?),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Key { url, base } => cmd_key(&url, base.as_deref())?,
        Commands::Seen { url, base } => {
            let store = open_store().await?;
            cmd_seen(&store, &url, base.as_deref()).await?;
        }
        Commands::Record { url, base, title } => {
            let store = open_store().await?;
            cmd_record(&store, &url, base.as_deref(), title).await?;
        }
        Commands::Forget { id } => {
            let store = open_store().await?;
            cmd_forget(&store, &id).await?;
        }
        Commands::Show { id } => {
            let store = open_store().await?;
            cmd_show(&store, &id).await?;
        }
    }

    Ok(())
}

/// Open the dedup history and wrap its repository in a dedup store.
async fn open_store() -> Result<DedupStore<DedupRepository>> {
    let governance = GovernanceConfig::from_env().context("Invalid governance configuration")?;
    let config = DatabaseConfig::from_env()?;

    let db = Database::open(&config)
        .await
        .context("Failed to open the dedup history database")?;

    Ok(DedupStore::new(db.dedup_repo(), governance.dedup))
}

fn cmd_key(url: &str, base: Option<&str>) -> Result<()> {
    let (normalized, key) = identify(url, base)?;
    let domain = DomainKey::from_url(&normalized)?;

    println!("normalized: {normalized}");
    println!("key:        {key}");
    println!("domain:     {domain}");
    Ok(())
}

async fn cmd_seen(store: &DedupStore<DedupRepository>, url: &str, base: Option<&str>) -> Result<()> {
    let (normalized, key) = identify(url, base)?;
    let seen = store.is_seen(&normalized).await?;

    if seen {
        println!("seen {key} {normalized}");
    } else {
        println!("new  {key} {normalized}");
    }
    Ok(())
}

async fn cmd_record(
    store: &DedupStore<DedupRepository>,
    url: &str,
    base: Option<&str>,
    title: Option<String>,
) -> Result<()> {
    let (normalized, _) = identify(url, base)?;
    let payload = match title {
        Some(title) => serde_json::to_value(Listing::new(title, normalized.clone()))?,
        None => serde_json::Value::Null,
    };

    let key = store.record_with(&normalized, payload).await?;
    tracing::info!(%key, url = %normalized, "Recorded");
    println!("{key}");
    Ok(())
}

async fn cmd_forget(store: &DedupStore<DedupRepository>, id: &str) -> Result<()> {
    if store.forget(id).await? {
        println!("Deleted {id}");
    } else {
        println!("No record with key {id}");
    }
    Ok(())
}

async fn cmd_show(store: &DedupStore<DedupRepository>, id: &str) -> Result<()> {
    match store.get(id).await? {
        Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
        None => println!("No record with key {id}"),
    }
    Ok(())
}
