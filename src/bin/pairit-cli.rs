use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use pairit::store::postgres::PgStore;
use pairit::store::Store;
use sqlx::postgres::PgPoolOptions;

#[derive(Parser)]
#[command(author, version, about = "Offline tooling for pairit experiment documents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a document and report lint diagnostics, without uploading it.
    Lint { path: PathBuf },
    /// Compile a document and print its canonical form and content hash.
    Compile { path: PathBuf },
    /// Compile and upload a document to the configured database as `owner`.
    Upload { path: PathBuf, owner: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Lint { path } => lint(&path),
        Commands::Compile { path } => compile(&path),
        Commands::Upload { path, owner } => upload(&path, &owner).await,
    }
}

fn read_document(path: &PathBuf) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {} as JSON", path.display()))
}

fn lint(path: &PathBuf) -> Result<()> {
    let document = read_document(path)?;
    match pairit::compiler::compile(&document) {
        Ok((config, diagnostics)) => {
            println!("{} {} pages, hash {}", "ok:".green().bold(), config.pages.len(), config.config_hash);
            for diag in diagnostics {
                println!("{} {}", "warn:".yellow().bold(), diag.message);
            }
        }
        Err(e) => println!("{} {}", "error:".red().bold(), e),
    }
    Ok(())
}

fn compile(path: &PathBuf) -> Result<()> {
    let document = read_document(path)?;
    let (config, _) = pairit::compiler::compile(&document).map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn upload(path: &PathBuf, owner: &str) -> Result<()> {
    let document = read_document(path)?;
    let (config, diagnostics) = pairit::compiler::compile(&document).map_err(|e| anyhow::anyhow!(e))?;
    for diag in &diagnostics {
        println!("{} {}", "warn:".yellow().bold(), diag.message);
    }

    let settings = pairit::Settings::load()?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(secrecy::ExposeSecret::expose_secret(&settings.database.url))
        .await?;
    let store = Arc::new(PgStore::new(pool));
    store.migrate().await?;
    store.insert_config(&config, owner, &config.config_hash).await?;

    println!("{} uploaded {} as {}", "ok:".green().bold(), config.config_id, owner);
    Ok(())
}
