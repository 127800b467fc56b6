use crate::services::uploader::{
    DEFAULT_PART_SIZE, DEFAULT_READ_CONCURRENCY, DEFAULT_UPLOAD_CONCURRENCY, UploaderOptions,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::{
    env::{self, VarError},
    path::PathBuf,
    str::FromStr,
};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub part_size: u64,
    pub read_concurrency: usize,
    pub upload_concurrency: usize,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Partitioned document vault")]
pub struct Args {
    /// Host to bind to (overrides GAIA_VAULT_HOST)
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Port to bind to (overrides GAIA_VAULT_PORT)
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides GAIA_VAULT_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides GAIA_VAULT_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Bytes per uploaded part (overrides GAIA_VAULT_PART_SIZE)
    #[arg(long, global = true)]
    pub part_size: Option<u64>,

    /// Concurrent local reads during upload (overrides GAIA_VAULT_READ_CONCURRENCY)
    #[arg(long, global = true)]
    pub read_concurrency: Option<usize>,

    /// Concurrent part uploads (overrides GAIA_VAULT_UPLOAD_CONCURRENCY)
    #[arg(long, global = true)]
    pub upload_concurrency: Option<usize>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Upload a local file as a partitioned document and print its manifest
    Upload {
        path: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Print a stored document record
    Show { id: String },
    /// Write a stored document's content to a local file
    Download { id: String, output: PathBuf },
    /// Delete a stored document record
    Delete { id: String },
}

impl AppConfig {
    /// Merge CLI args over process environment variables over defaults.
    pub fn from_env_and_args(args: &Args) -> Result<Self> {
        Self::from_sources(args, |key| env::var(key))
    }

    pub fn from_sources<F>(args: &Args, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        // --- Environment fallback ---
        let env_host = env("GAIA_VAULT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_or(&env, "GAIA_VAULT_PORT", 3000u16)?;
        let env_storage =
            env("GAIA_VAULT_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env("GAIA_VAULT_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/gaia_vault.db".into());
        let env_part_size = env_or(&env, "GAIA_VAULT_PART_SIZE", DEFAULT_PART_SIZE)?;
        let env_reads = env_or(&env, "GAIA_VAULT_READ_CONCURRENCY", DEFAULT_READ_CONCURRENCY)?;
        let env_uploads =
            env_or(&env, "GAIA_VAULT_UPLOAD_CONCURRENCY", DEFAULT_UPLOAD_CONCURRENCY)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.clone().unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            part_size: args.part_size.unwrap_or(env_part_size),
            read_concurrency: args.read_concurrency.unwrap_or(env_reads),
            upload_concurrency: args.upload_concurrency.unwrap_or(env_uploads),
        };

        if cfg.part_size == 0 {
            anyhow::bail!("part size must be positive");
        }
        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn uploader_options(&self) -> UploaderOptions {
        UploaderOptions {
            part_size: Some(self.part_size),
            read_concurrency: self.read_concurrency,
            upload_concurrency: self.upload_concurrency,
        }
    }
}

fn env_or<T, F>(env: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Result<String, VarError>,
{
    match env(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
