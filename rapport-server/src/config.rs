use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to
    pub listen: SocketAddr,

    /// Directory of the sled database. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,

    /// Upper bound for a single store operation, in milliseconds
    pub store_timeout_ms: u64,

    /// Buffered friend events per subscriber before it starts lagging
    pub event_capacity: usize,

    /// Usernames registered in the directory at startup
    pub seed_users: Vec<String>,

    /// Tracing filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8000)),
            db_path: Some(PathBuf::from("rapport-db")),
            store_timeout_ms: 2000,
            event_capacity: 256,
            seed_users: Vec::new(),
            log_filter: String::from("info"),
        }
    }
}

impl Config {
    /// In-memory database, for tests and throwaway instances.
    pub fn temporary() -> Self {
        Self {
            db_path: None,
            ..Self::default()
        }
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents).context("Failed to parse config file")
    }

    /// Defaults, then the config file if given, then command line flags.
    pub fn load(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        if let Some(listen) = args.listen {
            config.listen = listen;
        }
        if let Some(db_path) = &args.db_path {
            config.db_path = Some(db_path.clone());
        }
        if args.in_memory {
            config.db_path = None;
        }
        if let Some(timeout) = args.store_timeout_ms {
            config.store_timeout_ms = timeout;
        }
        config.seed_users.extend(args.seed_users.iter().cloned());
        Ok(config)
    }

    pub fn open_db(&self) -> sled::Result<sled::Db> {
        match &self.db_path {
            Some(path) => sled::open(path),
            None => sled::Config::new().temporary(true).open(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "rapport-server", about = "Friend request and friend graph service")]
pub struct Args {
    /// JSON config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub listen: Option<SocketAddr>,

    #[arg(long)]
    pub db_path: Option<PathBuf>,

    /// Keep the database in memory
    #[arg(long, conflicts_with = "db_path")]
    pub in_memory: bool,

    #[arg(long)]
    pub store_timeout_ms: Option<u64>,

    /// Register a username at startup (repeatable)
    #[arg(long = "seed-user")]
    pub seed_users: Vec<String>,
}
