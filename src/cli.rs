use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::proxy::cache::EvictionPolicy;

#[derive(Debug, Clone, Default, Parser)]
#[command(name = "proxycache", about = "Caching HTTP forward proxy")]
pub struct Cli {
    /// Path to the configuration file (defaults to ./proxycache.toml if present).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Address to accept proxy clients on, overriding the configuration.
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Cache eviction policy, overriding the configuration.
    #[arg(long, value_enum)]
    pub policy: Option<EvictionPolicy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}
