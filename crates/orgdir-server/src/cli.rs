use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "orgdir-server", version)]
pub struct Cli {
    #[arg(short, long, global = true, env = "ORGDIR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the REST server (default).
    Serve,
    /// Apply the PostgreSQL schema and row isolation policies.
    Migrate,
    /// Create the ROOT tenant, its top department and the platform admin.
    Init,
}
