// ampm/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};

use ampm_common::error::Result;
use ampm_common::Config;

// Module declarations
pub mod env;
pub mod get;
pub mod list;
pub mod remote_rm;
pub mod update;
pub mod upload;

use crate::cli::env::Env;
use crate::cli::get::Get;
use crate::cli::list::List;
use crate::cli::remote_rm::RemoteRm;
use crate::cli::update::Update;
use crate::cli::upload::Upload;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "ampm", bin_name = "ampm")]
#[command(propagate_version = true)]
pub struct CliArgs {
    /// Remote repository server URI (default: the /opt/ampm/repo_uri file)
    #[arg(short = 's', long, global = true)]
    pub server: Option<String>,

    /// Don't try to contact the remote repository server
    #[arg(long, global = true)]
    pub offline: bool,

    /// Increase verbosity (-v for debug output, -vv for trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch an artifact, then print its local path
    Get(Get),
    /// Fetch an artifact, then print its environment exports
    Env(Env),
    /// Get info about artifacts
    List(List),
    /// Upload an artifact to the store
    Upload(Upload),
    /// Remove an artifact from the remote store, forever
    RemoteRm(RemoteRm),
    /// Run the installer's update script
    Update(Update),
}

impl CliArgs {
    pub fn run(&self) -> Result<()> {
        let config = Config::load(self.server.clone(), self.offline)?;
        match &self.command {
            Command::Get(command) => command.run(&config),
            Command::Env(command) => command.run(&config),
            Command::List(command) => command.run(&config),
            Command::Upload(command) => command.run(&config),
            Command::RemoteRm(command) => command.run(&config),
            Command::Update(command) => command.run(&config),
        }
    }
}

/// Parses a `-a`/`-e` argument of the form `key=value`.
pub fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("must be in the form `key=value`, got: `{raw}`"))
}
