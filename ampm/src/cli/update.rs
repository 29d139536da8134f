use std::process::Command;

use clap::Args;

use ampm_common::config::UPDATE_SCRIPT;
use ampm_common::error::{AmpmError, Result};
use ampm_common::Config;

#[derive(Args, Debug)]
pub struct Update {}

impl Update {
    pub fn run(&self, _config: &Config) -> Result<()> {
        let status = Command::new(UPDATE_SCRIPT).status().map_err(|e| {
            AmpmError::Config(format!("cannot run the update script {UPDATE_SCRIPT}: {e}"))
        })?;
        if !status.success() {
            std::process::exit(status.code().unwrap_or(1));
        }
        Ok(())
    }
}
