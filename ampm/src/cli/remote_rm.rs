use clap::Args;

use ampm_common::error::{AmpmError, Result};
use ampm_common::Config;
use ampm_core::Resolver;

#[derive(Args, Debug)]
pub struct RemoteRm {
    /// `<type>:<fingerprint>` to delete from the remote store
    pub artifact: String,

    /// Make sure nobody will ever use this artifact ever again!!!
    #[arg(long = "i-realise-this-may-break-other-peoples-builds-in-the-future")]
    pub acknowledged: bool,
}

impl RemoteRm {
    pub fn run(&self, config: &Config) -> Result<()> {
        if !self.acknowledged {
            return Err(AmpmError::InvalidInput(
                "you must specify --i-realise-this-may-break-other-peoples-builds-in-the-future"
                    .into(),
            ));
        }
        Resolver::new(config.clone()).remote_rm(&self.artifact)
    }
}
