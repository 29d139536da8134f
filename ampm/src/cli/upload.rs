use std::path::PathBuf;

use clap::Args;

use ampm_common::error::Result;
use ampm_common::Config;
use ampm_core::{Resolver, UploadRequest};

use crate::cli::parse_key_val;

#[derive(Args, Debug)]
pub struct Upload {
    /// Payload to upload. When omitted, --remote-path must name a payload
    /// that is already on the share
    pub local_path: Option<PathBuf>,

    /// Artifact type
    #[arg(long = "type", value_name = "TYPE")]
    pub artifact_type: String,

    /// Override the artifact name (default: the file name)
    #[arg(long)]
    pub name: Option<String>,

    /// Set the artifact description (default: empty)
    #[arg(long)]
    pub description: Option<String>,

    /// Store the payload as-is instead of gzip / tar+gzip
    #[arg(long)]
    pub uncompressed: bool,

    /// Store the payload at this location on the share
    #[arg(long)]
    pub remote_path: Option<String>,

    /// Artifact attributes (`-a key=value`)
    #[arg(short = 'a', long = "attr", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub attr: Vec<(String, String)>,

    /// Artifact environment vars (`-e KEY=value`)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub env: Vec<(String, String)>,
}

impl Upload {
    pub fn run(&self, config: &Config) -> Result<()> {
        let resolver = Resolver::new(config.clone());
        let (id, _meta) = resolver.upload(UploadRequest {
            local_path: self.local_path.clone(),
            artifact_type: self.artifact_type.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            remote_path: self.remote_path.clone(),
            compressed: !self.uncompressed,
            attributes: self.attr.iter().cloned().collect(),
            env: self.env.iter().cloned().collect(),
        })?;
        println!("{id}");
        Ok(())
    }
}
