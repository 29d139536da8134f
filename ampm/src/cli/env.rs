use clap::Args;

use ampm_common::error::Result;
use ampm_common::Config;
use ampm_core::Resolver;

use crate::cli::parse_key_val;

#[derive(Args, Debug)]
pub struct Env {
    /// `<type>:<fingerprint>`, or a type filtered with -a constraints
    pub identifier: String,

    /// Artifact attributes (`-a key=value`, or `-a key=@<expr>`)
    #[arg(short = 'a', long = "attr", value_name = "KEY=EXPR", value_parser = parse_key_val)]
    pub attr: Vec<(String, String)>,
}

impl Env {
    pub fn run(&self, config: &Config) -> Result<()> {
        let resolver = Resolver::new(config.clone());
        let script = resolver.env_script(&self.identifier, &self.attr)?;
        print!("{script}");
        Ok(())
    }
}
