use clap::{Args, ValueEnum};
use colored::Colorize;
use serde_json::json;

use ampm_common::error::Result;
use ampm_common::model::{ArtifactId, ArtifactMetadata};
use ampm_common::Config;
use ampm_core::query::format_short;
use ampm_core::Resolver;

use crate::cli::parse_key_val;

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Pretty,
    Json,
    Short,
    IndexFile,
}

#[derive(Args, Debug)]
pub struct List {
    /// A type prefix, or an exact `<type>:<fingerprint>`
    pub identifier: Option<String>,

    /// Artifact attributes (`-a key=value`, or `-a key=@<expr>`)
    #[arg(short = 'a', long = "attr", value_name = "KEY=EXPR", value_parser = parse_key_val)]
    pub attr: Vec<(String, String)>,

    /// Output format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Pretty)]
    pub format: OutputFormat,

    /// With --format=index-file, prefix artifact paths with this URL
    #[arg(long)]
    pub index_file_prefix: Option<String>,
}

impl List {
    pub fn run(&self, config: &Config) -> Result<()> {
        let resolver = Resolver::new(config.clone());
        let identifier = self.identifier.as_deref().unwrap_or("");
        let artifacts = resolver.list(identifier, &self.attr)?;

        match self.format {
            OutputFormat::Pretty => {
                let blocks: Vec<String> = artifacts
                    .iter()
                    .map(|(id, meta)| format_pretty(id, meta))
                    .collect();
                println!("{}", blocks.join("\n\n"));
            }
            OutputFormat::Json => {
                let values: Vec<serde_json::Value> = artifacts
                    .iter()
                    .map(|(id, meta)| {
                        Ok(json!({
                            "identifier": id.to_string(),
                            "type": meta.artifact_type,
                            "name": meta.name,
                            "description": meta.description,
                            "path_type": meta.path_type.as_str(),
                            "compression": meta.compression.as_str(),
                            "attributes": meta.attributes,
                            "env": meta.env,
                            "pubdate": meta.pubdate.to_rfc3339(),
                            "remote_path": meta.remote_payload_path()?,
                        }))
                    })
                    .collect::<Result<_>>()?;
                println!("{}", serde_json::to_string_pretty(&values).unwrap_or_default());
            }
            OutputFormat::Short => {
                for (id, meta) in &artifacts {
                    println!("{}", format_short(id, meta));
                }
            }
            OutputFormat::IndexFile => {
                let prefix = self.index_file_prefix.as_deref().unwrap_or("");
                for (id, meta) in &artifacts {
                    println!(
                        "{}\t{}/{}",
                        format_short(id, meta),
                        prefix.trim_end_matches('/'),
                        meta.remote_payload_path()?
                    );
                }
            }
        }
        Ok(())
    }
}

const INDENT: usize = 4;
const MAX_LINE_LENGTH: usize = 120;

/// Bright identifier header, then the attributes indented and wrapped.
fn format_pretty(id: &ArtifactId, meta: &ArtifactMetadata) -> String {
    let header = format!(
        "{}{}",
        id.artifact_type.bold(),
        format!(":{}", id.fingerprint).dimmed()
    );

    let parts: Vec<(String, usize)> = meta
        .combined_attrs()
        .iter()
        .map(|(k, v)| {
            let plain_len = k.len() + 1 + v.len() + 2;
            (
                format!("{}={}", k.bright_green(), format!("'{v}'").bright_yellow()),
                plain_len,
            )
        })
        .collect();

    let mut body = " ".repeat(INDENT);
    let mut line_len = 0;
    for (part, plain_len) in parts {
        if line_len > 0 && line_len + plain_len + 2 > MAX_LINE_LENGTH - INDENT {
            body.push('\n');
            body.push_str(&" ".repeat(INDENT));
            line_len = 0;
        }
        if line_len > 0 {
            body.push_str(", ");
        }
        body.push_str(&part);
        line_len += plain_len + 2;
    }

    format!("{header}\n{body}")
}
