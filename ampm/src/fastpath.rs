//! The launcher-side fast path: for `get <type>:<fp>` and `env <type>:<fp>`
//! the answer is already materialized as a cache side-file, so it is printed
//! without locks, network I/O, or any parsing beyond the identifier shape.
//! Correctness never depends on this path; every miss falls back.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use ampm_common::Config;

/// Returns true when the request was fully answered here.
pub fn try_fast_path() -> bool {
    let argv: Vec<String> = env::args().skip(1).collect();
    let [command, identifier] = argv.as_slice() else {
        return false;
    };
    if command != "get" && command != "env" {
        return false;
    }
    let Some((artifact_type, fingerprint)) = split_identifier(identifier) else {
        return false;
    };

    let metadata_dir = Config::cache_root_from_env()
        .join("metadata")
        .join(artifact_type);

    match command.as_str() {
        "get" => {
            // Read the link text, never resolve it: a broken or stale link
            // must fall through to the full resolver.
            let target: PathBuf =
                match fs::read_link(metadata_dir.join(format!("{fingerprint}.target"))) {
                    Ok(target) => target,
                    Err(_) => return false,
                };
            if !target.exists() {
                return false;
            }
            println!("{}", target.display());
            true
        }
        "env" => match fs::read(metadata_dir.join(format!("{fingerprint}.env"))) {
            Ok(contents) => {
                let _ = io::stdout().write_all(&contents);
                true
            }
            Err(_) => false,
        },
        _ => false,
    }
}

/// `.+:[a-z0-9]{32}`, split at the last-possible colon boundary.
fn split_identifier(identifier: &str) -> Option<(&str, &str)> {
    let (artifact_type, fingerprint) = identifier.rsplit_once(':')?;
    if artifact_type.is_empty()
        || fingerprint.len() != 32
        || !fingerprint
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
    {
        return None;
    }
    Some((artifact_type, fingerprint))
}
