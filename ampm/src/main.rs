// ampm/src/main.rs
use std::process;

use clap::Parser;
use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use ampm_common::AmpmError;

mod cli;
mod fastpath;

use cli::CliArgs;

fn main() {
    // Exact `get type:fp` / `env type:fp` invocations are answered straight
    // from the cache side-files, before clap or tracing ever run. Any miss
    // falls through to the full resolver below.
    if fastpath::try_fast_path() {
        return;
    }

    let cli_args = CliArgs::parse();

    let level_filter = match cli_args.verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("AMPM_LOG")
        .from_env_lossy();
    // stdout carries resolved paths and env scripts; logs go to stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .try_init();

    if let Err(e) = cli_args.run() {
        report(&e);
        process::exit(e.exit_code());
    }
}

fn report(error: &AmpmError) {
    eprintln!("{}: {error}", "Error".red().bold());
    if let AmpmError::AmbiguousQuery {
        attributes,
        options,
        ..
    } = error
    {
        for option in options {
            eprintln!("  {option}");
        }
        if !attributes.is_empty() {
            let ignores = attributes
                .iter()
                .map(|a| format!("-a {a}=@ignore"))
                .collect::<Vec<_>>()
                .join(" ");
            eprintln!(
                "The attribute(s) {} are not unique; try adding `{ignores}` (or just `-a @any=@ignore`) to the query.",
                attributes
                    .iter()
                    .map(|a| format!("`{a}`"))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }
}
