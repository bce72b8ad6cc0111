//! stratum
//!
//! Command line front end: resolves layered configuration against a schema
//! and prints the result.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use stratum_config::cli::{CheckArgs, Cli, Command, FormatArg, ResolveArgs};
use stratum_config::error::ResolveError;
use stratum_config::format::{
    OutputFormat, format_origins_markdown, format_schema_markdown, render,
};
use stratum_config::logging::{self, LogTarget};
use stratum_config::manager::ConfigManager;
use stratum_config::schema::Schema;
use stratum_config::sources::{ArgsSource, EnvSource, FileSource, LoadContext};
use tracing::debug;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let outcome = match cli.command {
        Command::Resolve(args) => run_resolve(args).await,
        Command::Check(args) => run_check(args),
    };

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            for message in err.messages() {
                eprintln!("{}", message);
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

fn cli_format_to_output(format: FormatArg) -> OutputFormat {
    match format {
        FormatArg::Json => OutputFormat::Json,
        FormatArg::Yaml => OutputFormat::Yaml,
    }
}

async fn run_resolve(args: ResolveArgs) -> Result<(), ResolveError> {
    let schema = Schema::from_path(&args.schema)?;

    // Precedence: flags, then environment, then files in the order given
    let mut manager = ConfigManager::new(schema)
        .source(ArgsSource::new())
        .source(EnvSource::with_prefix(args.env_prefix.clone()));
    for file in &args.files {
        manager = manager.source(FileSource::new(file.clone()));
    }

    let ctx = LoadContext::from_process().with_args(args.args.iter().cloned());
    debug!(files = ?args.files, flags = args.args.len(), "Resolving configuration");
    let config = manager.load(&ctx).await?;

    let value = if args.show_secrets {
        config.value().clone()
    } else {
        config.redacted()
    };
    print!("{}", render(&value, cli_format_to_output(args.format))?);
    if args.format == FormatArg::Json {
        println!();
    }
    if args.origins {
        println!();
        print!("{}", format_origins_markdown(&config.origins()));
    }
    Ok(())
}

fn run_check(args: CheckArgs) -> Result<(), ResolveError> {
    let schema = Schema::from_path(&args.schema)?;
    print!("{}", format_schema_markdown(&schema));
    Ok(())
}
