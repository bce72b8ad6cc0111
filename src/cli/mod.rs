//! CLI command definitions for stratum
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Output format for resolved configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FormatArg {
    #[default]
    Json,
    Yaml,
}

/// Resolve layered configuration against a schema
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve configuration from args, env and files
    Resolve(ResolveArgs),

    /// Parse a schema file and list its fields
    Check(CheckArgs),
}

/// Arguments for the resolve subcommand
#[derive(Args, Debug)]
pub struct ResolveArgs {
    /// Schema file (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub schema: PathBuf,

    /// Configuration file; repeat for more, earlier files win
    #[arg(short, long = "file", value_name = "FILE")]
    pub files: Vec<String>,

    /// Prefix for derived environment variable names
    #[arg(long, default_value = "")]
    pub env_prefix: String,

    /// Output format
    #[arg(long, value_enum, default_value_t = FormatArg::Json)]
    pub format: FormatArg,

    /// Also print a table of where each value came from
    #[arg(long)]
    pub origins: bool,

    /// Print secret values instead of redacting them
    #[arg(long)]
    pub show_secrets: bool,

    /// Configuration flags, e.g. `-- --server.port=8080`
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

/// Arguments for the check subcommand
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Schema file (YAML or JSON)
    #[arg(short, long, value_name = "FILE")]
    pub schema: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_arguments() {
        let cli = Cli::parse_from([
            "stratum",
            "resolve",
            "--schema",
            "schema.yaml",
            "-f",
            "local.yaml",
            "-f",
            "base.yaml",
            "--env-prefix",
            "APP_",
            "--format",
            "yaml",
            "--origins",
            "--",
            "--server.port=9000",
        ]);
        let Command::Resolve(args) = cli.command else {
            panic!("expected resolve");
        };
        assert_eq!(args.files, vec!["local.yaml", "base.yaml"]);
        assert_eq!(args.env_prefix, "APP_");
        assert_eq!(args.format, FormatArg::Yaml);
        assert!(args.origins);
        assert!(!args.show_secrets);
        assert_eq!(args.args, vec!["--server.port=9000"]);
        assert_eq!(cli.log, "2");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["stratum", "check", "-s", "schema.yaml", "--log", "off", "-v"]);
        assert!(cli.verbose);
        assert_eq!(cli.log, "off");
        assert!(matches!(cli.command, Command::Check(_)));
    }
}
