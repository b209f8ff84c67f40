use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "confluence",
    about = "Confluence — live aggregate views over keyed collections",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Replay a scenario against an aggregate view
    Run(RunArgs),
    /// Validate a scenario without replaying it
    Check(CheckArgs),
}

#[derive(Args)]
pub struct RunArgs {
    /// Scenario file (.toml or .json)
    pub scenario: PathBuf,
    /// Only print the final view
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct CheckArgs {
    /// Scenario file (.toml or .json)
    pub scenario: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_with_global_flags() {
        let cli = Cli::try_parse_from(["confluence", "run", "demo.toml", "--format", "json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.scenario, PathBuf::from("demo.toml"));
                assert!(!args.quiet);
            }
            Command::Check(_) => panic!("expected run"),
        }
    }

    #[test]
    fn parses_check() {
        let cli = Cli::try_parse_from(["confluence", "check", "demo.json"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Text));
        assert!(matches!(cli.command, Command::Check(_)));
    }

    #[test]
    fn rejects_unknown_format() {
        assert!(Cli::try_parse_from(["confluence", "--format", "yaml", "check", "x.toml"]).is_err());
    }
}
