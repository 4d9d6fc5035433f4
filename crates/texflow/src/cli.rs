use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gpucontext::BackendPreference;

#[derive(Parser, Debug)]
#[command(
    name = "texflow",
    author,
    version,
    about = "Run GPU frame pipelines described in TOML"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build the pipeline from a config file, capture frames and exit.
    Run(RunArgs),
    /// Bring up a device and print what it supports.
    Probe(ProbeArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Pipeline description (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    pub config: PathBuf,

    /// Directory receiving captured PNGs.
    #[arg(long, short = 'o', value_name = "DIR", default_value = ".")]
    pub output: PathBuf,

    /// Override the backend named in the config (`auto`, `wgpu`, `software`).
    #[arg(long, value_name = "BACKEND", env = "TEXFLOW_BACKEND", value_parser = parse_backend)]
    pub backend: Option<BackendPreference>,
}

#[derive(Parser, Debug)]
pub struct ProbeArgs {
    #[arg(long, value_name = "BACKEND", default_value = "auto", value_parser = parse_backend)]
    pub backend: BackendPreference,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_backend(value: &str) -> Result<BackendPreference, String> {
    if value.trim().is_empty() {
        return Err("backend must not be empty".to_string());
    }
    value.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_arguments() {
        let cli = Cli::try_parse_from([
            "texflow",
            "run",
            "--config",
            "pipeline.toml",
            "--output",
            "frames",
            "--backend",
            "cpu",
        ])
        .unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.config, PathBuf::from("pipeline.toml"));
        assert_eq!(args.output, PathBuf::from("frames"));
        assert_eq!(args.backend, Some(BackendPreference::Software));
    }

    #[test]
    fn probe_defaults_to_auto() {
        let cli = Cli::try_parse_from(["texflow", "probe"]).unwrap();
        let Command::Probe(args) = cli.command else {
            panic!("expected probe command");
        };
        assert_eq!(args.backend, BackendPreference::Auto);
    }

    #[test]
    fn rejects_unknown_backend() {
        assert!(parse_backend("metal").is_err());
        assert!(parse_backend(" ").is_err());
    }
}
