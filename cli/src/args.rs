//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run an external static-analysis language server over a batch of files.
#[derive(Parser, Debug)]
#[command(name = "lintwire", version, disable_help_subcommand = true)]
pub(crate) struct Cli {
    /// Config file to use instead of `~/.lintwire/config.toml`.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) config: Option<PathBuf>,
    /// Turn a rule on. Any use switches to enable-list mode.
    #[arg(long = "enable-rule", global = true, value_name = "RULE")]
    pub(crate) enable_rules: Vec<String>,
    /// Turn a rule off. Wins over any enable.
    #[arg(long = "disable-rule", global = true, value_name = "RULE")]
    pub(crate) disable_rules: Vec<String>,
    /// Append a timestamped protocol trace to this file.
    #[arg(long, global = true, value_name = "PATH")]
    pub(crate) debug_log: Option<PathBuf>,
    /// Log at debug level to stderr (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    pub(crate) verbose: bool,
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Analyze files and print one line per issue.
    Analyze {
        #[arg(value_name = "FILE", required = true)]
        files: Vec<PathBuf>,
    },
    /// List every rule the server knows, with its effective level.
    Rules,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_analyze_with_rule_flags() {
        let cli = Cli::try_parse_from([
            "lintwire",
            "analyze",
            "a.js",
            "b.js",
            "--enable-rule",
            "javascript:S3504",
            "--disable-rule",
            "javascript:S100",
            "--disable-rule",
            "javascript:S1481",
        ])
        .unwrap();

        assert_eq!(cli.enable_rules, ["javascript:S3504"]);
        assert_eq!(cli.disable_rules, ["javascript:S100", "javascript:S1481"]);
        match cli.command {
            CliCommand::Analyze { files } => {
                assert_eq!(files, [PathBuf::from("a.js"), PathBuf::from("b.js")]);
            }
            CliCommand::Rules => panic!("expected analyze"),
        }
    }

    #[test]
    fn analyze_requires_files() {
        assert!(Cli::try_parse_from(["lintwire", "analyze"]).is_err());
    }

    #[test]
    fn global_flags_before_subcommand() {
        let cli = Cli::try_parse_from([
            "lintwire",
            "--config",
            "custom.toml",
            "--debug-log",
            "trace.log",
            "-v",
            "rules",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.debug_log, Some(PathBuf::from("trace.log")));
        assert!(cli.verbose);
        assert!(matches!(cli.command, CliCommand::Rules));
    }
}
