//! CLI surface for typefig.
//!
//! One optional positional argument (a shell command line to run after each
//! successful rebuild) plus flags for verbose print-before-write and watch
//! mode.

use clap::Parser;
use std::path::PathBuf;

/// Generate and maintain project config files from typed definitions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Command to run after each successful rebuild. Ex: `typefig -w "npm start"`
    pub command: Option<String>,

    /// Print the merged config before writing
    #[arg(short, long)]
    pub verbose: bool,

    /// Re-run when a typefig.yaml file changes
    #[arg(short, long)]
    pub watch: bool,

    /// Directory to scan for definition files
    #[arg(short, long, default_value = ".")]
    pub root: PathBuf,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2")]
    pub log: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_quiet_one_shot() {
        let cli = Cli::parse_from(["typefig"]);
        assert!(cli.command.is_none());
        assert!(!cli.verbose);
        assert!(!cli.watch);
        assert_eq!(cli.root, PathBuf::from("."));
        assert_eq!(cli.log, "2");
    }

    #[test]
    fn positional_command_and_flags_parse() {
        let cli = Cli::parse_from(["typefig", "-w", "-v", "npm start"]);
        assert_eq!(cli.command.as_deref(), Some("npm start"));
        assert!(cli.verbose);
        assert!(cli.watch);
    }
}
