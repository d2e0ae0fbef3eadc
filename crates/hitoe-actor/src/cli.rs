//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;

use crate::config::CONFIG_PATH_ENV;

#[derive(Parser, Debug)]
#[command(name = "hitoe-actor")]
#[command(about = "Heart-rate actor for hitoe sensors")]
#[command(version)]
pub struct Cli {
    /// Configuration file; must exist when given
    #[arg(short, long, env = CONFIG_PATH_ENV, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_long_config() {
        let cli = Cli::try_parse_from(["hitoe-actor", "--config", "/etc/hitoe/config.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/etc/hitoe/config.toml")));
    }

    #[test]
    fn test_parse_short_config() {
        let cli = Cli::try_parse_from(["hitoe-actor", "-c", "local.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("local.toml")));
    }

    #[test]
    fn test_config_needs_a_value() {
        assert!(Cli::try_parse_from(["hitoe-actor", "--config"]).is_err());
    }

    #[test]
    fn test_unknown_argument_fails() {
        assert!(Cli::try_parse_from(["hitoe-actor", "--verbose"]).is_err());
    }
}
