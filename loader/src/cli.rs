use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

/// Map a 32-bit ELF executable into this process and call its entry point.
#[derive(Parser, Debug)]
#[command(name = "elfload", version, about)]
pub struct Cli {
    /// Path to the 32-bit ELF executable.
    #[arg(value_name = "ELF_FILE")]
    pub path: PathBuf,

    /// Diagnostic verbosity on stderr (off, error, warn, info, debug, trace).
    #[arg(long, env = "ELFLOAD_LOG", default_value = "warn")]
    pub log_level: LevelFilter,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_path_is_accepted() {
        let cli = Cli::try_parse_from(["elfload", "prog.elf"]).unwrap();
        assert_eq!(cli.path, PathBuf::from("prog.elf"));
    }

    #[test]
    fn log_level_flag_parses() {
        let cli = Cli::try_parse_from(["elfload", "--log-level", "debug", "prog.elf"]).unwrap();
        assert_eq!(cli.log_level, LevelFilter::Debug);
    }

    #[test]
    fn missing_path_is_usage_error() {
        let err = Cli::try_parse_from(["elfload"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn extra_path_is_usage_error() {
        let err = Cli::try_parse_from(["elfload", "a.elf", "b.elf"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::UnknownArgument);
    }
}
