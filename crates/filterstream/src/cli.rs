//! Command-line options

use clap::Parser;
use filterstream_core::ServerConfig;
use std::ffi::OsString;
use std::time::Duration;

/// Mock server for the legacy statuses/filter streaming endpoint
#[derive(Debug, Parser)]
#[command(name = "filterstream", version, about, long_about = None)]
pub struct Cli {
    /// HTTP server address
    #[arg(long, default_value = ":8080")]
    pub addr: String,

    /// Time open streams get to finish on shutdown, in milliseconds
    #[arg(long = "grace-ms", default_value_t = 2000)]
    pub grace_ms: u64,

    /// Runtime worker threads [default: number of CPUs]
    #[arg(long)]
    pub workers: Option<usize>,
}

impl Cli {
    /// Parse the process arguments, accepting `-addr` style flags
    pub fn parse_args() -> Self {
        Self::parse_from(normalize_flags(std::env::args_os()))
    }

    pub fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::new(self.addr)
            .shutdown_grace(Duration::from_millis(self.grace_ms));
        if let Some(workers) = self.workers {
            config = config.workers(workers);
        }
        config
    }
}

/// Rewrite single-dash long flags (`-addr x`, `-addr=x`) to `--addr`.
///
/// Short flags such as `-h` and everything after `--` are left alone.
pub fn normalize_flags<I>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = OsString>,
{
    let mut out = Vec::new();
    let mut passthrough = false;

    for (i, arg) in args.into_iter().enumerate() {
        if i == 0 || passthrough {
            out.push(arg);
            continue;
        }

        match arg.to_str() {
            Some("--") => {
                passthrough = true;
                out.push(arg);
            }
            Some(s) if s.len() > 2 && s.starts_with('-') && !s.starts_with("--") => {
                out.push(OsString::from(format!("-{s}")));
            }
            _ => out.push(arg),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let args = std::iter::once("filterstream")
            .chain(args.iter().copied())
            .map(OsString::from);
        Cli::parse_from(normalize_flags(args))
    }

    #[test]
    fn test_default_addr() {
        let cli = parse(&[]);
        assert_eq!(cli.addr, ":8080");
        assert_eq!(cli.grace_ms, 2000);
        assert_eq!(cli.workers, None);
    }

    #[test]
    fn test_single_dash_addr() {
        assert_eq!(parse(&["-addr", "127.0.0.1:9000"]).addr, "127.0.0.1:9000");
        assert_eq!(parse(&["-addr=:9001"]).addr, ":9001");
    }

    #[test]
    fn test_double_dash_addr() {
        assert_eq!(parse(&["--addr", "localhost:1234"]).addr, "localhost:1234");
    }

    #[test]
    fn test_into_config() {
        let config = parse(&["-addr", ":7000", "-grace-ms", "500", "--workers", "2"]).into_config();
        assert_eq!(config.addr, ":7000");
        assert_eq!(config.shutdown_grace, Duration::from_millis(500));
        assert_eq!(config.workers, 2);
    }

    #[test]
    fn test_normalize_leaves_short_flags() {
        let args = ["prog", "-h", "-addr", "x", "--", "-keep"].map(OsString::from);
        let out = normalize_flags(args);
        assert_eq!(out, ["prog", "-h", "--addr", "x", "--", "-keep"].map(OsString::from));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let args = ["filterstream", "-port", "80"].map(OsString::from);
        assert!(Cli::try_parse_from(normalize_flags(args)).is_err());
    }
}
