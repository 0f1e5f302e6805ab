//! Helix demo client
//!
//! Provisions an account on the key server, sends a message or file to it,
//! and decrypts it again.
//!
//! # Usage
//!
//! ```bash
//! helix-demo -s 10.0.0.5 -m "hello"
//! helix-demo -s 10.0.0.5 -p 8886 -u HELIX-RUST -f notes.txt --password hunter2
//! helix-demo --config client.json --log-level debug
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use helix_client::config::{ClientConfig, DEFAULT_LOOKUP_TIMEOUT_MS, DEFAULT_PORT, DEFAULT_USERNAME, MIN_PORT};
use helix_client::demo;
use helix_client::directory::MemoryDirectory;
use helix_client::INTERFACE_VERSION;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Helix demo client
#[derive(Parser, Debug)]
#[command(name = "helix-demo")]
#[command(about = "Round-trips a message through recipient encryption", long_about = None)]
struct Args {
    /// Key server address
    #[arg(short, long, required_unless_present = "config")]
    server: Option<String>,

    /// Key server port
    #[arg(short, long, default_value_t = DEFAULT_PORT, value_parser = clap::value_parser!(u16).range(MIN_PORT as i64..))]
    port: u16,

    /// Account to provision and send to
    #[arg(short, long, default_value = DEFAULT_USERNAME)]
    username: String,

    /// Message to encrypt
    #[arg(short, long, required_unless_present_any = ["file", "config"])]
    message: Option<String>,

    /// File to encrypt; takes precedence over --message
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Password layered over recipient encryption
    #[arg(long)]
    password: Option<String>,

    /// Recipient lookup deadline in milliseconds
    #[arg(long, default_value_t = DEFAULT_LOOKUP_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Append JSON-lines journal records to this file
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Load settings from a JSON file instead of flags
    #[arg(long, conflicts_with_all = ["server", "message", "file"])]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<ClientConfig, helix_client::config::ConfigError> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::from_json_file(path)?,
            None => {
                let mut config = ClientConfig::new(self.server.unwrap_or_default());
                config.port = self.port;
                config.username = self.username;
                config.message = self.message;
                config.file = self.file;
                config.lookup_timeout_ms = self.timeout_ms;
                config
            },
        };
        if self.password.is_some() {
            config.password = self.password;
        }
        if self.journal.is_some() {
            config.journal = self.journal;
        }
        config.validate()?;
        Ok(config)
    }
}

/// The one place the interface version is reported.
fn banner() -> String {
    format!("Helix client interface version {INTERFACE_VERSION}")
}

#[tokio::main]
async fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = if err.use_stderr() { 1 } else { 0 };
            let _ = err.print();
            std::process::exit(code);
        },
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    println!("{}", banner());

    let config = match args.into_config() {
        Ok(config) => config,
        Err(err) => {
            error!("Invalid configuration: {err}");
            std::process::exit(1);
        },
    };

    match demo::run(&config, Arc::new(MemoryDirectory::new())).await {
        Ok(report) => {
            info!(
                recipient = %report.recipient,
                plaintext = report.plaintext_len,
                ciphertext = report.ciphertext_len,
                "demo complete"
            );
        },
        Err(err) => {
            error!(step = %err.step(), "{err}");
            std::process::exit(1);
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_and_file_may_both_be_given() {
        let args = Args::try_parse_from(["helix-demo", "-s", "h", "-m", "hi", "-f", "x.txt"]).unwrap();
        let config = args.into_config().unwrap();
        assert_eq!(config.message.as_deref(), Some("hi"));
        assert_eq!(config.file, Some(PathBuf::from("x.txt")));
    }

    #[test]
    fn banner_reports_interface_version() {
        assert!(banner().ends_with(&format!("version {INTERFACE_VERSION}")));
    }

    #[test]
    fn payload_is_required_without_config() {
        assert!(Args::try_parse_from(["helix-demo", "-s", "h"]).is_err());
    }

    #[test]
    fn low_port_is_rejected() {
        assert!(Args::try_parse_from(["helix-demo", "-s", "h", "-m", "hi", "-p", "80"]).is_err());
    }
}
