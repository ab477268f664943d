use crate::error::TransportError;

use std::fs::read_to_string;
use std::net::IpAddr;

use clap::Parser;
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone, Copy)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_level(&self) -> log::Level {
        match *self {
            Self::Error => log::Level::Error,
            Self::Warn => log::Level::Warn,
            Self::Info => log::Level::Info,
            Self::Debug => log::Level::Debug,
            Self::Trace => log::Level::Trace,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Log {
    #[serde(default)]
    pub level: LogLevel,
}

/// The interface/address allow- and block-lists of spec.md §4.1 and the
/// bind-retry/IO-thread/buffer knobs of §4.5/§4.6.
#[derive(Deserialize, Debug, Clone)]
pub struct Runtime {
    #[serde(default)]
    pub allowed_interfaces: Vec<String>,
    #[serde(default)]
    pub blocked_interfaces: Vec<String>,
    #[serde(default)]
    pub allowed_addresses: Vec<IpAddr>,
    #[serde(default)]
    pub blocked_addresses: Vec<IpAddr>,
    #[serde(default)]
    pub disable_ipv6: bool,
    #[serde(default)]
    pub disable_link_local_addresses: bool,
    #[serde(default = "Runtime::bind_retries")]
    pub bind_retries: u32,
    #[serde(default = "Runtime::io_threads")]
    pub io_threads: usize,
    #[serde(default)]
    pub send_buffer: Option<usize>,
    #[serde(default)]
    pub receive_buffer: Option<usize>,
}

impl Runtime {
    fn bind_retries() -> u32 {
        10
    }

    fn io_threads() -> usize {
        num_cpus::get()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            allowed_interfaces: Vec::new(),
            blocked_interfaces: Vec::new(),
            allowed_addresses: Vec::new(),
            blocked_addresses: Vec::new(),
            disable_ipv6: false,
            disable_link_local_addresses: false,
            bind_retries: Self::bind_retries(),
            io_threads: Self::io_threads(),
            send_buffer: None,
            receive_buffer: None,
        }
    }
}

/// The transport acceptor options of spec.md §4.5.
#[derive(Deserialize, Debug, Clone)]
pub struct Acceptor {
    #[serde(default = "Acceptor::reuse_address")]
    pub reuse_address: bool,
    #[serde(default = "Acceptor::tcp_no_delay")]
    pub tcp_no_delay: bool,
    #[serde(default = "Acceptor::backlog")]
    pub backlog: u32,
    #[serde(default)]
    pub close_on_deactivation: bool,
}

impl Acceptor {
    fn reuse_address() -> bool {
        true
    }

    fn tcp_no_delay() -> bool {
        true
    }

    fn backlog() -> u32 {
        64
    }
}

impl Default for Acceptor {
    fn default() -> Self {
        Self {
            reuse_address: Self::reuse_address(),
            tcp_no_delay: Self::tcp_no_delay(),
            backlog: Self::backlog(),
            close_on_deactivation: false,
        }
    }
}

/// The demo harvest target the binary gathers host candidates for on
/// startup (spec.md §4.6's `harvest(component, preferredPort, minPort,
/// maxPort, transport)`). A real ICE agent embedding this crate as a
/// library calls `harvester::harvest` directly per-component instead; this
/// section only drives the standalone binary in `main.rs`.
#[derive(Deserialize, Debug, Clone)]
pub struct Harvest {
    #[serde(default = "Harvest::component")]
    pub component: String,
    #[serde(default = "Harvest::preferred_port")]
    pub preferred_port: u16,
    #[serde(default = "Harvest::min_port")]
    pub min_port: u16,
    #[serde(default = "Harvest::max_port")]
    pub max_port: u16,
}

impl Harvest {
    fn component() -> String {
        "default".to_string()
    }

    fn preferred_port() -> u16 {
        49160
    }

    fn min_port() -> u16 {
        49152
    }

    fn max_port() -> u16 {
        49200
    }
}

impl Default for Harvest {
    fn default() -> Self {
        Self {
            component: Self::component(),
            preferred_port: Self::preferred_port(),
            min_port: Self::min_port(),
            max_port: Self::max_port(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub runtime: Runtime,
    #[serde(default)]
    pub acceptor: Acceptor,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub harvest: Harvest,
}

#[derive(Parser)]
#[command(about = "The I/O and demultiplexing core of an ICE agent's transport layer.")]
struct Cli {
    /// specify the configuration file path.
    #[arg(long)]
    config: Option<String>,
}

fn semicolon_list(raw: &str) -> Vec<String> {
    raw.split(';').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect()
}

impl Config {
    /// Loads the configuration file named on the command line (if any),
    /// then overlays the environment variables of spec.md §6, which always
    /// take priority over file-sourced values.
    pub fn load() -> anyhow::Result<Self> {
        let cfg_str = Cli::parse()
            .config
            .map(read_to_string)
            .transpose()?
            .unwrap_or_default();

        let mut config: Self = if cfg_str.trim().is_empty() {
            Self::default()
        } else {
            serde_json5::from_str(&cfg_str).map_err(|e| TransportError::ConfigError(e.to_string()))?
        };

        config.apply_env_overrides()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(raw) = std::env::var("ALLOWED_INTERFACES") {
            self.runtime.allowed_interfaces = semicolon_list(&raw);
        }

        if let Ok(raw) = std::env::var("BLOCKED_INTERFACES") {
            self.runtime.blocked_interfaces = semicolon_list(&raw);
        }

        if let Ok(raw) = std::env::var("ALLOWED_ADDRESSES") {
            self.runtime.allowed_addresses = semicolon_list(&raw)
                .iter()
                .map(|ip| ip.parse())
                .collect::<Result<_, _>>()
                .map_err(|e| TransportError::ConfigError(format!("ALLOWED_ADDRESSES: {e}")))?;
        }

        if let Ok(raw) = std::env::var("BLOCKED_ADDRESSES") {
            self.runtime.blocked_addresses = semicolon_list(&raw)
                .iter()
                .map(|ip| ip.parse())
                .collect::<Result<_, _>>()
                .map_err(|e| TransportError::ConfigError(format!("BLOCKED_ADDRESSES: {e}")))?;
        }

        if let Ok(raw) = std::env::var("DISABLE_IPV6") {
            self.runtime.disable_ipv6 = parse_bool(&raw)?;
        }

        if let Ok(raw) = std::env::var("DISABLE_LINK_LOCAL_ADDRESSES") {
            self.runtime.disable_link_local_addresses = parse_bool(&raw)?;
        }

        if let Ok(raw) = std::env::var("BIND_RETRIES") {
            self.runtime.bind_retries = raw
                .parse()
                .map_err(|_| TransportError::ConfigError("BIND_RETRIES must be an integer".into()))?;
        }

        if let Ok(raw) = std::env::var("IO_THREADS") {
            self.runtime.io_threads = raw
                .parse()
                .map_err(|_| TransportError::ConfigError("IO_THREADS must be an integer".into()))?;
        }

        if let Ok(raw) = std::env::var("SEND_BUFFER") {
            self.runtime.send_buffer =
                Some(raw.parse().map_err(|_| TransportError::ConfigError("SEND_BUFFER must be an integer".into()))?);
        }

        if let Ok(raw) = std::env::var("RECEIVE_BUFFER") {
            self.runtime.receive_buffer = Some(
                raw.parse().map_err(|_| TransportError::ConfigError("RECEIVE_BUFFER must be an integer".into()))?,
            );
        }

        Ok(())
    }

}

fn parse_bool(raw: &str) -> Result<bool, TransportError> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(TransportError::ConfigError(format!("not a boolean: {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_permissive() {
        let config = Config::default();
        assert!(config.runtime.allowed_interfaces.is_empty());
        assert!(config.runtime.blocked_interfaces.is_empty());
        assert_eq!(config.runtime.bind_retries, 10);
    }

    #[test]
    fn semicolon_list_trims_and_skips_empty() {
        assert_eq!(semicolon_list("eth0; wlan0;;"), vec!["eth0", "wlan0"]);
    }
}
