use mona::logging::Severity;
use serde_derive::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_PORT: u16 = 10007;

#[derive(Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: Option<String>,
    pub threads: u16,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> ServerConfig {
        ServerConfig {
            address: Some(format!("127.0.0.1:{}", DEFAULT_PORT)),
            threads: 0,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ServerConfig {
        serdeconv::from_toml_file(path).expect("Error loading server configuration file")
    }

    /// Loads the configuration file when present, otherwise the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> ServerConfig {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            ServerConfig::default()
        }
    }

    pub fn address(&self) -> String {
        match &self.address {
            Some(address) => address.clone(),
            None => format!("127.0.0.1:{}", DEFAULT_PORT),
        }
    }

    pub fn severity(&self) -> Severity {
        match self.log_level.as_str() {
            "trace" => Severity::Trace,
            "debug" => Severity::Debug,
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            "critical" => Severity::Critical,
            _ => Severity::Info,
        }
    }
}
