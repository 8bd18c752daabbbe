//! Configuration file
//!
//! The service reads one JSON document with a section per protocol:
//!
//! ```json
//! {
//!   "TFTP": { "IsEnable": true, "Address": ":69", "SrvDir": "/srv/tftp" },
//!   "DHCP": { "IsEnable": true, "Address": ":67", "FileName": "pxelinux.0",
//!             "RangeStart": "10.0.1.100/24", "DefaultRouter": "10.0.1.1",
//!             "DNS": "10.0.1.1" },
//!   "HTTP": { "IsEnable": false, "Address": ":80", "SrvDir": "/srv/http" }
//! }
//! ```
//!
//! Addresses may omit the host (`":69"`), meaning all interfaces.
//! [`Config::validate`] turns the raw document into [`ServicesConfig`].

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tao_tftp::TftpConfig;
use thiserror::Error;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tao/tao.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{section}.{field}: invalid address {value:?}")]
    InvalidAddress {
        section: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("DHCP.RangeStart: {value:?} is not an IPv4 CIDR")]
    InvalidRange { value: String },

    #[error("TFTP.SrvDir: {0} is not a directory")]
    MissingServeDir(PathBuf),

    #[error("neither TFTP nor DHCP is enabled")]
    NothingEnabled,
}

/// The configuration file as written on disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "TFTP", default)]
    pub tftp: TftpSection,
    #[serde(rename = "DHCP", default)]
    pub dhcp: DhcpSection,
    /// Parsed so existing files load; nothing serves it
    #[serde(rename = "HTTP", default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TftpSection {
    pub is_enable: bool,
    pub address: String,
    pub srv_dir: PathBuf,
    /// Seconds to wait for an ACK before retransmitting
    pub timeout: u64,
    pub max_retries: u32,
}

impl Default for TftpSection {
    fn default() -> Self {
        Self {
            is_enable: false,
            address: ":69".to_string(),
            srv_dir: PathBuf::from("/srv/tftp"),
            timeout: 5,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DhcpSection {
    pub is_enable: bool,
    pub address: String,
    /// Boot file offered to PXE clients
    pub file_name: String,
    /// Lease range as CIDR; allocation starts at the written address
    pub range_start: String,
    pub default_router: String,
    /// One address, or several separated by commas
    #[serde(rename = "DNS")]
    pub dns: String,
    /// Overrides the detected server identifier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Ipv4Addr>,
    /// Lease time in seconds
    pub lease_time: u32,
}

impl Default for DhcpSection {
    fn default() -> Self {
        Self {
            is_enable: false,
            address: ":67".to_string(),
            file_name: String::new(),
            range_start: String::new(),
            default_router: String::new(),
            dns: String::new(),
            server_id: None,
            lease_time: tao_dhcp::DEFAULT_LEASE_TIME,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HttpSection {
    pub is_enable: bool,
    pub address: String,
    pub srv_dir: PathBuf,
}

/// Validated settings for the engines that are enabled
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub tftp: Option<TftpServiceConfig>,
    pub dhcp: Option<DhcpServiceConfig>,
}

#[derive(Debug, Clone)]
pub struct TftpServiceConfig {
    pub server: TftpConfig,
    pub srv_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DhcpServiceConfig {
    pub bind_addr: SocketAddrV4,
    pub lease_range: Ipv4Network,
    pub router: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
    pub boot_filename: Option<String>,
    pub server_id: Option<Ipv4Addr>,
    pub lease_time: u32,
}

impl Config {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    /// Check every enabled section and build the engine settings
    pub fn validate(&self) -> Result<ServicesConfig, ConfigError> {
        let tftp = self
            .tftp
            .is_enable
            .then(|| self.tftp.validate())
            .transpose()?;
        let dhcp = self
            .dhcp
            .is_enable
            .then(|| self.dhcp.validate())
            .transpose()?;

        if tftp.is_none() && dhcp.is_none() {
            return Err(ConfigError::NothingEnabled);
        }

        Ok(ServicesConfig { tftp, dhcp })
    }
}

impl TftpSection {
    fn validate(&self) -> Result<TftpServiceConfig, ConfigError> {
        let bind_addr = parse_listen_addr("TFTP", &self.address)?;
        if !self.srv_dir.is_dir() {
            return Err(ConfigError::MissingServeDir(self.srv_dir.clone()));
        }

        Ok(TftpServiceConfig {
            server: TftpConfig::new(SocketAddr::V4(bind_addr))
                .with_timeout(Duration::from_secs(self.timeout.max(1)))
                .with_max_retries(self.max_retries),
            srv_dir: self.srv_dir.clone(),
        })
    }
}

impl DhcpSection {
    fn validate(&self) -> Result<DhcpServiceConfig, ConfigError> {
        let bind_addr = parse_listen_addr("DHCP", &self.address)?;

        let lease_range = self
            .range_start
            .trim()
            .parse::<Ipv4Network>()
            .map_err(|_| ConfigError::InvalidRange {
                value: self.range_start.clone(),
            })?;

        let router = match self.default_router.trim() {
            "" => None,
            value => Some(parse_ipv4("DefaultRouter", value)?),
        };

        let dns_servers = self
            .dns
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| parse_ipv4("DNS", value))
            .collect::<Result<Vec<_>, _>>()?;

        let boot_filename = Some(self.file_name.trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        Ok(DhcpServiceConfig {
            bind_addr,
            lease_range,
            router,
            dns_servers,
            boot_filename,
            server_id: self.server_id,
            lease_time: self.lease_time,
        })
    }
}

fn parse_ipv4(field: &'static str, value: &str) -> Result<Ipv4Addr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddress {
        section: "DHCP",
        field,
        value: value.to_string(),
    })
}

/// `host:port`, or `:port` for all IPv4 interfaces
fn parse_listen_addr(section: &'static str, value: &str) -> Result<SocketAddrV4, ConfigError> {
    let value = value.trim();
    let candidate = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{}", port),
        None => value.to_string(),
    };

    candidate
        .parse::<SocketAddrV4>()
        .map_err(|_| ConfigError::InvalidAddress {
            section,
            field: "Address",
            value: value.to_string(),
        })
}
