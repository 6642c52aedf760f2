// Startup configuration. Supports an optional TOML file (named by
// `OTHERNET_CONFIG`, defaulting to `config.toml`), layered under raw
// environment variables so a bare `NODE_ID=...` deployment still works
// unmodified.

use std::env::var;

use serde::Deserialize;

use crate::address::Capabilities;
use crate::error::{OthernetError, OthernetResult};

#[derive(Deserialize, Debug, Default)]
pub struct FileConfig {
    #[serde(rename(deserialize = "General"))]
    pub general: Option<General>,
}

#[derive(Deserialize, Debug, Default)]
pub struct General {
    pub bind_address: Option<String>,
    pub node_ip: Option<String>,
    pub realm: Option<u16>,
    pub cluster: Option<u16>,
    pub node_id: Option<u32>,
    pub max_peers: Option<usize>,
    pub bootstrap: Option<Vec<String>>,
    pub peer_addresses: Option<Vec<String>>,
    pub capabilities: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_port: u16,
    pub node_ip: String,
    pub realm: u16,
    pub cluster: u16,
    pub node_id: u32,
    pub max_peers: usize,
    pub bootstrap: Vec<(String, u16)>,
    pub peer_addresses: Vec<(String, u16)>,
    pub capabilities: Capabilities,
}

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_MAX_PEERS: usize = 50;

impl Config {
    /// Load configuration: start from an optional TOML file, then let the
    /// environment variables named in the external interfaces section
    /// override/augment it. `NODE_ID` is required, from either source;
    /// startup fails with `EnvMissing` if neither supplies it.
    pub fn load() -> OthernetResult<Self> {
        let file = Self::load_file()?.unwrap_or_default();
        let general = file.general.unwrap_or_default();

        let bind_port = var("LISTEN_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .or_else(|| {
                general
                    .bind_address
                    .as_deref()
                    .and_then(|addr| addr.rsplit(':').next())
                    .and_then(|p| p.parse().ok())
            })
            .unwrap_or(DEFAULT_PORT);

        let node_ip = var("NODE_IP")
            .ok()
            .or(general.node_ip)
            .unwrap_or_else(|| "0.0.0.0".to_string());

        let node_id = var("NODE_ID")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(general.node_id)
            .ok_or_else(|| OthernetError::EnvMissing("NODE_ID".to_string()))?;

        let max_peers = general.max_peers.unwrap_or(DEFAULT_MAX_PEERS);

        let bootstrap = match var("BOOTSTRAP_ADDRESS") {
            Ok(v) => parse_addr_list(&v)?,
            Err(_) => match general.bootstrap {
                Some(list) => parse_addr_list(&list.join(","))?,
                None => Vec::new(),
            },
        };

        let peer_addresses = match var("PEER_ADDRESSES") {
            Ok(v) => parse_addr_list(&v)?,
            Err(_) => match general.peer_addresses {
                Some(list) => parse_addr_list(&list.join(","))?,
                None => Vec::new(),
            },
        };

        let capabilities = Capabilities::from_bits_truncate(
            general
                .capabilities
                .unwrap_or((Capabilities::HOLDING | Capabilities::ROUTING).bits()),
        );

        Ok(Self {
            bind_port,
            node_ip,
            realm: general.realm.unwrap_or(1),
            cluster: general.cluster.unwrap_or(1),
            node_id,
            max_peers,
            bootstrap,
            peer_addresses,
            capabilities,
        })
    }

    /// `Ok(None)` when the config file is absent (a bare env-var deployment
    /// is valid); `Err(TomlError)` when it exists but fails to parse, so a
    /// broken config file surfaces as a startup failure instead of silently
    /// falling back to defaults.
    fn load_file() -> OthernetResult<Option<FileConfig>> {
        let path = var("OTHERNET_CONFIG").unwrap_or_else(|_| "config.toml".to_string());

        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(_) => return Ok(None),
        };

        Ok(Some(toml::from_slice(&contents)?))
    }
}

fn parse_addr_list(raw: &str) -> OthernetResult<Vec<(String, u16)>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|entry| {
            let (ip, port) = entry
                .rsplit_once(':')
                .ok_or_else(|| OthernetError::InvalidConfig(format!("bad address {}", entry)))?;

            Ok((ip.to_string(), port.parse()?))
        })
        .collect()
}
