use std::fmt;
use std::str::FromStr;

use crate::error::{OthernetError, OthernetResult};

/// Logical node address, independent of transport.
///
/// Printed and parsed as `realm.cluster.node_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogicalAddress {
    pub realm: u16,
    pub cluster: u16,
    pub node_id: u32,
}

impl LogicalAddress {
    pub fn new(realm: u16, cluster: u16, node_id: u32) -> Self {
        Self {
            realm,
            cluster,
            node_id,
        }
    }
}

impl fmt::Display for LogicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.realm, self.cluster, self.node_id)
    }
}

impl FromStr for LogicalAddress {
    type Err = OthernetError;

    fn from_str(s: &str) -> OthernetResult<Self> {
        let mut parts = s.splitn(3, '.');

        let realm = parts
            .next()
            .ok_or_else(|| OthernetError::DecodeFailed(s.to_string()))?
            .parse()?;
        let cluster = parts
            .next()
            .ok_or_else(|| OthernetError::DecodeFailed(s.to_string()))?
            .parse()?;
        let node_id = parts
            .next()
            .ok_or_else(|| OthernetError::DecodeFailed(s.to_string()))?
            .parse()?;

        Ok(Self::new(realm, cluster, node_id))
    }
}

bitflags::bitflags! {
    /// Bitset of capabilities a peer may advertise.
    #[derive(Default)]
    pub struct Capabilities: u32 {
        const HOLDING = 0x01;
        const ROUTING = 0x02;
        const GATEWAY = 0x04;
    }
}

/// Transport-level tuple used to key peers in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Transport {
    pub ip: String,
    pub port: u16,
}

impl Transport {
    pub fn new<S: Into<String>>(ip: S, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
