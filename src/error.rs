// Othernet - P2P messaging node with store-and-forward holding over a
// line-oriented TCP protocol.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OthernetError {
    #[error("IO error {0}")]
    IoError(#[from] std::io::Error),

    #[error("Required environment variable missing: {0}")]
    EnvMissing(String),

    #[error("Bind failed: {0}")]
    BindFailed(std::io::Error),

    #[error("Accept failed: {0}")]
    AcceptFailed(std::io::Error),

    #[error("Send failed to {0}:{1}: {2}")]
    SendFailed(String, u16, std::io::Error),

    #[error("Connect failed to {0}:{1}: {2}")]
    ConnectFailed(String, u16, std::io::Error),

    #[error("Failed to decode line: {0}")]
    DecodeFailed(String),

    #[error("Registry is full (capacity {0})")]
    RegistryFull(usize),

    #[error("Held store is at capacity ({0})")]
    CapacityExceeded(usize),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Toml parse error {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Unable to parse int {0}")]
    InvalidInt(#[from] std::num::ParseIntError),
}

pub type OthernetResult<T> = std::result::Result<T, OthernetError>;
