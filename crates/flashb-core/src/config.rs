//! Configuration: the TOML file and the protocol settings derived from it.
//!
//! ```toml
//! [i2c]
//! device = "/dev/i2c-0"
//!
//! [boards.motor]
//! address = 0x0f
//! bottom = "c000"
//! top = 0xe000
//! cmd_fw_ver = 4
//! cmd_fw_chunk = 5
//! cmd_fw_next = 6
//! cmd_fw_crcr = 7
//! cmd_fw_confirm = 8
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::protocol::{Command, CommandTable, DEFAULT_TIMEOUT_MS};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config from '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("{0} group not found in config file")]
    MissingSection(String),
    #[error("{board} board has no {key} defined")]
    MissingKey { board: String, key: String },
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("Bottom address 0x{bottom:04X} must be below top address 0x{top:04X}")]
    AddressOrder { bottom: u16, top: u16 },
}

/// A number written either as a TOML integer or as a hex string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HexValue {
    Int(i64),
    Text(String),
}

impl HexValue {
    fn parse(&self, key: &str, max: u64) -> Result<u64, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: key.to_string(),
            value: self.to_string(),
            reason: reason.to_string(),
        };
        let value = match self {
            HexValue::Int(v) => u64::try_from(*v).map_err(|_| invalid("negative"))?,
            HexValue::Text(s) => {
                let digits = s.trim();
                let digits = digits
                    .strip_prefix("0x")
                    .or_else(|| digits.strip_prefix("0X"))
                    .unwrap_or(digits);
                u64::from_str_radix(digits, 16).map_err(|_| invalid("not a hex number"))?
            }
        };
        if value > max {
            return Err(invalid(&format!("exceeds 0x{:X}", max)));
        }
        Ok(value)
    }
}

impl std::fmt::Display for HexValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HexValue::Int(v) => write!(f, "{}", v),
            HexValue::Text(s) => f.write_str(s),
        }
    }
}

/// `[i2c]` group.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BusSection {
    /// Path of the bus device node.
    pub device: Option<String>,
    /// Per-transaction timeout.
    pub timeout_ms: Option<u64>,
}

/// Contents of the configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlashConfig {
    #[serde(default)]
    pub i2c: Option<BusSection>,
    /// Per-board keys (`address`, `bottom`, `top`, `cmd_fw_*`).
    #[serde(default)]
    pub boards: BTreeMap<String, BTreeMap<String, HexValue>>,
}

impl FlashConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Bus device node from the `[i2c]` group.
    pub fn bus_device(&self) -> Result<&str, ConfigError> {
        self.i2c
            .as_ref()
            .ok_or_else(|| ConfigError::MissingSection("i2c".into()))?
            .device
            .as_deref()
            .ok_or_else(|| ConfigError::MissingKey {
                board: "i2c".into(),
                key: "device".into(),
            })
    }

    fn board(&self, name: &str) -> Result<&BTreeMap<String, HexValue>, ConfigError> {
        self.boards
            .get(name)
            .ok_or_else(|| ConfigError::MissingSection(name.to_string()))
    }

    fn board_value(&self, name: &str, key: &str, max: u64) -> Result<u64, ConfigError> {
        self.board(name)?
            .get(key)
            .ok_or_else(|| ConfigError::MissingKey {
                board: name.to_string(),
                key: key.to_string(),
            })?
            .parse(&format!("{}.{}", name, key), max)
    }

    /// Bus address of the named board.
    pub fn board_address(&self, name: &str) -> Result<u8, ConfigError> {
        Ok(self.board_value(name, "address", u8::MAX as u64)? as u8)
    }

    /// Build the protocol settings for the named board.
    pub fn protocol_config(&self, name: &str) -> Result<ProtocolConfig, ConfigError> {
        let commands = CommandTable::try_from_fn(|cmd: Command| {
            Ok::<u8, ConfigError>(self.board_value(name, cmd.config_key(), u8::MAX as u64)? as u8)
        })?;
        let bottom = self.board_value(name, "bottom", u16::MAX as u64)? as u16;
        let top = self.board_value(name, "top", u16::MAX as u64)? as u16;
        let timeout_ms = self
            .i2c
            .as_ref()
            .and_then(|bus| bus.timeout_ms)
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        ProtocolConfig::new(name, commands, bottom, top, Duration::from_millis(timeout_ms))
    }
}

/// Everything the transfer engine needs to speak to one board type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub board: String,
    pub commands: CommandTable,
    /// Text address of the bottom image.
    pub bottom_address: u16,
    /// Text address of the top image.
    pub top_address: u16,
    /// Wait window for each transaction.
    pub timeout: Duration,
}

impl ProtocolConfig {
    pub fn new(
        board: impl Into<String>,
        commands: CommandTable,
        bottom_address: u16,
        top_address: u16,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if bottom_address >= top_address {
            return Err(ConfigError::AddressOrder {
                bottom: bottom_address,
                top: top_address,
            });
        }
        Ok(Self {
            board: board.into(),
            commands,
            bottom_address,
            top_address,
            timeout,
        })
    }

    pub fn opcode(&self, cmd: Command) -> u8 {
        self.commands.opcode(cmd)
    }
}
