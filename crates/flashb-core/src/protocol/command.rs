//! Logical firmware commands and their board-specific opcodes.
//!
//! Every board assigns its own opcode bytes to the firmware commands, so
//! the mapping is loaded from configuration once and then shared read-only.

use std::fmt;

/// Logical firmware protocol operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Query the running firmware version.
    Version,
    /// Send one block of firmware.
    Chunk,
    /// Query the next address the device expects.
    NextAddress,
    /// Read back the received image CRC. Defined by the device, unused here.
    Crcr,
    /// Switch to the newly received firmware.
    Confirm,
}

impl Command {
    pub const COUNT: usize = 5;

    pub const ALL: [Command; Self::COUNT] = [
        Command::Version,
        Command::Chunk,
        Command::NextAddress,
        Command::Crcr,
        Command::Confirm,
    ];

    /// Key naming this command in a board's configuration section.
    pub fn config_key(&self) -> &'static str {
        match self {
            Command::Version => "cmd_fw_ver",
            Command::Chunk => "cmd_fw_chunk",
            Command::NextAddress => "cmd_fw_next",
            Command::Crcr => "cmd_fw_crcr",
            Command::Confirm => "cmd_fw_confirm",
        }
    }

    fn index(&self) -> usize {
        match self {
            Command::Version => 0,
            Command::Chunk => 1,
            Command::NextAddress => 2,
            Command::Crcr => 3,
            Command::Confirm => 4,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Version => write!(f, "FW_VER"),
            Command::Chunk => write!(f, "FW_CHUNK"),
            Command::NextAddress => write!(f, "FW_NEXT"),
            Command::Crcr => write!(f, "FW_CRCR"),
            Command::Confirm => write!(f, "FW_CONFIRM"),
        }
    }
}

/// Opcode byte for each [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTable {
    opcodes: [u8; Command::COUNT],
}

impl CommandTable {
    pub fn new(version: u8, chunk: u8, next_address: u8, crcr: u8, confirm: u8) -> Self {
        Self {
            opcodes: [version, chunk, next_address, crcr, confirm],
        }
    }

    /// Build a table by asking `lookup` for every command in turn.
    pub fn try_from_fn<E>(mut lookup: impl FnMut(Command) -> Result<u8, E>) -> Result<Self, E> {
        let mut opcodes = [0u8; Command::COUNT];
        for cmd in Command::ALL {
            opcodes[cmd.index()] = lookup(cmd)?;
        }
        Ok(Self { opcodes })
    }

    pub fn opcode(&self, cmd: Command) -> u8 {
        self.opcodes[cmd.index()]
    }
}
