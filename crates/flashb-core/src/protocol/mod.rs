//! Protocol module - firmware command definitions and wire layout.

pub mod command;
pub mod constants;
pub mod frame;

pub use command::{Command, CommandTable};
pub use constants::*;
pub use frame::{ChunkFrame, FrameError, decode_word, encode_word};
