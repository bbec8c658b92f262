//! Protocol constants for the MSP430 firmware reception protocol.

// ============================================================================
// Block transfer
// ============================================================================

/// Size of one firmware block carried by a chunk command.
pub const CHUNK_SIZE: usize = 16;

/// Filler written after the true end of a section in its final block.
pub const PAD_BYTE: u8 = 0xAA;

/// Chunk header: firmware version (2 bytes LE) + address (2 bytes LE).
pub const CHUNK_HEADER_SIZE: usize = 4;

/// Chunk command payload size (header + block), excluding the opcode.
pub const CHUNK_PAYLOAD_SIZE: usize = CHUNK_HEADER_SIZE + CHUNK_SIZE;

/// Firmware version field carried by in-progress chunk sends.
pub const CHUNK_FW_VERSION: u16 = 0;

// ============================================================================
// Device-reported state
// ============================================================================

/// Next address reported once the device has received all firmware.
pub const NEXT_ADDRESS_DONE: u16 = 0;

/// Pairs of next-address reads attempted before giving up on agreement.
pub const MAX_NEXT_ADDRESS_ATTEMPTS: usize = 256;

/// Minimum response length for version and next-address replies.
pub const WORD_RESPONSE_LEN: usize = 2;

// ============================================================================
// Image layout
// ============================================================================

/// Required length of the `.vectors` section.
pub const VECTORS_LEN: usize = 32;

/// Section carrying the main program.
pub const TEXT_SECTION: &str = ".text";

/// Section carrying the interrupt vector table.
pub const VECTORS_SECTION: &str = ".vectors";

// ============================================================================
// Confirmation
// ============================================================================

/// Confirm payload: a 4-byte password field, currently ignored by the device.
pub const CONFIRM_PASSWORD: [u8; 4] = [0; 4];

/// The device switches firmware without acknowledging, so confirm is repeated.
pub const CONFIRM_REPEATS: usize = 10;

// ============================================================================
// Timing
// ============================================================================

/// Default transaction timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 200;

/// Largest frame a transport must be able to carry (opcode + chunk payload).
pub const MAX_REQUEST_LEN: usize = 1 + CHUNK_PAYLOAD_SIZE;

/// Largest response payload we are willing to read back.
pub const MAX_RESPONSE_LEN: usize = 32;
