/*!
# MIMOSIS-1 Register Access

This crate contains the register access layer used by the single event effect
test tools for the MIMOSIS-1 sensor. It models the narrow I2C protocol of the
chip (one address/command byte plus single byte payloads) and offers a software
device that speaks the same protocol, so everything above it can run without
hardware.

## Core Types

- [`ChipId`] / [`Command`] - Transaction header encoding
- [`Transport`] - The two-function byte transport (hardware or simulated)
- [`SimulatedDevice`] - In-memory register store speaking the chip protocol
- [`Chip`] - Register block reads and writes on top of a transport
- [`RegisterBlock`] - Named register blocks and their address table
- [`RegisterDefaults`] - Immutable default contents for writable blocks

## Modules

- [`command`] - Header byte codec
- [`transport`] - Transport interface and a closure-backed implementation
- [`sim`] - Simulated device
- [`block`] - Register block address table
- [`chip`] - Register block I/O
- [`corruption`] - Read-time fault injection
- [`defaults`] - Default register value tables
- [`error`] - Common error types
*/

pub mod block;
pub mod chip;
pub mod command;
pub mod corruption;
pub mod defaults;
pub mod error;
pub mod sim;
pub mod transport;

// Re-export commonly used types
pub use block::RegisterBlock;
pub use chip::Chip;
pub use command::{ChipId, Command};
pub use corruption::ReadCorruption;
pub use defaults::{RegisterDefaults, RegisterTable};
pub use error::{ChipError, Result};
pub use sim::SimulatedDevice;
pub use transport::{FnTransport, Transport};

/// Version information for the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// Size of the general configuration block in bytes
    pub const GEN_CONF_LEN: usize = 16;

    /// Size of the DAC block in bytes
    pub const DAC_LEN: usize = 15;

    /// Size of the monitoring block in bytes
    pub const MON_LEN: usize = 15;

    /// Size of the readout test configuration block in bytes
    pub const RO_TST_CONF_LEN: usize = 20;

    /// Number of regions addressed in the multi frame emulation memory
    pub const MFE_REGIONS: usize = 64;

    /// Number of frames per region in the multi frame emulation memory
    pub const MFE_FRAMES: usize = 8;

    /// Size of the multi frame emulation memory in bytes
    pub const MFE_LEN: usize = MFE_REGIONS * MFE_FRAMES;

    /// Per-read probability of an injected bit flip (0.1%)
    pub const DEFAULT_FLIP_PROBABILITY: f64 = 0.001;

    /// Fill pattern used for the test memories when nothing else is given
    pub const TEST_PATTERN: u8 = 0x55;
}
