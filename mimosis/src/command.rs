/*!
Transaction header encoding.

Every transaction starts with one header byte that the chip sees as its I2C
address: the 3-bit chip id in bits 6:4 and the 4-bit command code in bits 3:0.
*/

use crate::error::{ChipError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Command codes understood by the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Instr = 1,
    AddMsb = 2,
    AddLsb = 3,
    Wr = 4,
    Rd = 5,
    WrInd = 6,
    RdInd = 7,
    WrOff = 8,
    RdOff = 9,
}

impl Command {
    /// All commands in code order
    pub const ALL: [Command; 9] = [
        Self::Instr,
        Self::AddMsb,
        Self::AddLsb,
        Self::Wr,
        Self::Rd,
        Self::WrInd,
        Self::RdInd,
        Self::WrOff,
        Self::RdOff,
    ];

    /// Parse a command from its 4-bit code
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Instr),
            2 => Some(Self::AddMsb),
            3 => Some(Self::AddLsb),
            4 => Some(Self::Wr),
            5 => Some(Self::Rd),
            6 => Some(Self::WrInd),
            7 => Some(Self::RdInd),
            8 => Some(Self::WrOff),
            9 => Some(Self::RdOff),
            _ => None,
        }
    }

    /// Numeric command code
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Mnemonic used in the chip documentation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Instr => "INSTR",
            Self::AddMsb => "ADD_MSB",
            Self::AddLsb => "ADD_LSB",
            Self::Wr => "WR",
            Self::Rd => "RD",
            Self::WrInd => "WR_IND",
            Self::RdInd => "RD_IND",
            Self::WrOff => "WR_OFF",
            Self::RdOff => "RD_OFF",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated 3-bit chip identifier (1..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct ChipId(u8);

impl ChipId {
    /// Create a chip id, rejecting values outside 1..=7
    pub fn new(id: u8) -> Result<Self> {
        if (1..=7).contains(&id) {
            Ok(Self(id))
        } else {
            Err(ChipError::invalid_argument(format!(
                "chip id {} outside 1..=7",
                id
            )))
        }
    }

    /// Raw id value
    pub fn get(self) -> u8 {
        self.0
    }

    /// Header byte addressing this chip with `command`
    pub fn header(self, command: Command) -> u8 {
        (self.0 & 0b111) << 4 | (command.code() & 0b1111)
    }
}

impl Default for ChipId {
    fn default() -> Self {
        Self(1)
    }
}

impl TryFrom<u8> for ChipId {
    type Error = ChipError;

    fn try_from(id: u8) -> Result<Self> {
        Self::new(id)
    }
}

impl From<ChipId> for u8 {
    fn from(id: ChipId) -> u8 {
        id.0
    }
}

impl fmt::Display for ChipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compute a header byte from raw chip id and command code.
///
/// Fails with [`ChipError::InvalidArgument`] if the chip id is outside 1..=7
/// or the code is not one of the nine known commands.
pub fn header_byte(chip_id: u8, command_code: u8) -> Result<u8> {
    let chip = ChipId::new(chip_id)?;
    let command = Command::from_code(command_code).ok_or_else(|| {
        ChipError::invalid_argument(format!("unknown command code {}", command_code))
    })?;
    Ok(chip.header(command))
}

/// Split a header byte back into chip id and command
pub fn decode_header(header: u8) -> Result<(ChipId, Command)> {
    let chip = ChipId::new((header >> 4) & 0b111)?;
    let code = header & 0b1111;
    let command = Command::from_code(code).ok_or_else(|| {
        ChipError::invalid_argument(format!("unknown command code {} in header 0x{:02X}", code, header))
    })?;
    Ok((chip, command))
}
