/*!
Register blocks and their address table.

Each block maps to a fixed (MSB, LSB) base address. The top three bits of the
LSB byte select the block, the low bits carry the offset inside it.
*/

use crate::error::{ChipError, Result};
use crate::protocol::{DAC_LEN, GEN_CONF_LEN, MFE_LEN, MON_LEN, RO_TST_CONF_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named register groups of the chip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterBlock {
    GenConf,
    #[serde(rename = "DAC")]
    Dac,
    SeqConf,
    PixCtrl,
    Mon,
    #[serde(rename = "MFE")]
    Mfe,
    AnaPixSel,
    RoTstConf,
}

impl RegisterBlock {
    /// All blocks in address table order
    pub const ALL: [RegisterBlock; 8] = [
        Self::GenConf,
        Self::Dac,
        Self::SeqConf,
        Self::PixCtrl,
        Self::Mon,
        Self::Mfe,
        Self::AnaPixSel,
        Self::RoTstConf,
    ];

    /// Base (MSB, LSB) address bytes of the block
    pub fn base_address(self) -> (u8, u8) {
        match self {
            Self::GenConf => (0b0000_0000, 0b0010_0000),
            Self::Dac => (0b0000_0000, 0b0100_0000),
            Self::SeqConf => (0b0000_0000, 0b0110_0000),
            Self::PixCtrl => (0b0000_0000, 0b1000_0000),
            Self::Mon => (0b0000_0000, 0b1110_0000),
            Self::Mfe => (0b1000_0000, 0b0000_0000),
            Self::AnaPixSel => (0b1000_0000, 0b0010_0000),
            Self::RoTstConf => (0b1000_0000, 0b0100_0000),
        }
    }

    /// Fixed size in bytes, `None` for blocks without block I/O
    pub fn size(self) -> Option<usize> {
        match self {
            Self::GenConf => Some(GEN_CONF_LEN),
            Self::Dac => Some(DAC_LEN),
            Self::Mon => Some(MON_LEN),
            Self::RoTstConf => Some(RO_TST_CONF_LEN),
            Self::Mfe => Some(MFE_LEN),
            Self::SeqConf | Self::PixCtrl | Self::AnaPixSel => None,
        }
    }

    /// Fixed size in bytes, or a configuration error for unsupported blocks
    pub fn require_size(self) -> Result<usize> {
        self.size().ok_or_else(|| {
            ChipError::config(format!("block {} does not support block read/write", self))
        })
    }

    /// Name as used in the chip documentation
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenConf => "GenConf",
            Self::Dac => "DAC",
            Self::SeqConf => "SeqConf",
            Self::PixCtrl => "PixCtrl",
            Self::Mon => "Mon",
            Self::Mfe => "MFE",
            Self::AnaPixSel => "AnaPixSel",
            Self::RoTstConf => "RoTstConf",
        }
    }
}

impl fmt::Display for RegisterBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegisterBlock {
    type Err = ChipError;

    /// Parse a block name (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|block| block.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ChipError::config(format!("unknown register block '{}'", s)))
    }
}
