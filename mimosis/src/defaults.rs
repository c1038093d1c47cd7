/*!
Default register contents.

The general configuration and DAC values come from the no-PLL configuration
used at the micro-beam line (rescue clock, all eight outputs enabled). Table
order is wire order.
*/

use crate::block::RegisterBlock;
use crate::error::{ChipError, Result};
use crate::protocol::{MFE_LEN, RO_TST_CONF_LEN, TEST_PATTERN};
use std::collections::HashMap;

/// Ordered name/value table for one register block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterTable {
    pub block: RegisterBlock,
    pub entries: &'static [(&'static str, u8)],
}

impl RegisterTable {
    /// Register values in wire order
    pub fn to_bytes(&self) -> Vec<u8> {
        self.entries.iter().map(|&(_, value)| value).collect()
    }

    /// Look up a register value by name
    pub fn get(&self, name: &str) -> Option<u8> {
        self.entries
            .iter()
            .find(|(entry, _)| *entry == name)
            .map(|&(_, value)| value)
    }
}

/// General configuration defaults
pub const GEN_CONF_TABLE: RegisterTable = RegisterTable {
    block: RegisterBlock::GenConf,
    entries: &[
        ("RUNMODE", 0x40),  // CLKRESCUE pad termination
        ("TRIMDAC", 0x6E),
        ("INJCURR", 0x00),
        ("INJVOLT1", 0x00),
        ("INJVOLT2", 0x00),
        ("MONCURR", 0x00),
        ("MONVOLT", 0x00),
        ("CLKGEN1", 0x01),  // rescue clock (320 MHz)
        ("CLKGEN2", 0x01),  // DIS_LOCK_GATING
        ("PLL", 0x16),      // VCO and regulator off
        ("PLLLOCK", 0x00),
        ("MONTEMP", 0x00),
        ("SLVSTX", 0x15),
        ("SLVSRX", 0x00),   // very low input bias for CLK & CLKRESCUE
        ("OUTPUT", 0x17),   // all 8 outputs and data marker
        ("MONPWR", 0x00),
    ],
};

/// DAC defaults
pub const DAC_TABLE: RegisterTable = RegisterTable {
    block: RegisterBlock::Dac,
    entries: &[
        ("IBIAS", 64),
        ("ITHR", 52),
        ("IDB", 28),
        ("VRESET", 171),
        ("VPL", 70),
        ("VPH", 85),
        ("VPH_FINE", 0),
        ("VCASP", 67),
        ("VCASNA", 1),
        ("VCASNB", 1),
        ("VCASNC", 1),
        ("VCASND", 1),
        ("VCASN2", 83),
        ("VCLIP", 50),
        ("IBUFBIAS", 125),
    ],
};

/// Known-good contents for the writable blocks.
///
/// Built once at startup and handed to whoever needs to (re)write registers.
/// Blocks without an entry have no fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterDefaults {
    blocks: HashMap<RegisterBlock, Vec<u8>>,
}

impl RegisterDefaults {
    /// Empty set, no block has a fallback
    pub fn empty() -> Self {
        Self {
            blocks: HashMap::new(),
        }
    }

    /// Tables above plus the 0x55 pattern for the test memories
    pub fn standard() -> Self {
        let mut blocks = HashMap::new();
        blocks.insert(RegisterBlock::GenConf, GEN_CONF_TABLE.to_bytes());
        blocks.insert(RegisterBlock::Dac, DAC_TABLE.to_bytes());
        blocks.insert(RegisterBlock::RoTstConf, vec![TEST_PATTERN; RO_TST_CONF_LEN]);
        blocks.insert(RegisterBlock::Mfe, vec![TEST_PATTERN; MFE_LEN]);
        Self { blocks }
    }

    /// Replace (or add) the contents of one block, checking its size
    pub fn with_block(mut self, block: RegisterBlock, bytes: Vec<u8>) -> Result<Self> {
        let expected = block.require_size()?;
        if bytes.len() != expected {
            return Err(ChipError::Size {
                block,
                expected,
                actual: bytes.len(),
            });
        }
        self.blocks.insert(block, bytes);
        Ok(self)
    }

    /// Contents for `block`, if any
    pub fn get(&self, block: RegisterBlock) -> Option<&[u8]> {
        self.blocks.get(&block).map(Vec::as_slice)
    }

    /// Blocks that have contents, in address table order
    pub fn blocks(&self) -> Vec<RegisterBlock> {
        RegisterBlock::ALL
            .into_iter()
            .filter(|block| self.blocks.contains_key(block))
            .collect()
    }
}

impl Default for RegisterDefaults {
    fn default() -> Self {
        Self::standard()
    }
}
