/*!
Simulated chip.

An in-memory register store addressed by a (MSB, LSB) pair that answers the
same transactions as the real chip. The store starts all zero, which is not
the reset state of a real chip.
*/

use crate::command::{ChipId, Command};
use crate::error::{ChipError, Result};
use crate::transport::Transport;
use tracing::trace;

/// Number of row/column selectors the address bytes can express
const GRID_SIDE: usize = 256;

/// Software stand-in for one chip on the bus
#[derive(Debug, Clone)]
pub struct SimulatedDevice {
    chip: ChipId,
    cells: Vec<Vec<u8>>,
    row: u8,
    column: u8,
    transactions: u64,
}

impl SimulatedDevice {
    /// Create a simulated chip answering to `chip`
    pub fn new(chip: ChipId) -> Self {
        Self {
            chip,
            cells: vec![vec![0x00, 0x00]; GRID_SIDE * GRID_SIDE],
            row: 0,
            column: 0,
            transactions: 0,
        }
    }

    /// Chip id this device answers to
    pub fn chip(&self) -> ChipId {
        self.chip
    }

    /// Currently selected (MSB, LSB) address
    pub fn selected(&self) -> (u8, u8) {
        (self.row, self.column)
    }

    /// Contents of the cell at (`msb`, `lsb`)
    pub fn cell(&self, msb: u8, lsb: u8) -> &[u8] {
        &self.cells[Self::index(msb, lsb)]
    }

    /// Number of transactions handled so far
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    fn index(msb: u8, lsb: u8) -> usize {
        msb as usize * GRID_SIDE + lsb as usize
    }
}

impl Transport for SimulatedDevice {
    fn write(&mut self, header: u8, payload: &[u8]) -> Result<usize> {
        self.transactions += 1;
        trace!("< write 0x{:02X}: {:02X?}", header, payload);

        if header == self.chip.header(Command::AddMsb) && payload.len() == 1 {
            self.row = payload[0];
        } else if header == self.chip.header(Command::AddLsb) && payload.len() == 1 {
            self.column = payload[0];
        } else if header == self.chip.header(Command::Wr) {
            let index = Self::index(self.row, self.column);
            self.cells[index] = payload.to_vec();
        } else {
            trace!("ignoring write to header 0x{:02X}", header);
        }

        Ok(payload.len())
    }

    fn read(&mut self, header: u8, len: usize) -> Result<Vec<u8>> {
        self.transactions += 1;
        trace!(">  read 0x{:02X}: {} byte(s)", header, len);

        if header != self.chip.header(Command::Rd) {
            return Err(ChipError::ProtocolMismatch { header });
        }

        // Cells shorter than the request are padded with zeros
        let cell = &self.cells[Self::index(self.row, self.column)];
        let mut bytes = vec![0u8; len];
        let stored = len.min(cell.len());
        bytes[..stored].copy_from_slice(&cell[..stored]);

        trace!(">> {:02X?}", bytes);
        Ok(bytes)
    }
}
