/*!
Register block I/O.

Blocks are moved one byte per transaction pair: an ADD_LSB selecting the
offset followed by a single byte RD or WR. This mirrors the narrow register
window of the real chip and must be kept for wire compatibility.
*/

use crate::block::RegisterBlock;
use crate::command::{ChipId, Command};
use crate::corruption::ReadCorruption;
use crate::defaults::RegisterDefaults;
use crate::error::{ChipError, Result};
use crate::protocol::{MFE_FRAMES, MFE_REGIONS};
use crate::transport::Transport;
use tracing::{debug, trace};

/// Broadcast bit of the MSB byte for pixel control access, region 0
const PIX_CTRL_BROADCAST: u8 = 0b0100_0000;

/// Direction and buffer of one block transfer
enum Access<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

impl Access<'_> {
    fn len(&self) -> usize {
        match self {
            Access::Read(buf) => buf.len(),
            Access::Write(buf) => buf.len(),
        }
    }
}

/// One MIMOSIS-1 chip reached through a transport
pub struct Chip<T> {
    transport: T,
    id: ChipId,
    defaults: RegisterDefaults,
    corruption: Option<ReadCorruption>,
}

impl<T: Transport> Chip<T> {
    /// Create a chip handle with the standard default tables
    pub fn new(transport: T, id: ChipId) -> Self {
        Self {
            transport,
            id,
            defaults: RegisterDefaults::standard(),
            corruption: None,
        }
    }

    /// Replace the defaults used when no explicit buffer is given
    pub fn with_defaults(mut self, defaults: RegisterDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Chip id used in every header byte
    pub fn id(&self) -> ChipId {
        self.id
    }

    /// Loaded defaults
    pub fn defaults(&self) -> &RegisterDefaults {
        &self.defaults
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Underlying transport, mutable
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consume the handle and return the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Enable or disable read-time fault injection
    pub fn set_read_corruption(&mut self, corruption: Option<ReadCorruption>) {
        self.corruption = corruption;
    }

    /// Active fault injection, if any
    pub fn read_corruption(&self) -> Option<&ReadCorruption> {
        self.corruption.as_ref()
    }

    /// Read a whole block into `buf`, which must be exactly the block size.
    ///
    /// Returns the number of bytes transferred. No transaction is issued if
    /// the block or the buffer size is rejected.
    pub fn read_block(&mut self, block: RegisterBlock, buf: &mut [u8]) -> Result<usize> {
        self.transfer(block, Access::Read(buf))
    }

    /// Write a whole block from `buf`, which must be exactly the block size
    pub fn write_block(&mut self, block: RegisterBlock, buf: &[u8]) -> Result<usize> {
        self.transfer(block, Access::Write(buf))
    }

    /// Read a whole block into a fresh buffer
    pub fn read_block_vec(&mut self, block: RegisterBlock) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; block.require_size()?];
        self.read_block(block, &mut buf)?;
        Ok(buf)
    }

    /// Write `buf`, or the loaded defaults for `block` when `buf` is `None`
    pub fn write_block_or_default(&mut self, block: RegisterBlock, buf: Option<&[u8]>) -> Result<usize> {
        match buf {
            Some(bytes) => self.write_block(block, bytes),
            None => {
                let bytes = self.defaults.get(block).map(<[u8]>::to_vec).ok_or_else(|| {
                    ChipError::config(format!(
                        "neither byte array nor loaded configuration found for {}",
                        block
                    ))
                })?;
                self.write_block(block, &bytes)
            }
        }
    }

    /// Write every block present in `defaults`, returning the total byte count
    pub fn write_defaults(&mut self, defaults: &RegisterDefaults) -> Result<usize> {
        let mut total = 0;
        for block in defaults.blocks() {
            if let Some(bytes) = defaults.get(block) {
                total += self.write_block(block, bytes)?;
            }
        }
        debug!("wrote {} default bytes to chip {}", total, self.id);
        Ok(total)
    }

    /// Read the pixel control register in broadcast mode
    pub fn read_pix_ctrl(&mut self, mask: u8) -> Result<u8> {
        self.select_pix_ctrl(mask)?;
        self.read_byte()
    }

    /// Write the pixel control register in broadcast mode
    pub fn write_pix_ctrl(&mut self, mask: u8, value: u8) -> Result<usize> {
        self.select_pix_ctrl(mask)?;
        self.send(Command::Wr, value)?;
        Ok(1)
    }

    fn select_pix_ctrl(&mut self, mask: u8) -> Result<()> {
        let (_, lsb) = RegisterBlock::PixCtrl.base_address();
        self.send(Command::AddMsb, PIX_CTRL_BROADCAST)?;
        self.send(Command::AddLsb, (lsb & 0b1110_0000) | (mask & 0b1_1111))
    }

    fn transfer(&mut self, block: RegisterBlock, mut access: Access<'_>) -> Result<usize> {
        let expected = block.require_size()?;
        if access.len() != expected {
            return Err(ChipError::Size {
                block,
                expected,
                actual: access.len(),
            });
        }

        trace!("{} {} ({} bytes)", if matches!(access, Access::Read(_)) { "reading" } else { "writing" }, block, expected);

        match block {
            RegisterBlock::Mfe => self.transfer_mfe(&mut access)?,
            _ => self.transfer_linear(block, &mut access)?,
        }
        Ok(expected)
    }

    /// One ADD_MSB for the block, then ADD_LSB + data per offset
    fn transfer_linear(&mut self, block: RegisterBlock, access: &mut Access<'_>) -> Result<()> {
        let (msb, lsb) = block.base_address();
        self.send(Command::AddMsb, msb)?;

        for i in 0..access.len() {
            self.send(Command::AddLsb, (lsb & 0b1111_0000) | i as u8)?;
            self.exchange(access, i)?;
        }
        Ok(())
    }

    /// Region select in the MSB (bits 5:0), frame select in the LSB (bits 2:0)
    fn transfer_mfe(&mut self, access: &mut Access<'_>) -> Result<()> {
        let (msb, lsb) = RegisterBlock::Mfe.base_address();

        for region in 0..MFE_REGIONS {
            self.send(Command::AddMsb, (msb & 0b1000_0000) | (region as u8 & 0b11_1111))?;
            for frame in 0..MFE_FRAMES {
                self.send(Command::AddLsb, (lsb & 0b1111_1000) | (frame as u8 & 0b111))?;
                self.exchange(access, region * MFE_FRAMES + frame)?;
            }
        }
        Ok(())
    }

    fn exchange(&mut self, access: &mut Access<'_>, index: usize) -> Result<()> {
        match access {
            Access::Read(buf) => buf[index] = self.read_byte()?,
            Access::Write(buf) => self.send(Command::Wr, buf[index])?,
        }
        Ok(())
    }

    fn send(&mut self, command: Command, byte: u8) -> Result<()> {
        self.transport.write(self.id.header(command), &[byte])?;
        Ok(())
    }

    fn read_byte(&mut self) -> Result<u8> {
        let bytes = self.transport.read(self.id.header(Command::Rd), 1)?;
        let byte = *bytes
            .first()
            .ok_or_else(|| ChipError::transport("empty read result"))?;

        Ok(match self.corruption.as_mut() {
            Some(corruption) => corruption.apply(byte),
            None => byte,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedDevice;

    /// Counts transactions and records every header/payload pair
    struct RecordingTransport {
        inner: SimulatedDevice,
        log: Vec<(u8, Vec<u8>)>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            Self {
                inner: SimulatedDevice::new(ChipId::new(1).unwrap()),
                log: Vec::new(),
            }
        }
    }

    impl Transport for RecordingTransport {
        fn write(&mut self, header: u8, payload: &[u8]) -> Result<usize> {
            self.log.push((header, payload.to_vec()));
            self.inner.write(header, payload)
        }

        fn read(&mut self, header: u8, len: usize) -> Result<Vec<u8>> {
            self.log.push((header, Vec::new()));
            self.inner.read(header, len)
        }
    }

    fn sim_chip() -> Chip<SimulatedDevice> {
        let id = ChipId::new(1).unwrap();
        Chip::new(SimulatedDevice::new(id), id)
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 + 11) as u8).collect()
    }

    #[test]
    fn test_roundtrip_all_blocks() {
        let mut chip = sim_chip();
        for block in [
            RegisterBlock::GenConf,
            RegisterBlock::Dac,
            RegisterBlock::Mon,
            RegisterBlock::RoTstConf,
            RegisterBlock::Mfe,
        ] {
            let bytes = pattern(block.size().unwrap());
            assert_eq!(chip.write_block(block, &bytes).unwrap(), bytes.len());
            assert_eq!(chip.read_block_vec(block).unwrap(), bytes, "block {}", block);
        }
    }

    #[test]
    fn test_blocks_do_not_overlap() {
        let mut chip = sim_chip();
        chip.write_block(RegisterBlock::GenConf, &[0x11; 16]).unwrap();
        chip.write_block(RegisterBlock::Dac, &[0x22; 15]).unwrap();
        chip.write_block(RegisterBlock::Mon, &[0x33; 15]).unwrap();

        assert_eq!(chip.read_block_vec(RegisterBlock::GenConf).unwrap(), vec![0x11; 16]);
        assert_eq!(chip.read_block_vec(RegisterBlock::Dac).unwrap(), vec![0x22; 15]);
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let mut chip = sim_chip();
        chip.write_defaults(&RegisterDefaults::standard()).unwrap();

        let first = chip.read_block_vec(RegisterBlock::GenConf).unwrap();
        let second = chip.read_block_vec(RegisterBlock::GenConf).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_gen_conf_wire_sequence() {
        let mut transport = RecordingTransport::new();
        {
            let mut chip = Chip::new(&mut transport, ChipId::new(1).unwrap());
            chip.write_block(RegisterBlock::GenConf, &pattern(16)).unwrap();
        }

        let log = &transport.log;
        assert_eq!(log.len(), 1 + 16 * 2);
        assert_eq!(log[0], (0x12, vec![0x00]));
        assert_eq!(log[1], (0x13, vec![0x20]));
        assert_eq!(log[2], (0x14, vec![pattern(16)[0]]));
        assert_eq!(log[31], (0x13, vec![0x2F]));
    }

    #[test]
    fn test_ro_tst_conf_offsets() {
        let mut transport = RecordingTransport::new();
        {
            let mut chip = Chip::new(&mut transport, ChipId::new(1).unwrap());
            chip.read_block_vec(RegisterBlock::RoTstConf).unwrap();
        }

        let lsb: Vec<u8> = transport
            .log
            .iter()
            .filter(|(header, _)| *header == 0x13)
            .map(|(_, payload)| payload[0])
            .collect();
        let expected: Vec<u8> = (0x40..0x54).collect();
        assert_eq!(transport.log[0], (0x12, vec![0x80]));
        assert_eq!(lsb, expected);
    }

    #[test]
    fn test_mfe_addressing() {
        let mut transport = RecordingTransport::new();
        {
            let mut chip = Chip::new(&mut transport, ChipId::new(1).unwrap());
            chip.read_block_vec(RegisterBlock::Mfe).unwrap();
        }

        let msb: Vec<u8> = transport
            .log
            .iter()
            .filter(|(header, _)| *header == 0x12)
            .map(|(_, payload)| payload[0])
            .collect();
        assert_eq!(msb.len(), 64);
        assert_eq!(msb[0], 0x80);
        assert_eq!(msb[63], 0xBF);
        // 64 MSB selects + 512 * (LSB select + read)
        assert_eq!(transport.log.len(), 64 + 512 * 2);
    }

    #[test]
    fn test_short_buffer_issues_no_transactions() {
        for (block, size) in [
            (RegisterBlock::GenConf, 16),
            (RegisterBlock::Dac, 15),
            (RegisterBlock::Mon, 15),
            (RegisterBlock::Mfe, 512),
        ] {
            let mut transport = RecordingTransport::new();
            {
                let mut chip = Chip::new(&mut transport, ChipId::new(1).unwrap());
                let mut buf = vec![0u8; size - 1];
                assert_eq!(
                    chip.read_block(block, &mut buf),
                    Err(ChipError::Size { block, expected: size, actual: size - 1 })
                );
                assert!(matches!(chip.write_block(block, &buf), Err(ChipError::Size { .. })));
            }
            assert!(transport.log.is_empty(), "transactions issued for {}", block);
        }
    }

    #[test]
    fn test_long_buffer_is_rejected() {
        let mut chip = sim_chip();
        assert!(matches!(
            chip.write_block(RegisterBlock::GenConf, &[0; 17]),
            Err(ChipError::Size { .. })
        ));
    }

    #[test]
    fn test_unsupported_block_is_configuration_error() {
        let mut transport = RecordingTransport::new();
        {
            let mut chip = Chip::new(&mut transport, ChipId::new(1).unwrap());
            let mut buf = [0u8; 4];
            assert!(matches!(
                chip.read_block(RegisterBlock::SeqConf, &mut buf),
                Err(ChipError::Configuration(_))
            ));
            assert!(matches!(
                chip.read_block_vec(RegisterBlock::AnaPixSel),
                Err(ChipError::Configuration(_))
            ));
        }
        assert!(transport.log.is_empty());
    }

    #[test]
    fn test_write_without_buffer_uses_defaults() {
        let mut chip = sim_chip();
        chip.write_block_or_default(RegisterBlock::Dac, None).unwrap();
        assert_eq!(
            chip.read_block_vec(RegisterBlock::Dac).unwrap(),
            crate::defaults::DAC_TABLE.to_bytes()
        );

        assert!(matches!(
            chip.write_block_or_default(RegisterBlock::Mon, None),
            Err(ChipError::Configuration(_))
        ));

        let mut empty = sim_chip().with_defaults(RegisterDefaults::empty());
        assert!(empty.write_block_or_default(RegisterBlock::GenConf, None).is_err());
    }

    #[test]
    fn test_write_defaults_total() {
        let mut chip = sim_chip();
        let total = chip.write_defaults(&RegisterDefaults::standard()).unwrap();
        assert_eq!(total, 16 + 15 + 20 + 512);
        assert_eq!(chip.read_block_vec(RegisterBlock::RoTstConf).unwrap(), vec![0x55; 20]);
    }

    #[test]
    fn test_pix_ctrl_broadcast() {
        let mut chip = sim_chip();
        chip.write_pix_ctrl(0b1_0101, 0x3C).unwrap();
        assert_eq!(chip.read_pix_ctrl(0b1_0101).unwrap(), 0x3C);
        assert_eq!(chip.transport().selected(), (0x40, 0x95));
    }

    #[test]
    fn test_read_corruption_applies_to_reads_only() {
        let mut chip = sim_chip();
        chip.write_block(RegisterBlock::GenConf, &[0u8; 16]).unwrap();
        chip.set_read_corruption(Some(ReadCorruption::new(1.0, 3).unwrap()));

        let read = chip.read_block_vec(RegisterBlock::GenConf).unwrap();
        assert!(read.iter().all(|byte| byte.count_ones() == 1));
        assert_eq!(chip.read_corruption().unwrap().flips(), 16);

        // Storage itself is untouched
        chip.set_read_corruption(None);
        assert_eq!(chip.read_block_vec(RegisterBlock::GenConf).unwrap(), vec![0u8; 16]);
    }

    #[test]
    fn test_mismatched_chip_id_surfaces_protocol_error() {
        let mut chip = Chip::new(
            SimulatedDevice::new(ChipId::new(2).unwrap()),
            ChipId::new(1).unwrap(),
        );
        assert!(matches!(
            chip.read_block_vec(RegisterBlock::Dac),
            Err(ChipError::ProtocolMismatch { .. })
        ));
    }
}
