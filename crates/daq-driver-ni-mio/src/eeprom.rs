//! Board EEPROM (calibration constants, serial number).
//!
//! E-series boards hang a 512-byte serial EEPROM off `Serial_Command`,
//! sharing clock and data lines with the calibration DACs. M-series boards
//! map the whole image into the register window; it is copied once at
//! attach and served from memory afterwards.

use std::sync::Arc;

use comedi_core::{Insn, Result, SubdeviceOps};
use tracing::trace;

use crate::device::NiMio;
use crate::io::RegisterIo;
use crate::regs::{board, m_series};

/// Bytes addressable on the E-series serial EEPROM.
pub const E_SERIES_EEPROM_SIZE: u32 = 512;

/// Bytes of the M-series EEPROM image.
pub const M_SERIES_EEPROM_SIZE: u32 = 1024;

/// Read opcode in bits 8-9 of the command word.
const READ_COMMAND: u32 = 0x0300;

/// Shift one byte out of the E-series EEPROM. Caller holds the serial port.
pub(crate) fn read_serial(io: &dyn RegisterIo, addr: u32) -> u8 {
    let command = READ_COMMAND | ((addr & 0x100) << 3) | (addr & 0xff);
    let clock = board::SERIAL_CLOCK;
    let cs = board::EEPROM_CS;

    io.write8(board::SERIAL_COMMAND, cs);
    for bit in (0..16).rev() {
        let data = if command & (1 << bit) != 0 {
            board::SERIAL_DATA
        } else {
            0
        };
        io.write8(board::SERIAL_COMMAND, cs | data);
        io.write8(board::SERIAL_COMMAND, cs | clock | data);
    }

    let mut value = 0u8;
    for bit in (0..8).rev() {
        io.write8(board::SERIAL_COMMAND, cs);
        io.write8(board::SERIAL_COMMAND, cs | clock);
        if io.read8(board::XXX_STATUS) & board::PROMOUT != 0 {
            value |= 1 << bit;
        }
    }
    io.write8(board::SERIAL_COMMAND, 0);
    trace!(addr, value, "EEPROM byte");
    value
}

/// Copy the M-series image out of the register window.
pub(crate) fn read_image(io: &dyn RegisterIo) -> Vec<u8> {
    (0..M_SERIES_EEPROM_SIZE)
        .map(|i| io.read8(m_series::EEPROM_IMAGE + i))
        .collect()
}

/// Operation set of the EEPROM subdevice.
pub(crate) struct EepromOps {
    pub(crate) dev: Arc<NiMio>,
}

impl SubdeviceOps for EepromOps {
    fn insn_read(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        let addr = insn.chan_desc.chan();
        let value = if dev.board.is_m_series() {
            dev.eeprom.get(addr as usize).copied().unwrap_or(0)
        } else {
            // the serial lines are shared with the caldacs
            let _cal = dev.cal.lock();
            read_serial(dev.bus.io(), addr)
        };
        insn.data.iter_mut().for_each(|d| *d = u32::from(value));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::subdev;
    use crate::sim::SimRig;
    use comedi_core::{AnalogReference, ChanDesc, ComediError};

    fn read(rig: &SimRig, addr: u32) -> comedi_core::Result<u32> {
        let mut insn = Insn::read(ChanDesc::pack(addr, 0, AnalogReference::Ground), 1);
        rig.device.insn(subdev::EEPROM, &mut insn).map(|()| insn.data[0])
    }

    fn default_byte(i: u32) -> u32 {
        (i.wrapping_mul(7) ^ 0x5a) & 0xff
    }

    #[test]
    fn test_e_series_reads_serial_eeprom() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        assert_eq!(read(&rig, 0).unwrap(), default_byte(0));
        assert_eq!(read(&rig, 0x1a3).unwrap(), default_byte(0x1a3));
        // chip select is dropped after every byte
        assert_eq!(rig.sim.board_reg(board::SERIAL_COMMAND), 0);
    }

    #[test]
    fn test_e_series_upper_page() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut image = vec![0u8; 512];
        image[0x100] = 0xc7;
        image[0] = 0x11;
        rig.sim.set_eeprom(&image);
        assert_eq!(read(&rig, 0x100).unwrap(), 0xc7);
        assert_eq!(read(&rig, 0).unwrap(), 0x11);
    }

    #[test]
    fn test_e_series_address_range() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let err = read(&rig, E_SERIES_EEPROM_SIZE).unwrap_err();
        assert!(matches!(err, ComediError::InvalidChannel { .. }));
    }

    #[test]
    fn test_m_series_serves_cached_image() {
        let rig = SimRig::polled("pci-6221").unwrap();
        assert_eq!(read(&rig, 1023).unwrap(), default_byte(1023));
        // later changes to the window are not seen
        rig.sim.set_eeprom(&[0xee; 1024]);
        assert_eq!(read(&rig, 5).unwrap(), default_byte(5));
    }
}
