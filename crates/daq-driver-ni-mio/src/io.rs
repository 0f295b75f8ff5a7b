//! Register access.
//!
//! [`RegisterIo`] is the raw bus: byte offsets into the board's register
//! window. [`Stc`] sits on top of it and addresses the DAQ-STC by register
//! number, hiding how the family reaches the chip:
//!
//! - E-series boards expose the STC through a window pair. Registers below 8
//!   are also mapped directly at `2 * reg`; everything else goes through
//!   `Window_Address`/`Window_Data` under the window lock.
//! - M-series boards map every STC register at a fixed offset
//!   ([`regs::m_series_offset`]).
//!
//! 32-bit STC registers are pairs: high word at `reg`, low word at `reg + 1`.

use std::fmt;
use std::sync::Arc;

use comedi_core::ComediError;
use parking_lot::Mutex;
use tracing::trace;

use crate::regs::{self, board};

/// Raw register window of a board.
///
/// Implemented by the memory-mapped BAR on real hardware and by
/// [`crate::sim::SimBoard`] in tests.
pub trait RegisterIo: Send + Sync {
    /// 8-bit read.
    fn read8(&self, offset: u32) -> u8;
    /// 16-bit read.
    fn read16(&self, offset: u32) -> u16;
    /// 32-bit read.
    fn read32(&self, offset: u32) -> u32;
    /// 8-bit write.
    fn write8(&self, offset: u32, value: u8);
    /// 16-bit write.
    fn write16(&self, offset: u32, value: u16);
    /// 32-bit write.
    fn write32(&self, offset: u32, value: u32);
    /// Flush posted writes.
    fn barrier(&self) {
        std::sync::atomic::fence(std::sync::atomic::Ordering::SeqCst);
    }
}

enum Access {
    Windowed { window: Mutex<()> },
    Direct,
}

/// DAQ-STC accessor.
pub struct Stc {
    io: Arc<dyn RegisterIo>,
    access: Access,
}

fn unmapped(reg: u32, width: u32) {
    // Logged (and fatal in debug builds) by `contract`.
    let _ = ComediError::contract(format!(
        "STC register {reg} has no {width}-bit M-series mapping"
    ));
}

impl Stc {
    /// E-series windowed access.
    pub fn windowed(io: Arc<dyn RegisterIo>) -> Self {
        Self {
            io,
            access: Access::Windowed {
                window: Mutex::new(()),
            },
        }
    }

    /// M-series direct access.
    pub fn m_series(io: Arc<dyn RegisterIo>) -> Self {
        Self {
            io,
            access: Access::Direct,
        }
    }

    /// The raw bus, for board registers outside the STC.
    pub fn io(&self) -> &dyn RegisterIo {
        self.io.as_ref()
    }

    /// Write a 16-bit STC register.
    pub fn writew(&self, value: u16, reg: u32) {
        trace!(reg, value = format_args!("0x{value:04x}"), "stc write");
        match &self.access {
            Access::Windowed { .. } if reg < 8 => self.io.write16(reg * 2, value),
            Access::Windowed { window } => {
                let _guard = window.lock();
                self.io.write16(board::WINDOW_ADDRESS, reg as u16);
                self.io.write16(board::WINDOW_DATA, value);
            }
            Access::Direct => match regs::m_series_offset(reg) {
                Some(offset) => self.io.write16(offset, value),
                None => unmapped(reg, 16),
            },
        }
    }

    /// Read a 16-bit STC register.
    pub fn readw(&self, reg: u32) -> u16 {
        match &self.access {
            Access::Windowed { .. } if reg < 8 => self.io.read16(reg * 2),
            Access::Windowed { window } => {
                let _guard = window.lock();
                self.io.write16(board::WINDOW_ADDRESS, reg as u16);
                self.io.read16(board::WINDOW_DATA)
            }
            Access::Direct => match regs::m_series_offset(reg) {
                Some(offset) => self.io.read16(offset),
                None => {
                    unmapped(reg, 16);
                    0
                }
            },
        }
    }

    /// Write a 32-bit STC register pair.
    pub fn writel(&self, value: u32, reg: u32) {
        trace!(reg, value = format_args!("0x{value:08x}"), "stc write32");
        match &self.access {
            Access::Windowed { window } => {
                let _guard = window.lock();
                self.io.write16(board::WINDOW_ADDRESS, reg as u16);
                self.io.write16(board::WINDOW_DATA, (value >> 16) as u16);
                self.io.write16(board::WINDOW_ADDRESS, (reg + 1) as u16);
                self.io.write16(board::WINDOW_DATA, value as u16);
            }
            Access::Direct => match regs::m_series_offset32(reg) {
                Some(offset) => self.io.write32(offset, value),
                None => unmapped(reg, 32),
            },
        }
    }

    /// Read a 32-bit STC register pair.
    pub fn readl(&self, reg: u32) -> u32 {
        match &self.access {
            Access::Windowed { window } => {
                let _guard = window.lock();
                self.io.write16(board::WINDOW_ADDRESS, reg as u16);
                let hi = self.io.read16(board::WINDOW_DATA);
                self.io.write16(board::WINDOW_ADDRESS, (reg + 1) as u16);
                let lo = self.io.read16(board::WINDOW_DATA);
                (u32::from(hi) << 16) | u32::from(lo)
            }
            Access::Direct => match regs::m_series_offset32(reg) {
                Some(offset) => self.io.read32(offset),
                None => {
                    unmapped(reg, 32);
                    0
                }
            },
        }
    }

    /// Flush posted writes.
    pub fn barrier(&self) {
        self.io.barrier();
    }
}

impl fmt::Debug for Stc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let access = match self.access {
            Access::Windowed { .. } => "windowed",
            Access::Direct => "direct",
        };
        f.debug_struct("Stc").field("access", &access).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Bus that records every access.
    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<(char, u32, u32)>>,
        values: Mutex<HashMap<u32, u32>>,
    }

    impl RegisterIo for Recorder {
        fn read8(&self, offset: u32) -> u8 {
            self.read32(offset) as u8
        }
        fn read16(&self, offset: u32) -> u16 {
            self.read32(offset) as u16
        }
        fn read32(&self, offset: u32) -> u32 {
            let v = self.values.lock().get(&offset).copied().unwrap_or(0);
            self.log.lock().push(('r', offset, v));
            v
        }
        fn write8(&self, offset: u32, value: u8) {
            self.write32(offset, value.into());
        }
        fn write16(&self, offset: u32, value: u16) {
            self.write32(offset, value.into());
        }
        fn write32(&self, offset: u32, value: u32) {
            self.log.lock().push(('w', offset, value));
            self.values.lock().insert(offset, value);
        }
    }

    #[test]
    fn test_windowed_low_registers_are_direct() {
        let bus = Arc::new(Recorder::default());
        let stc = Stc::windowed(bus.clone());
        stc.writew(0x1234, regs::stc::INTERRUPT_A_ACK);
        assert_eq!(bus.log.lock().as_slice(), &[('w', 4, 0x1234)]);
    }

    #[test]
    fn test_windowed_pair_writes_high_word_first() {
        let bus = Arc::new(Recorder::default());
        let stc = Stc::windowed(bus.clone());
        stc.writel(0x0001_0002, regs::stc::AI_SC_LOAD_A);
        assert_eq!(
            bus.log.lock().as_slice(),
            &[('w', 0, 18), ('w', 2, 1), ('w', 0, 19), ('w', 2, 2)]
        );
    }

    #[test]
    fn test_m_series_uses_offset_table() {
        let bus = Arc::new(Recorder::default());
        let stc = Stc::m_series(bus.clone());
        stc.writew(0xbeef, regs::stc::JOINT_RESET);
        stc.writel(7, regs::stc::AI_SC_LOAD_A);
        assert_eq!(
            bus.log.lock().as_slice(),
            &[('w', 0x190, 0xbeef), ('w', 0x124, 7)]
        );
    }

    #[test]
    #[should_panic(expected = "contract violation")]
    fn test_m_series_unmapped_register_is_contract_violation() {
        let stc = Stc::m_series(Arc::new(Recorder::default()));
        stc.writew(0, regs::stc::DIO_CONTROL);
    }
}
