//! 8255 programmable peripheral interface.
//!
//! Three 8-bit ports behind a byte-wide register window; port C splits
//! into two nibbles with independent direction. The board supplies the
//! register access through [`PortIo`].

use std::fmt;
use std::sync::Arc;

use comedi_core::{insn_config, ComediError, Insn, Result, SubdeviceOps};
use parking_lot::Mutex;
use tracing::trace;

use crate::attach::subdev;
use crate::device::Bus;
use crate::dio::{check_line, DIO_QUERY_INPUT, DIO_QUERY_OUTPUT};
use crate::regs::board;

/// Lines of an 8255.
pub const N_LINES: u32 = 24;

/// Register index of the control word.
const CONTROL: u32 = 3;

/// Control word bits.
mod control {
    pub const MODE_SET: u8 = 0x80;
    pub const PORT_A_INPUT: u8 = 0x10;
    pub const PORT_C_HIGH_INPUT: u8 = 0x08;
    pub const PORT_B_INPUT: u8 = 0x02;
    pub const PORT_C_LOW_INPUT: u8 = 0x01;
}

/// Byte access to the four 8255 registers.
pub trait PortIo: Send + Sync {
    /// Write register `port` (0..=3).
    fn write_port(&self, port: u32, value: u8);
    /// Read register `port` (0..=2).
    fn read_port(&self, port: u32) -> u8;
}

/// The 8255 of an E-series board, at every other byte from `Port_A`.
pub(crate) struct BoardPorts {
    pub(crate) bus: Arc<Bus>,
}

impl PortIo for BoardPorts {
    fn write_port(&self, port: u32, value: u8) {
        self.bus.io().write8(board::PORT_A + 2 * port, value);
    }

    fn read_port(&self, port: u32) -> u8 {
        self.bus.io().read8(board::PORT_A + 2 * port)
    }
}

#[derive(Debug, Default)]
struct PortState {
    io_bits: u32,
    state: u32,
}

/// Direction group a line belongs to.
fn group_mask(line: u32) -> u32 {
    match line {
        0..=7 => 0x0000ff,
        8..=15 => 0x00ff00,
        16..=19 => 0x0f0000,
        _ => 0xf00000,
    }
}

fn control_word(io_bits: u32) -> u8 {
    let mut word = control::MODE_SET;
    if io_bits & 0x0000ff == 0 {
        word |= control::PORT_A_INPUT;
    }
    if io_bits & 0x00ff00 == 0 {
        word |= control::PORT_B_INPUT;
    }
    if io_bits & 0x0f0000 == 0 {
        word |= control::PORT_C_LOW_INPUT;
    }
    if io_bits & 0xf00000 == 0 {
        word |= control::PORT_C_HIGH_INPUT;
    }
    word
}

/// Operation set of an 8255 subdevice.
pub struct Port8255 {
    io: Box<dyn PortIo>,
    state: Mutex<PortState>,
}

impl Port8255 {
    /// Wrap `io` and put every port in input mode.
    pub fn new(io: Box<dyn PortIo>) -> Self {
        let ports = Self {
            io,
            state: Mutex::new(PortState::default()),
        };
        ports.io.write_port(CONTROL, control_word(0));
        ports
    }
}

impl SubdeviceOps for Port8255 {
    fn insn_bits(&self, insn: &mut Insn) -> Result<()> {
        let mask = insn.word(0)?;
        let bits = insn.word(1)?;
        let mut st = self.state.lock();
        if mask != 0 {
            st.state = (st.state & !mask) | (bits & mask);
            for port in 0..3 {
                if mask & (0xff << (8 * port)) != 0 {
                    self.io.write_port(port, (st.state >> (8 * port)) as u8);
                }
            }
        }
        let input = (0..3).fold(0u32, |acc, port| {
            acc | u32::from(self.io.read_port(port)) << (8 * port)
        });
        trace!(mask, bits, input, "8255 bits");
        insn.set_word(1, input);
        Ok(())
    }

    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        let line = check_line(subdev::DIO_8255, insn.chan_desc, N_LINES)?;
        // direction is per port (per nibble on port C), not per line
        let group = group_mask(line);
        let mut st = self.state.lock();
        match insn.word(0)? {
            insn_config::DIO_OUTPUT => st.io_bits |= group,
            insn_config::DIO_INPUT => st.io_bits &= !group,
            insn_config::DIO_QUERY => {
                let dir = if st.io_bits & group != 0 {
                    DIO_QUERY_OUTPUT
                } else {
                    DIO_QUERY_INPUT
                };
                insn.set_word(1, dir);
                return Ok(());
            }
            id => {
                return Err(ComediError::invalid(format!(
                    "8255 config instruction {id} not recognised"
                )))
            }
        }
        self.io.write_port(CONTROL, control_word(st.io_bits));
        Ok(())
    }
}

impl fmt::Debug for Port8255 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Port8255")
            .field("io_bits", &format_args!("0x{:06x}", st.io_bits))
            .field("state", &format_args!("0x{:06x}", st.state))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comedi_core::{AnalogReference, ChanDesc};

    fn line(n: u32) -> ChanDesc {
        ChanDesc::pack(n, 0, AnalogReference::Ground)
    }

    #[derive(Default)]
    struct FakePorts {
        regs: Mutex<[u8; 4]>,
        inputs: Mutex<[u8; 3]>,
    }

    impl PortIo for Arc<FakePorts> {
        fn write_port(&self, port: u32, value: u8) {
            self.regs.lock()[port as usize] = value;
        }

        fn read_port(&self, port: u32) -> u8 {
            let regs = self.regs.lock();
            let control = regs[CONTROL as usize];
            let input = match port {
                0 => control & control::PORT_A_INPUT != 0,
                1 => control & control::PORT_B_INPUT != 0,
                _ => control & control::PORT_C_LOW_INPUT != 0,
            };
            if input {
                self.inputs.lock()[port as usize]
            } else {
                regs[port as usize]
            }
        }
    }

    fn ports() -> (Arc<FakePorts>, Port8255) {
        let fake = Arc::new(FakePorts::default());
        let p = Port8255::new(Box::new(Arc::clone(&fake)));
        (fake, p)
    }

    #[test]
    fn test_powers_up_all_inputs() {
        let (fake, _p) = ports();
        assert_eq!(fake.regs.lock()[3], 0x9b);
    }

    #[test]
    fn test_output_line_switches_whole_port() {
        let (fake, p) = ports();
        let mut insn = Insn::config(line(9), vec![insn_config::DIO_OUTPUT]);
        p.insn_config(&mut insn).unwrap();
        assert_eq!(fake.regs.lock()[3], 0x99);

        let mut insn = Insn::config(line(15), vec![insn_config::DIO_QUERY, 0]);
        p.insn_config(&mut insn).unwrap();
        assert_eq!(insn.data[1], 1);

        let mut insn = Insn::config(line(21), vec![insn_config::DIO_OUTPUT]);
        p.insn_config(&mut insn).unwrap();
        assert_eq!(fake.regs.lock()[3], 0x91);
    }

    #[test]
    fn test_bits_write_touched_ports_only() {
        let (fake, p) = ports();
        fake.inputs.lock()[0] = 0x3c;
        let mut insn = Insn::config(line(8), vec![insn_config::DIO_OUTPUT]);
        p.insn_config(&mut insn).unwrap();

        let mut insn = Insn::bits(0x00ff00, 0x00a500);
        p.insn_bits(&mut insn).unwrap();
        assert_eq!(fake.regs.lock()[1], 0xa5);
        assert_eq!(fake.regs.lock()[0], 0);
        assert_eq!(insn.data[1], 0x00a53c);
    }

    #[test]
    fn test_line_out_of_range() {
        let (_fake, p) = ports();
        let mut insn = Insn::config(line(24), vec![insn_config::DIO_INPUT]);
        assert!(p.insn_config(&mut insn).is_err());
    }
}
