//! Calibration subdevice.
//!
//! E-series and 611x boards trim their analog paths with a chain of serial
//! calibration DACs clocked through `Serial_Command`. Each DAC has its own
//! load strobe; channel numbers run across the chain in order.
//!
//! M-series boards and the 6143 have no caldacs. Their calibration
//! subdevice drives an internal PWM source instead, with high and low times
//! counted in 50 ns ticks.

use std::sync::Arc;

use comedi_core::wait::udelay;
use comedi_core::{insn_config, CmdFlags, ComediError, Insn, Result, RoundMode, SubdeviceOps};
use tracing::{debug, trace};

use crate::board::{BoardInfo, BoardKind, CaldacKind};
use crate::device::NiMio;
use crate::regs::{board, m_series, r6143};
use crate::timing::CLOCK_NS;

/// Calibration state: caldac soft copies and the PWM counts.
#[derive(Debug, Clone, Default)]
pub(crate) struct CalState {
    /// Last value loaded into each caldac channel; `None` until loaded
    pub(crate) caldacs: Vec<Option<u32>>,
    pub(crate) pwm_up: u32,
    pub(crate) pwm_down: u32,
}

impl CalState {
    pub(crate) fn for_board(board: &BoardInfo) -> Self {
        Self {
            caldacs: vec![None; n_caldac_channels(board) as usize],
            ..Self::default()
        }
    }
}

/// Channels across the board's caldac chain.
pub(crate) fn n_caldac_channels(board: &BoardInfo) -> u32 {
    board.caldacs.iter().map(|c| c.n_chans()).sum()
}

/// Resolution of the widest caldac in the chain.
pub(crate) fn caldac_bits(board: &BoardInfo) -> u32 {
    board.caldacs.iter().map(|c| c.n_bits()).max().unwrap_or(0)
}

/// DAC index, DAC type and DAC-relative address of a chain channel.
fn locate(board: &BoardInfo, chan: u32) -> Option<(usize, CaldacKind, u32)> {
    let mut addr = chan;
    for (i, &kind) in board.caldacs.iter().enumerate() {
        if addr < kind.n_chans() {
            return Some((i, kind, addr));
        }
        addr -= kind.n_chans();
    }
    None
}

/// Shift a value into one caldac channel. Unchanged values are not resent.
pub(crate) fn write_caldac(dev: &NiMio, cal: &mut CalState, chan: u32, value: u32) -> Result<()> {
    let slot = cal
        .caldacs
        .get_mut(chan as usize)
        .ok_or_else(|| ComediError::invalid(format!("caldac channel {chan} out of range")))?;
    if *slot == Some(value) {
        return Ok(());
    }
    let (dac, kind, addr) = locate(dev.board, chan)
        .ok_or_else(|| ComediError::invalid(format!("caldac channel {chan} out of range")))?;
    let (word, bits) = kind.pack(addr, value);

    let io = dev.bus.io();
    for bit in (0..bits).rev() {
        let data = if word & (1 << bit) != 0 {
            board::SERIAL_DATA
        } else {
            0
        };
        io.write8(board::SERIAL_COMMAND, data);
        udelay(1);
        io.write8(board::SERIAL_COMMAND, board::SERIAL_CLOCK | data);
        udelay(1);
    }
    io.write8(board::SERIAL_COMMAND, board::ser_dac_ld(dac));
    udelay(1);
    io.write8(board::SERIAL_COMMAND, 0);

    *slot = Some(value);
    trace!(chan, dac, addr, value, "caldac loaded");
    Ok(())
}

/// Put every caldac channel at mid-scale.
pub(crate) fn caldac_setup(dev: &NiMio) -> Result<()> {
    let mut cal = dev.cal.lock();
    let mut chan = 0;
    for kind in dev.board.caldacs {
        for _ in 0..kind.n_chans() {
            write_caldac(dev, &mut cal, chan, (1 << kind.n_bits()) / 2)?;
            chan += 1;
        }
    }
    debug!(channels = chan, "caldacs at mid-scale");
    Ok(())
}

/// Park the M-series PWM source.
pub(crate) fn init_pwm(dev: &NiMio) {
    dev.bus.io().write32(m_series::CAL_PWM, 0);
    let mut cal = dev.cal.lock();
    cal.pwm_up = 0;
    cal.pwm_down = 0;
}

fn round_mode(code: u32) -> Result<RoundMode> {
    match code {
        0 => Ok(RoundMode::Nearest),
        c if c == CmdFlags::ROUND_DOWN.bits() => Ok(RoundMode::Down),
        c if c == CmdFlags::ROUND_UP.bits() => Ok(RoundMode::Up),
        other => Err(ComediError::invalid(format!("rounding mode 0x{other:x} not recognised"))),
    }
}

fn pwm_ticks(ns: u32, round: RoundMode) -> u32 {
    let ns = u64::from(ns);
    let clk = u64::from(CLOCK_NS);
    let ticks = match round {
        RoundMode::Nearest => (ns + clk / 2) / clk,
        RoundMode::Down => ns / clk,
        RoundMode::Up => ns.div_ceil(clk),
    };
    ticks.min(u64::from(u32::MAX / CLOCK_NS)) as u32
}

/// Operation set of the calibration subdevice.
pub(crate) struct CalOps {
    pub(crate) dev: Arc<NiMio>,
}

impl CalOps {
    fn has_pwm(&self) -> bool {
        matches!(self.dev.board.kind, BoardKind::MSeries | BoardKind::Pci6143)
    }

    fn set_pwm(&self, insn: &mut Insn) -> Result<()> {
        let high_ns = insn.word(2)?;
        let low_ns = insn.word(4)?;
        let up = pwm_ticks(high_ns, round_mode(insn.word(1)?)?);
        let down = pwm_ticks(low_ns, round_mode(insn.word(3)?)?);

        if up * CLOCK_NS != high_ns || down * CLOCK_NS != low_ns {
            insn.set_word(2, up * CLOCK_NS);
            insn.set_word(4, down * CLOCK_NS);
            return Err(ComediError::Again {
                message: format!(
                    "PWM times quantised to {} ns high, {} ns low",
                    up * CLOCK_NS,
                    down * CLOCK_NS
                ),
            });
        }

        let dev = &*self.dev;
        let io = dev.bus.io();
        if dev.board.is_m_series() {
            io.write32(m_series::CAL_PWM, (up << 16) | (down & 0xffff));
        } else {
            io.write32(r6143::CALIBRATION_HIGH_TIME, up);
            io.write32(r6143::CALIBRATION_LOW_TIME, down);
        }
        let mut cal = dev.cal.lock();
        cal.pwm_up = up;
        cal.pwm_down = down;
        debug!(high_ns, low_ns, "calibration PWM set");
        Ok(())
    }
}

impl SubdeviceOps for CalOps {
    fn insn_read(&self, insn: &mut Insn) -> Result<()> {
        let cal = self.dev.cal.lock();
        let value = cal
            .caldacs
            .get(insn.chan_desc.chan() as usize)
            .copied()
            .flatten()
            .unwrap_or(0);
        insn.data.iter_mut().for_each(|d| *d = value);
        Ok(())
    }

    fn insn_write(&self, insn: &mut Insn) -> Result<()> {
        let value = insn.word(0)?;
        let mut cal = self.dev.cal.lock();
        write_caldac(&self.dev, &mut cal, insn.chan_desc.chan(), value)
    }

    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        if !self.has_pwm() {
            return Err(ComediError::not_supported("calibration config"));
        }
        match insn.word(0)? {
            insn_config::PWM_OUTPUT => self.set_pwm(insn),
            insn_config::GET_PWM_OUTPUT => {
                let cal = self.dev.cal.lock();
                insn.set_word(1, cal.pwm_up * CLOCK_NS);
                insn.set_word(2, cal.pwm_down * CLOCK_NS);
                Ok(())
            }
            id => Err(ComediError::invalid(format!(
                "calibration config instruction {id} not recognised"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::subdev;
    use crate::sim::{CaldacLoad, SimRig};
    use comedi_core::{AnalogReference, ChanDesc};

    fn chan(n: u32) -> ChanDesc {
        ChanDesc::pack(n, 0, AnalogReference::Ground)
    }

    #[test]
    fn test_attach_loads_mid_scale() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let loads = rig.sim.caldac_loads();
        assert_eq!(loads.len(), 26);
        assert_eq!(
            loads[0],
            CaldacLoad {
                dac: 0,
                word: 0x080,
                bits: 12
            }
        );
        assert_eq!(
            loads[25],
            CaldacLoad {
                dac: 2,
                word: 0xc800,
                bits: 16
            }
        );
    }

    #[test]
    fn test_write_routes_through_chain() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let before = rig.sim.caldac_loads().len();
        let mut insn = Insn::write(chan(13), vec![0x42]);
        rig.device.insn(subdev::CALIB, &mut insn).unwrap();
        let loads = rig.sim.caldac_loads();
        assert_eq!(loads.len(), before + 1);
        assert_eq!(
            loads[before],
            CaldacLoad {
                dac: 1,
                word: 0x142,
                bits: 12
            }
        );

        let mut insn = Insn::read(chan(13), 1);
        rig.device.insn(subdev::CALIB, &mut insn).unwrap();
        assert_eq!(insn.data, vec![0x42]);
    }

    #[test]
    fn test_unchanged_value_not_resent() {
        let rig = SimRig::polled("pci-mio-16e-1").unwrap();
        let before = rig.sim.caldac_loads().len();
        let mut insn = Insn::write(chan(4), vec![128]);
        rig.device.insn(subdev::CALIB, &mut insn).unwrap();
        assert_eq!(rig.sim.caldac_loads().len(), before);
    }

    #[test]
    fn test_e_series_has_no_pwm() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut insn = Insn::config(chan(0), vec![insn_config::GET_PWM_OUTPUT, 0, 0]);
        let err = rig.device.insn(subdev::CALIB, &mut insn).unwrap_err();
        assert!(matches!(err, ComediError::NotSupported { .. }));
    }

    #[test]
    fn test_m_series_pwm_exact() {
        let rig = SimRig::polled("pci-6221").unwrap();
        assert_eq!(rig.sim.board_reg(m_series::CAL_PWM), 0);
        let mut insn = Insn::config(chan(0), vec![insn_config::PWM_OUTPUT, 0, 1_000, 0, 2_000]);
        rig.device.insn(subdev::CALIB, &mut insn).unwrap();
        assert_eq!(rig.sim.board_reg(m_series::CAL_PWM), (20 << 16) | 40);

        let mut insn = Insn::config(chan(0), vec![insn_config::GET_PWM_OUTPUT, 0, 0]);
        rig.device.insn(subdev::CALIB, &mut insn).unwrap();
        assert_eq!(&insn.data[1..], &[1_000, 2_000]);
    }

    #[test]
    fn test_pwm_quantisation_reported() {
        let rig = SimRig::polled("pci-6221").unwrap();
        let up = CmdFlags::ROUND_UP.bits();
        let mut insn = Insn::config(chan(0), vec![insn_config::PWM_OUTPUT, 0, 1_020, up, 2_010]);
        let err = rig.device.insn(subdev::CALIB, &mut insn).unwrap_err();
        assert!(matches!(err, ComediError::Again { .. }));
        assert_eq!(insn.data[2], 1_000);
        assert_eq!(insn.data[4], 2_050);
        // nothing was programmed
        assert_eq!(rig.sim.board_reg(m_series::CAL_PWM), 0);
    }

    #[test]
    fn test_6143_pwm_registers() {
        let rig = SimRig::polled("pci-6143").unwrap();
        let down = CmdFlags::ROUND_DOWN.bits();
        let mut insn = Insn::config(chan(0), vec![insn_config::PWM_OUTPUT, down, 500, down, 150]);
        rig.device.insn(subdev::CALIB, &mut insn).unwrap();
        assert_eq!(rig.sim.board_reg(r6143::CALIBRATION_HIGH_TIME), 10);
        assert_eq!(rig.sim.board_reg(r6143::CALIBRATION_LOW_TIME), 3);
    }

    #[test]
    fn test_bad_round_mode() {
        let rig = SimRig::polled("pci-6221").unwrap();
        let mut insn = Insn::config(chan(0), vec![insn_config::PWM_OUTPUT, 7, 1_000, 0, 1_000]);
        let err = rig.device.insn(subdev::CALIB, &mut insn).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
    }
}
