//! Programmable function inputs.
//!
//! Every PFI pin can be an input or drive an internal signal out. The
//! direction lives in `IO_Bidirection_Pin` (a shared bitfield). E-series
//! pins carry a fixed signal each; M-series pins select their signal from
//! a 5-bit routing field, three pins per output-select register, and can
//! also be driven statically and debounced.

use std::sync::Arc;

use comedi_core::{insn_config, ComediError, Insn, Result, SubdeviceOps};
use tracing::debug;

use crate::attach::subdev;
use crate::board::BoardInfo;
use crate::device::{Bitfield, NiMio};
use crate::dio::{check_line, DIO_QUERY_INPUT, DIO_QUERY_OUTPUT};
use crate::regs::m_series;

/// Signals a PFI pin can drive.
#[allow(missing_docs)]
pub mod source {
    pub const DEFAULT: u32 = 0;
    pub const AI_START1: u32 = 1;
    pub const AI_START2: u32 = 2;
    pub const AI_CONVERT: u32 = 3;
    pub const G_SRC1: u32 = 4;
    pub const G_GATE1: u32 = 5;
    pub const AO_UPDATE_N: u32 = 6;
    pub const AO_START1: u32 = 7;
    pub const AI_START_PULSE: u32 = 8;
    pub const G_SRC0: u32 = 9;
    pub const G_GATE0: u32 = 10;
    pub const EXT_STROBE: u32 = 11;
    pub const AI_EXT_MUX_CLK: u32 = 12;
    pub const GOUT0: u32 = 13;
    pub const GOUT1: u32 = 14;
    pub const FREQ_OUT: u32 = 15;
    pub const PFI_DO: u32 = 16;
    pub const CDO_UPDATE: u32 = 30;
}

/// E-series pin assignment, indexed by pin.
const E_SERIES_ROUTING: [u32; 10] = [
    source::AI_START1,
    source::AI_START2,
    source::AI_CONVERT,
    source::G_SRC1,
    source::G_GATE1,
    source::AO_UPDATE_N,
    source::AO_START1,
    source::AI_START_PULSE,
    source::G_SRC0,
    source::G_GATE0,
];

const M_SERIES_PFI_CHANNELS: u32 = 16;
const OUTPUT_SELECT_REGS: usize = 6;
const SOURCE_MASK: u16 = 0x1f;

/// PFI soft copies.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct PfiState {
    pub(crate) output_select: [u16; OUTPUT_SELECT_REGS],
    pub(crate) state: u16,
}

/// PFI pins of a board.
pub(crate) fn n_channels(board: &BoardInfo) -> u32 {
    if board.is_m_series() {
        M_SERIES_PFI_CHANNELS
    } else {
        E_SERIES_ROUTING.len() as u32
    }
}

fn select_shift(chan: u32) -> u32 {
    (chan % 3) * 5
}

/// Put every pin in input mode and write the M-series soft copies out.
pub(crate) fn init(dev: &NiMio) {
    let mut pfi = dev.pfi.lock();
    *pfi = PfiState::default();
    if dev.board.is_m_series() {
        let io = dev.bus.io();
        io.write16(m_series::PFI_DO, pfi.state);
        for (i, &reg) in pfi.output_select.iter().enumerate() {
            io.write16(m_series::pfi_output_select(i as u32 + 1), reg);
        }
    }
    dev.bus.set_bitfield(Bitfield::IoBidirectionPin, !0, 0);
}

/// Operation set of the PFI subdevice.
pub(crate) struct PfiOps {
    pub(crate) dev: Arc<NiMio>,
}

impl PfiOps {
    fn routing(&self, chan: u32) -> u32 {
        if self.dev.board.is_m_series() {
            let reg = self.dev.pfi.lock().output_select[chan as usize / 3];
            u32::from((reg >> select_shift(chan)) & SOURCE_MASK)
        } else {
            E_SERIES_ROUTING[chan as usize]
        }
    }

    fn set_routing(&self, chan: u32, signal: u32) -> Result<()> {
        let dev = &*self.dev;
        if !dev.board.is_m_series() {
            if signal != E_SERIES_ROUTING[chan as usize] {
                return Err(ComediError::invalid(format!(
                    "PFI{chan} is wired to signal {}",
                    E_SERIES_ROUTING[chan as usize]
                )));
            }
            return Ok(());
        }
        if signal & u32::from(SOURCE_MASK) != signal {
            return Err(ComediError::invalid(format!("PFI signal {signal} out of range")));
        }
        let index = chan as usize / 3;
        let shift = select_shift(chan);
        let mut pfi = dev.pfi.lock();
        let reg = &mut pfi.output_select[index];
        *reg = (*reg & !(SOURCE_MASK << shift)) | ((signal as u16) << shift);
        dev.bus
            .io()
            .write16(m_series::pfi_output_select(index as u32 + 1), *reg);
        debug!(chan, signal, "PFI routed");
        Ok(())
    }

    fn set_filter(&self, chan: u32, filter: u32) -> Result<()> {
        let dev = &*self.dev;
        if !dev.board.is_m_series() {
            return Err(ComediError::not_supported("PFI filter"));
        }
        let io = dev.bus.io();
        let shift = 2 * chan;
        let bits = io.read32(m_series::PFI_FILTER);
        let bits = (bits & !(0x3 << shift)) | ((filter & 0x3) << shift);
        io.write32(m_series::PFI_FILTER, bits);
        Ok(())
    }
}

impl SubdeviceOps for PfiOps {
    fn insn_bits(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        if !dev.board.is_m_series() {
            return Err(ComediError::not_supported("PFI static lines"));
        }
        let mask = insn.word(0)?;
        let bits = insn.word(1)?;
        let io = dev.bus.io();
        if mask != 0 {
            let mut pfi = dev.pfi.lock();
            pfi.state = (pfi.state & !(mask as u16)) | (bits & mask) as u16;
            io.write16(m_series::PFI_DO, pfi.state);
        }
        insn.set_word(1, u32::from(io.read16(m_series::PFI_DI)));
        Ok(())
    }

    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        let chan = check_line(subdev::PFI, insn.chan_desc, n_channels(self.dev.board))?;
        let bus = &self.dev.bus;
        match insn.word(0)? {
            insn_config::DIO_OUTPUT => bus.set_bits(Bitfield::IoBidirectionPin, 1 << chan, true),
            insn_config::DIO_INPUT => bus.set_bits(Bitfield::IoBidirectionPin, 1 << chan, false),
            insn_config::DIO_QUERY => {
                let out = bus.shadow().io_bidirection_pin & (1 << chan) != 0;
                insn.set_word(1, if out { DIO_QUERY_OUTPUT } else { DIO_QUERY_INPUT });
            }
            insn_config::SET_ROUTING => self.set_routing(chan, insn.word(1)?)?,
            insn_config::GET_ROUTING => insn.set_word(1, self.routing(chan)),
            insn_config::FILTER => self.set_filter(chan, insn.word(1)?)?,
            id => {
                return Err(ComediError::invalid(format!(
                    "PFI config instruction {id} not recognised"
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::stc;
    use crate::sim::SimRig;
    use comedi_core::{AnalogReference, ChanDesc};

    fn config(rig: &SimRig, chan: u32, data: Vec<u32>) -> Result<Insn> {
        let mut insn = Insn::config(ChanDesc::pack(chan, 0, AnalogReference::Ground), data);
        rig.device.insn(subdev::PFI, &mut insn).map(|()| insn)
    }

    #[test]
    fn test_direction_through_bidirection_pin() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        assert_eq!(rig.sim.stc_reg(stc::IO_BIDIRECTION_PIN), 0);
        config(&rig, 3, vec![insn_config::DIO_OUTPUT]).unwrap();
        config(&rig, 9, vec![insn_config::DIO_OUTPUT]).unwrap();
        config(&rig, 3, vec![insn_config::DIO_INPUT]).unwrap();
        assert_eq!(rig.sim.stc_reg(stc::IO_BIDIRECTION_PIN), 1 << 9);

        let insn = config(&rig, 9, vec![insn_config::DIO_QUERY, 0]).unwrap();
        assert_eq!(insn.data[1], DIO_QUERY_OUTPUT);
        let insn = config(&rig, 3, vec![insn_config::DIO_QUERY, 0]).unwrap();
        assert_eq!(insn.data[1], DIO_QUERY_INPUT);
    }

    #[test]
    fn test_e_series_routing_is_fixed() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let insn = config(&rig, 2, vec![insn_config::GET_ROUTING, 0]).unwrap();
        assert_eq!(insn.data[1], source::AI_CONVERT);
        config(&rig, 2, vec![insn_config::SET_ROUTING, source::AI_CONVERT]).unwrap();
        let err = config(&rig, 2, vec![insn_config::SET_ROUTING, source::GOUT0]).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
        assert!(config(&rig, 10, vec![insn_config::DIO_INPUT]).is_err());
    }

    #[test]
    fn test_m_series_routing_packs_three_per_register() {
        let rig = SimRig::polled("pci-6221").unwrap();
        config(&rig, 4, vec![insn_config::SET_ROUTING, source::GOUT0]).unwrap();
        config(&rig, 5, vec![insn_config::SET_ROUTING, source::FREQ_OUT]).unwrap();
        let reg = rig.sim.board_reg(m_series::pfi_output_select(2));
        assert_eq!(reg, (source::GOUT0 << 5) | (source::FREQ_OUT << 10));

        let insn = config(&rig, 5, vec![insn_config::GET_ROUTING, 0]).unwrap();
        assert_eq!(insn.data[1], source::FREQ_OUT);
        let err = config(&rig, 5, vec![insn_config::SET_ROUTING, 32]).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
    }

    #[test]
    fn test_m_series_filter() {
        let rig = SimRig::polled("pci-6221").unwrap();
        config(&rig, 1, vec![insn_config::FILTER, 2]).unwrap();
        config(&rig, 3, vec![insn_config::FILTER, 3]).unwrap();
        assert_eq!(rig.sim.board_reg(m_series::PFI_FILTER), (2 << 2) | (3 << 6));

        let e = SimRig::polled("pci-6052e").unwrap();
        let err = config(&e, 1, vec![insn_config::FILTER, 2]).unwrap_err();
        assert!(matches!(err, ComediError::NotSupported { .. }));
    }

    #[test]
    fn test_m_series_static_lines() {
        let rig = SimRig::polled("pci-6251").unwrap();
        rig.sim.set_pfi_inputs(0x8001);
        let mut insn = Insn::bits(0x00f0, 0x0050);
        rig.device.insn(subdev::PFI, &mut insn).unwrap();
        assert_eq!(rig.sim.board_reg(m_series::PFI_DO), 0x0050);
        assert_eq!(insn.data[1], 0x8001);

        let e = SimRig::polled("pci-6052e").unwrap();
        let mut insn = Insn::bits(0, 0);
        assert!(e.device.insn(subdev::PFI, &mut insn).is_err());
    }
}
