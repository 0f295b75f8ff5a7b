//! Frequency output: a 4-bit divider of one of two timebases, driven onto
//! the `FREQ_OUT` pin.

use std::sync::Arc;

use comedi_core::{insn_config, ComediError, Insn, Result, SubdeviceOps};
use tracing::debug;

use crate::device::NiMio;
use crate::regs::{clock_and_fout, stc};
use crate::timing::CLOCK_NS;

/// Clock source code of the 20 MHz timebase divided by two.
pub const FOUT_TIMEBASE_1_DIV_2: u32 = 0;
/// Clock source code of the 100 kHz timebase.
pub const FOUT_TIMEBASE_2: u32 = 1;

/// Period of the 100 kHz timebase.
const TIMEBASE_2_NS: u32 = 10_000;

/// Operation set of the frequency output subdevice.
pub(crate) struct FoutOps {
    pub(crate) dev: Arc<NiMio>,
}

impl FoutOps {
    fn write_divider(&self, divider: u32) {
        let mut clock = self.dev.clock_and_fout.lock();
        let stc = self.dev.bus.stc();
        *clock &= !clock_and_fout::FOUT_ENABLE;
        stc.writew(*clock, stc::CLOCK_AND_FOUT);
        *clock &= !clock_and_fout::FOUT_DIVIDER_MASK;
        *clock |= divider as u16 & clock_and_fout::FOUT_DIVIDER_MASK;
        *clock |= clock_and_fout::FOUT_ENABLE;
        stc.writew(*clock, stc::CLOCK_AND_FOUT);
        debug!(divider, "frequency output divider set");
    }

    fn set_clock_source(&self, source: u32) -> Result<()> {
        let mut clock = self.dev.clock_and_fout.lock();
        match source {
            FOUT_TIMEBASE_1_DIV_2 => *clock &= !clock_and_fout::FOUT_TIMEBASE_SELECT,
            FOUT_TIMEBASE_2 => *clock |= clock_and_fout::FOUT_TIMEBASE_SELECT,
            other => {
                return Err(ComediError::invalid(format!(
                    "frequency output has no clock source {other}"
                )))
            }
        }
        self.dev.bus.stc().writew(*clock, stc::CLOCK_AND_FOUT);
        Ok(())
    }
}

impl SubdeviceOps for FoutOps {
    fn insn_read(&self, insn: &mut Insn) -> Result<()> {
        let divider = u32::from(*self.dev.clock_and_fout.lock() & clock_and_fout::FOUT_DIVIDER_MASK);
        insn.data.iter_mut().for_each(|d| *d = divider);
        Ok(())
    }

    fn insn_write(&self, insn: &mut Insn) -> Result<()> {
        if let Some(&divider) = insn.data.last() {
            self.write_divider(divider);
        }
        Ok(())
    }

    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        match insn.word(0)? {
            insn_config::SET_CLOCK_SRC => self.set_clock_source(insn.word(1)?),
            insn_config::GET_CLOCK_SRC => {
                let slow = *self.dev.clock_and_fout.lock() & clock_and_fout::FOUT_TIMEBASE_SELECT != 0;
                let (source, period) = if slow {
                    (FOUT_TIMEBASE_2, TIMEBASE_2_NS)
                } else {
                    (FOUT_TIMEBASE_1_DIV_2, CLOCK_NS * 2)
                };
                insn.set_word(1, source);
                insn.set_word(2, period);
                Ok(())
            }
            id => Err(ComediError::invalid(format!(
                "frequency output config instruction {id} not recognised"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::subdev;
    use crate::sim::SimRig;
    use comedi_core::{AnalogReference, ChanDesc};

    fn chan() -> ChanDesc {
        ChanDesc::pack(0, 0, AnalogReference::Ground)
    }

    #[test]
    fn test_last_value_sets_divider() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let before = rig.sim.stc_writes(stc::CLOCK_AND_FOUT);
        let mut insn = Insn::write(chan(), vec![3, 9]);
        rig.device.insn(subdev::FREQ_OUT, &mut insn).unwrap();
        assert_eq!(rig.sim.stc_writes(stc::CLOCK_AND_FOUT), before + 2);
        let clock = rig.sim.stc_reg(stc::CLOCK_AND_FOUT);
        assert_eq!(clock & clock_and_fout::FOUT_DIVIDER_MASK, 9);
        assert_ne!(clock & clock_and_fout::FOUT_ENABLE, 0);

        let mut insn = Insn::read(chan(), 1);
        rig.device.insn(subdev::FREQ_OUT, &mut insn).unwrap();
        assert_eq!(insn.data, vec![9]);
    }

    #[test]
    fn test_clock_source_round_trip() {
        let rig = SimRig::polled("pci-6221").unwrap();
        let mut insn = Insn::config(chan(), vec![insn_config::SET_CLOCK_SRC, FOUT_TIMEBASE_2]);
        rig.device.insn(subdev::FREQ_OUT, &mut insn).unwrap();
        let mut insn = Insn::config(chan(), vec![insn_config::GET_CLOCK_SRC, 0, 0]);
        rig.device.insn(subdev::FREQ_OUT, &mut insn).unwrap();
        assert_eq!(&insn.data[1..], &[FOUT_TIMEBASE_2, 10_000]);

        let mut insn = Insn::config(chan(), vec![insn_config::SET_CLOCK_SRC, FOUT_TIMEBASE_1_DIV_2]);
        rig.device.insn(subdev::FREQ_OUT, &mut insn).unwrap();
        let mut insn = Insn::config(chan(), vec![insn_config::GET_CLOCK_SRC, 0, 0]);
        rig.device.insn(subdev::FREQ_OUT, &mut insn).unwrap();
        assert_eq!(&insn.data[1..], &[FOUT_TIMEBASE_1_DIV_2, 100]);
    }

    #[test]
    fn test_unknown_clock_source_rejected() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut insn = Insn::config(chan(), vec![insn_config::SET_CLOCK_SRC, 7]);
        let err = rig.device.insn(subdev::FREQ_OUT, &mut insn).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
    }
}
