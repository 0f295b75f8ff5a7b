//! DIO serial port (E-series).
//!
//! The STC shifts a byte out on `SDOUT` while shifting one in on `SDIN`
//! at 600 ns, 1.2 µs or 10 µs per bit. Slower clocks are bit-banged
//! through `DIO_Output` and the software serial clock bit.

use std::sync::Arc;
use std::time::Duration;

use comedi_core::wait::{poll_until, udelay};
use comedi_core::{insn_config, ComediError, Insn, Result, SubdeviceOps};
use tracing::{debug, trace};

use crate::attach::subdev;
use crate::device::NiMio;
use crate::dio::DioState;
use crate::regs::{clock_and_fout, dio, joint_status, stc};

/// Hardware serial clock periods in nanoseconds.
pub const SERIAL_600NS: u32 = 600;
/// 1.2 µs hardware serial clock
pub const SERIAL_1_2US: u32 = 1_200;
/// 10 µs hardware serial clock
pub const SERIAL_10US: u32 = 10_000;

/// Polls of the in-progress flag before a hardware transfer times out.
const HW_SERIAL_POLLS: u32 = 20;

/// Program the serial clock. Returns the period actually in effect.
pub(crate) fn set_clock(dev: &NiMio, dio: &mut DioState, interval_ns: u32) -> u32 {
    let mut clock = dev.clock_and_fout.lock();
    let sw_off = dio::HW_SERIAL_ENABLE | dio::SOFTWARE_SERIAL_CONTROL;
    let slow = clock_and_fout::SLOW_INTERNAL_TIMEBASE;
    let div2 = clock_and_fout::DIO_SERIAL_OUT_DIVIDE_BY_2;

    dio.serial_hw_mode = true;
    dio.dio_control |= dio::HW_SERIAL_ENABLE;
    let actual = match interval_ns {
        0 => {
            dio.serial_hw_mode = false;
            dio.dio_control &= !sw_off;
            0
        }
        ns if ns <= SERIAL_600NS => {
            dio.dio_control &= !dio::HW_SERIAL_TIMEBASE;
            *clock = (*clock | slow) & !div2;
            SERIAL_600NS
        }
        ns if ns <= SERIAL_1_2US => {
            dio.dio_control &= !dio::HW_SERIAL_TIMEBASE;
            *clock |= slow | div2;
            SERIAL_1_2US
        }
        ns if ns <= SERIAL_10US => {
            // the divider only matters for the two fast clocks
            dio.dio_control |= dio::HW_SERIAL_TIMEBASE;
            *clock |= slow | div2;
            SERIAL_10US
        }
        ns => {
            dio.serial_hw_mode = false;
            dio.dio_control &= !sw_off;
            ns / 1000 * 1000
        }
    };
    dio.serial_interval_ns = actual;

    let stc = dev.bus.stc();
    stc.writew(dio.dio_control, stc::DIO_CONTROL);
    stc.writew(*clock, stc::CLOCK_AND_FOUT);
    debug!(requested = interval_ns, actual, hw = dio.serial_hw_mode, "serial clock set");
    actual
}

fn bit_delay_us(dio: &DioState) -> u64 {
    u64::from(dio.serial_interval_ns.div_ceil(1000))
}

/// Shift one byte through the STC serial engine.
pub(crate) fn transfer_hw(dev: &NiMio, dio: &mut DioState, out: u8) -> Result<u8> {
    let stc = dev.bus.stc();
    dio.dio_output = (dio.dio_output & !dio::SERIAL_DATA_MASK) | dio::serial_data_out(u32::from(out));
    stc.writew(dio.dio_output, stc::DIO_OUTPUT);

    let in_progress = || stc.readw(stc::JOINT_STATUS_1) & joint_status::DIO_SERIAL_IO_IN_PROGRESS != 0;
    if in_progress() {
        return Err(ComediError::Busy {
            subdevice: subdev::SERIAL,
        });
    }

    stc.writew(dio.dio_control | dio::HW_SERIAL_START, stc::DIO_CONTROL);
    let delay = bit_delay_us(dio);
    let result = poll_until(
        HW_SERIAL_POLLS,
        Duration::from_micros(delay),
        "DIO serial transfer",
        || !in_progress(),
    )
    .map(|_| {
        // the last bit is sampled one clock after the flag drops
        udelay(delay);
        stc.readw(stc::DIO_SERIAL_INPUT) as u8
    });
    stc.writew(dio.dio_control, stc::DIO_CONTROL);
    result
}

/// Bit-bang one byte, MSB first, on the serial pins.
pub(crate) fn transfer_sw(dev: &NiMio, dio: &mut DioState, out: u8) -> u8 {
    let stc = dev.bus.stc();
    let half = (u64::from(dio.serial_interval_ns) + 999) / 2000;
    let mut input = 0u8;
    for bit in (0..8).rev() {
        let mask = 1u8 << bit;
        dio.dio_output &= !(dio::SDOUT as u16);
        if out & mask != 0 {
            dio.dio_output |= dio::SDOUT as u16;
        }
        stc.writew(dio.dio_output, stc::DIO_OUTPUT);

        // SDCLK is active low: assert for half a period, release for the rest
        dio.dio_control |= dio::SOFTWARE_SERIAL_CONTROL;
        stc.writew(dio.dio_control, stc::DIO_CONTROL);
        udelay(half);
        dio.dio_control &= !dio::SOFTWARE_SERIAL_CONTROL;
        stc.writew(dio.dio_control, stc::DIO_CONTROL);
        udelay(half);

        if u32::from(stc.readw(stc::DIO_PARALLEL_INPUT)) & dio::SDIN != 0 {
            input |= mask;
        }
    }
    trace!(out, input, "serial byte bit-banged");
    input
}

/// Operation set of the serial subdevice.
pub(crate) struct SerialOps {
    pub(crate) dev: Arc<NiMio>,
}

impl SubdeviceOps for SerialOps {
    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        match insn.word(0)? {
            insn_config::SERIAL_CLOCK => {
                let requested = insn.word(1)?;
                let actual = set_clock(dev, &mut dev.dio.lock(), requested);
                insn.set_word(1, actual);
                Ok(())
            }
            insn_config::BIDIRECTIONAL_DATA => {
                let out = insn.word(1)? as u8;
                let mut dio = dev.dio.lock();
                if dio.serial_interval_ns == 0 {
                    return Err(ComediError::invalid("serial clock is not configured"));
                }
                let input = if dio.serial_hw_mode {
                    transfer_hw(dev, &mut dio, out)?
                } else {
                    transfer_sw(dev, &mut dio, out)
                };
                insn.set_word(1, u32::from(input));
                Ok(())
            }
            id => Err(ComediError::invalid(format!(
                "serial config instruction {id} not recognised"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRig;
    use comedi_core::{AnalogReference, ChanDesc};

    fn config(rig: &SimRig, data: Vec<u32>) -> Result<Insn> {
        let mut insn = Insn::config(ChanDesc::pack(0, 0, AnalogReference::Ground), data);
        rig.device.insn(subdev::SERIAL, &mut insn).map(|()| insn)
    }

    #[test]
    fn test_clock_snaps_to_hardware_rates() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let insn = config(&rig, vec![insn_config::SERIAL_CLOCK, 500]).unwrap();
        assert_eq!(insn.data[1], SERIAL_600NS);
        let clock = rig.sim.stc_reg(stc::CLOCK_AND_FOUT);
        assert_ne!(clock & clock_and_fout::SLOW_INTERNAL_TIMEBASE, 0);
        assert_eq!(clock & clock_and_fout::DIO_SERIAL_OUT_DIVIDE_BY_2, 0);

        let insn = config(&rig, vec![insn_config::SERIAL_CLOCK, 1_000]).unwrap();
        assert_eq!(insn.data[1], SERIAL_1_2US);
        let clock = rig.sim.stc_reg(stc::CLOCK_AND_FOUT);
        assert_ne!(clock & clock_and_fout::DIO_SERIAL_OUT_DIVIDE_BY_2, 0);

        let insn = config(&rig, vec![insn_config::SERIAL_CLOCK, 5_000]).unwrap();
        assert_eq!(insn.data[1], SERIAL_10US);
        let control = rig.sim.stc_reg(stc::DIO_CONTROL);
        assert_ne!(control & dio::HW_SERIAL_TIMEBASE, 0);
        assert_ne!(control & dio::HW_SERIAL_ENABLE, 0);
    }

    #[test]
    fn test_slow_clock_falls_back_to_software() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let insn = config(&rig, vec![insn_config::SERIAL_CLOCK, 12_345]).unwrap();
        assert_eq!(insn.data[1], 12_000);
        assert!(!rig.driver.dio.lock().serial_hw_mode);
        assert_eq!(rig.sim.stc_reg(stc::DIO_CONTROL) & dio::HW_SERIAL_ENABLE, 0);
    }

    #[test]
    fn test_data_requires_clock() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let err = config(&rig, vec![insn_config::BIDIRECTIONAL_DATA, 0x5a]).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
    }

    #[test]
    fn test_hardware_transfer_reads_serial_input() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.sim.set_serial_input(0xc3);
        config(&rig, vec![insn_config::SERIAL_CLOCK, SERIAL_1_2US]).unwrap();
        let insn = config(&rig, vec![insn_config::BIDIRECTIONAL_DATA, 0x5a]).unwrap();
        assert_eq!(insn.data[1], 0xc3);
        assert_eq!(rig.sim.stc_reg(stc::DIO_OUTPUT) >> 8, 0x5a);
        assert_eq!(rig.sim.stc_reg(stc::DIO_CONTROL) & dio::HW_SERIAL_START, 0);
    }

    #[test]
    fn test_software_transfer_loops_back() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.sim.set_serial_loopback(true);
        config(&rig, vec![insn_config::SERIAL_CLOCK, 20_000]).unwrap();
        let insn = config(&rig, vec![insn_config::BIDIRECTIONAL_DATA, 0xa5]).unwrap();
        assert_eq!(insn.data[1], 0xa5);
    }

    #[test]
    fn test_disable_clears_serial_mode() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        config(&rig, vec![insn_config::SERIAL_CLOCK, SERIAL_600NS]).unwrap();
        let insn = config(&rig, vec![insn_config::SERIAL_CLOCK, 0]).unwrap();
        assert_eq!(insn.data[1], 0);
        assert_eq!(rig.driver.dio.lock().serial_interval_ns, 0);
    }
}
