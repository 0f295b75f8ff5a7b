//! AI sequencer programming for a validated command.

use std::sync::Arc;

use comedi_core::{ChanDesc, ChanFlags, CmdFlags, ComediError, Command, Result, RoundMode, TrigSrc};
use tracing::{debug, warn};

use super::{clear_fifo, reset, AiMode, AiMunge, AiState, AI_ACKS};
use crate::device::{Bitfield, NiMio};
use crate::dma::DmaRole;
use crate::regs::{
    ai_command_1, ai_command_2, ai_mode_1, ai_mode_2, ai_mode_3, ai_start_stop as ss,
    ai_trigger_select as ats, analog_trigger_etc, joint_reset, stc, IntAEnable,
};
use crate::timing::ns_to_timer;

/// Program, arm and (for a `NOW` start) start the acquisition.
///
/// The channel list is loaded and the munge installed before anything is
/// armed, and the DMA channel is claimed before the counters arm so no
/// sample can land ahead of its consumer.
pub(crate) fn program(dev: &NiMio, ai: &mut AiState, cmd: &Command) -> Result<()> {
    if !dev.has_irq() {
        return Err(ComediError::NoIrq);
    }
    let stc = dev.bus.stc();
    let board = dev.board;
    let nb_chan = cmd.nb_chan();
    let transfer = &dev.transfers.ai;
    let dma = dev.uses_dma();

    clear_fifo(dev);
    dev.family.load_chanlist(dev, ai, &cmd.chan_descs)?;
    transfer.set_munge(Some(Arc::new(AiMunge::new(
        ai.offsets.clone(),
        transfer.sample_size(),
    ))));

    stc.writew(joint_reset::AI_CONFIGURATION_START, stc::JOINT_RESET);

    ai.analog_trigger_etc &= !analog_trigger_etc::ANALOG_TRIGGER_ENABLE;
    stc.writew(ai.analog_trigger_etc, stc::ANALOG_TRIGGER_ETC);

    let trigger = match cmd.start_src {
        TrigSrc::EXT => {
            let arg = ChanDesc::from_raw(cmd.start_arg);
            let mut bits = ats::start2_select(0) | ats::START1_SYNC | ats::start1_select(arg.chan() + 1);
            if arg.has(ChanFlags::INVERT) {
                bits |= ats::START1_POLARITY;
            }
            if arg.has(ChanFlags::EDGE) {
                bits |= ats::START1_EDGE;
            }
            bits
        }
        _ => ats::start2_select(0) | ats::START1_SYNC | ats::START1_EDGE | ats::start1_select(0),
    };
    stc.writew(trigger, stc::AI_TRIGGER_SELECT);

    let mut mode2 = 0;
    stc.writew(mode2, stc::AI_MODE_2);

    let mut start_stop = if nb_chan == 1 || dev.family.simultaneous() {
        ss::STOP_POLARITY | ss::stop_select(31) | ss::STOP_SYNC
    } else {
        ss::stop_select(19)
    };
    stc.writew(start_stop, stc::AI_START_STOP_SELECT);

    let mut int_en = IntAEnable::AI_ERROR | IntAEnable::AI_SC_TC;
    ai.cmd2 = 0;
    let mut mode1 = ai_mode_1::START_STOP | ai_mode_1::RESERVED;
    if cmd.stop_src == TrigSrc::COUNT {
        let stop_count = cmd.stop_arg.saturating_sub(1) + board.adc_stages();
        stc.writel(stop_count, stc::AI_SC_LOAD_A);
        mode1 |= ai_mode_1::TRIGGER_ONCE;
        stc.writew(mode1, stc::AI_MODE_1);
        stc.writew(ai_command_1::SC_LOAD, stc::AI_COMMAND_1);
        ai.continuous = false;
        if stop_count == 0 {
            ai.cmd2 |= ai_command_2::END_ON_END_OF_SCAN;
            int_en |= IntAEnable::AI_STOP;
            // the last sample of a multi-channel single scan needs the
            // stop edge
            if nb_chan > 1 {
                start_stop |= ss::STOP_POLARITY | ss::STOP_EDGE;
            }
        }
    } else {
        stc.writel(0, stc::AI_SC_LOAD_A);
        mode1 |= ai_mode_1::CONTINUOUS;
        stc.writew(mode1, stc::AI_MODE_1);
        stc.writew(ai_command_1::SC_LOAD, stc::AI_COMMAND_1);
        ai.continuous = true;
    }

    match cmd.scan_begin_src {
        TrigSrc::TIMER => {
            start_stop |= ss::START_EDGE | ss::START_SYNC;
            stc.writew(start_stop, stc::AI_START_STOP_SELECT);
            mode2 |= ai_mode_2::si_reload_mode(0);
            stc.writew(mode2, stc::AI_MODE_2);
            let timer = ns_to_timer(cmd.scan_begin_arg, RoundMode::Nearest);
            stc.writel(timer, stc::AI_SI_LOAD_A);
            stc.writew(ai_command_1::SI_LOAD, stc::AI_COMMAND_1);
        }
        _ => {
            let arg = ChanDesc::from_raw(cmd.scan_begin_arg);
            if arg.has(ChanFlags::EDGE) {
                start_stop |= ss::START_EDGE;
            }
            if arg.has(ChanFlags::INVERT) {
                start_stop |= ss::START_POLARITY;
            }
            let edge = ChanFlags::EDGE.bits();
            if cmd.scan_begin_src != cmd.convert_src
                || (cmd.scan_begin_arg & !edge) != (cmd.convert_arg & !edge)
            {
                start_stop |= ss::START_SYNC;
            }
            start_stop |= ss::start_select(1 + arg.chan());
            stc.writew(start_stop, stc::AI_START_STOP_SELECT);
        }
    }

    match cmd.convert_src {
        TrigSrc::EXT => {
            let arg = ChanDesc::from_raw(cmd.convert_arg);
            mode1 |= ai_mode_1::convert_source_select(1 + arg.chan());
            if !arg.has(ChanFlags::INVERT) {
                mode1 |= ai_mode_1::CONVERT_SOURCE_POLARITY;
            }
            stc.writew(mode1, stc::AI_MODE_1);
            mode2 |= ai_mode_2::SC_GATE_ENABLE | ai_mode_2::START_STOP_GATE_ENABLE;
            stc.writew(mode2, stc::AI_MODE_2);
        }
        _ => {
            // a zero-length convert period does not run; use one tick
            let timer = if cmd.convert_arg == 0 || cmd.convert_src == TrigSrc::NOW {
                1
            } else {
                ns_to_timer(cmd.convert_arg, RoundMode::Nearest)
            };
            stc.writew(1, stc::AI_SI2_LOAD_A);
            stc.writew(timer as u16, stc::AI_SI2_LOAD_B);
            mode2 |= ai_mode_2::SI2_RELOAD_MODE;
            stc.writew(mode2, stc::AI_MODE_2);
            stc.writew(ai_command_1::SI2_LOAD, stc::AI_COMMAND_1);
            mode2 |= ai_mode_2::SI2_INITIAL_LOAD_SOURCE;
            stc.writew(mode2, stc::AI_MODE_2);
        }
    }

    if !dma {
        int_en |= IntAEnable::AI_FIFO;
    }
    ai.mode = if cmd.flags.contains(CmdFlags::WAKE_EOS)
        || ai.cmd2 & ai_command_2::END_ON_END_OF_SCAN != 0
    {
        AiMode::Scan
    } else {
        AiMode::HalfFull
    };
    let fifo_mode = match (ai.mode, dma) {
        (AiMode::HalfFull, true) => ai_mode_3::FIFO_MODE_HF_TO_E,
        (AiMode::HalfFull, false) => ai_mode_3::FIFO_MODE_HF,
        (AiMode::Scan, true) => ai_mode_3::FIFO_MODE_NE,
        (AiMode::Scan, false) => ai_mode_3::FIFO_MODE_HF,
    };
    stc.writew(fifo_mode, stc::AI_MODE_3);
    if ai.mode == AiMode::Scan {
        int_en |= IntAEnable::AI_STOP;
    }
    stc.writew(AI_ACKS.bits(), stc::INTERRUPT_A_ACK);
    dev.bus
        .set_bits(Bitfield::InterruptAEnable, u32::from(int_en.bits()), true);

    if dma {
        let widths = dev.family.ai_dma_widths(board);
        if let Err(e) = dev.dma.setup(DmaRole::Ai, transfer, widths) {
            warn!(error = %e, "AI DMA setup failed");
            reset(dev, ai);
            return Err(e);
        }
    }

    stc.writew(joint_reset::AI_CONFIGURATION_END, stc::JOINT_RESET);
    stc.writew(
        ai_command_1::SI2_ARM | ai_command_1::SI_ARM | ai_command_1::DIV_ARM | ai_command_1::SC_ARM,
        stc::AI_COMMAND_1,
    );

    ai.start_pending = cmd.start_src == TrigSrc::INT;
    if cmd.start_src == TrigSrc::NOW {
        stc.writew(ai_command_2::START1_PULSE | ai.cmd2, stc::AI_COMMAND_2);
    }
    debug!(
        nb_chan,
        mode = ?ai.mode,
        continuous = ai.continuous,
        dma,
        "AI command armed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::attach::subdev;
    use crate::config::AttachConfig;
    use crate::regs::{ai_mode_3, ai_start_stop as ss, ai_trigger_select as ats, stc, IntAEnable};
    use crate::sim::SimRig;
    use comedi_core::{AnalogReference, ChanDesc, ChanFlags, ComediError, Command, TrigSrc};

    fn cmd(nb_chan: u32, stop: u32) -> Command {
        Command::builder(subdev::AI)
            .start(TrigSrc::NOW, 0)
            .scan_begin(TrigSrc::TIMER, 2_000_000)
            .convert(TrigSrc::TIMER, 500_000)
            .stop(TrigSrc::COUNT, stop)
            .channels((0..nb_chan).map(|c| ChanDesc::pack(c, 0, AnalogReference::Diff)))
            .build()
    }

    fn sc_load(rig: &SimRig) -> u32 {
        (u32::from(rig.sim.stc_reg(stc::AI_SC_LOAD_A)) << 16)
            | u32::from(rig.sim.stc_reg(stc::AI_SC_LOAD_A + 1))
    }

    #[test]
    fn test_counted_command_loads_stop_count_and_starts() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.device.command(cmd(4, 100)).unwrap();
        assert_eq!(sc_load(&rig), 99);
        assert!(rig.sim.ai_running());
        assert_eq!(
            rig.sim.stc_reg(stc::AI_MODE_3),
            ai_mode_3::FIFO_MODE_HF
        );
        let enabled = IntAEnable::from_bits_retain(rig.driver.bus.shadow().int_a_enable);
        assert!(enabled.contains(IntAEnable::AI_FIFO | IntAEnable::AI_ERROR | IntAEnable::AI_SC_TC));
    }

    #[test]
    fn test_pipeline_stages_extend_stop_count() {
        let rig = SimRig::polled("pci-6110").unwrap();
        let mut c = cmd(2, 10);
        c.convert_arg = 0;
        rig.device.command(c).unwrap();
        assert_eq!(sc_load(&rig), 12);
    }

    #[test]
    fn test_single_scan_ends_on_end_of_scan() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.device.command(cmd(2, 1)).unwrap();
        let ai = rig.driver.ai.lock();
        assert_ne!(ai.cmd2 & crate::regs::ai_command_2::END_ON_END_OF_SCAN, 0);
        assert_eq!(ai.mode, super::AiMode::Scan);
        let start_stop = rig.sim.stc_reg(stc::AI_START_STOP_SELECT);
        assert_ne!(start_stop & ss::STOP_EDGE, 0);
    }

    #[test]
    fn test_dma_command_uses_half_full_to_empty() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        rig.device.command(cmd(4, 100)).unwrap();
        assert_eq!(
            rig.sim.stc_reg(stc::AI_MODE_3),
            ai_mode_3::FIFO_MODE_HF_TO_E
        );
        assert_eq!(rig.mite.as_ref().unwrap().claimed(), 1);
        let enabled = IntAEnable::from_bits_retain(rig.driver.bus.shadow().int_a_enable);
        assert!(!enabled.contains(IntAEnable::AI_FIFO));
    }

    #[test]
    fn test_external_start_programs_trigger_line() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(1, 10);
        c.start_src = TrigSrc::EXT;
        c.start_arg = 3 | ChanFlags::INVERT.bits();
        rig.device.command(c).unwrap();
        let trig = rig.sim.stc_reg(stc::AI_TRIGGER_SELECT);
        assert_eq!(trig & 0x1f, 4);
        assert_ne!(trig & ats::START1_POLARITY, 0);
        assert_eq!(trig & ats::START1_EDGE, 0);
        assert!(!rig.sim.ai_running());
        rig.sim.external_start();
        assert!(rig.sim.ai_running());
    }

    #[test]
    fn test_internal_start_fires_once() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = cmd(1, 10);
        c.start_src = TrigSrc::INT;
        rig.device.command(c).unwrap();
        assert!(!rig.sim.ai_running());
        assert!(rig.device.inttrig(subdev::AI, 1).is_err());
        rig.device.inttrig(subdev::AI, 0).unwrap();
        assert!(rig.sim.ai_running());
        assert!(rig.device.inttrig(subdev::AI, 0).is_err());
    }

    #[test]
    fn test_command_without_irq_refused() {
        let rig = SimRig::attach_with(AttachConfig {
            irq: None,
            dma: false,
            ..SimRig::config("pci-6052e")
        })
        .unwrap();
        let err = rig.device.command(cmd(1, 10)).unwrap_err();
        assert_eq!(err, ComediError::NoIrq);
        assert!(!rig.device.transfer(subdev::AI).unwrap().is_running());
    }

    #[test]
    fn test_busy_while_running() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.device.command(cmd(1, 1000)).unwrap();
        let err = rig.device.command(cmd(1, 10)).unwrap_err();
        assert!(err.is_busy());
        let mut insn = comedi_core::Insn::read(ChanDesc::pack(0, 0, AnalogReference::Diff), 1);
        assert!(rig.device.insn(subdev::AI, &mut insn).unwrap_err().is_busy());
        rig.device.cancel(subdev::AI).unwrap();
        assert!(!rig.sim.ai_running());
        rig.device.command(cmd(1, 10)).unwrap();
    }
}
