//! AO waveform commands: validation, sequencer programming and the
//! internal start trigger.

use std::sync::Arc;
use std::time::Duration;

use comedi_core::wait::poll_until;
use comedi_core::{
    BufDirection, ChanDesc, ChanFlags, CmdTestStep, ComediError, Command, CommandMask,
    Corrections, Result, RoundMode, TrigSrc,
};
use tracing::{debug, warn};

use super::{clear_fifo, prep_fifo, transfer, AoMunge, AoState};
use crate::ai::cmdtest::ext_arg;
use crate::board::BoardKind;
use crate::device::{Bitfield, NiMio, NI_TIMEOUT};
use crate::dma::DmaRole;
use crate::regs::r611x::window;
use crate::regs::{
    ao_command_1, ao_command_2, ao_mode_1, ao_mode_2, ao_mode_3, ao_output_control,
    ao_personal, ao_start_select, ao_trigger_select as ats, joint_reset, joint_status, stc,
    AoStatus1, IntBAck, IntBEnable,
};
use crate::timing::{max_period, ns_to_timer, quantize, UI_MAX};

/// DMA preload wait: polls and the pause between them. Polling faster
/// slows the transfer down.
const DMA_LOAD_POLLS: u32 = 10_000;
const DMA_LOAD_STEP: Duration = Duration::from_micros(10);

/// Largest update count.
const STOP_COUNT_MAX: u32 = 0x00ff_ffff;

pub(crate) fn cmd_mask() -> CommandMask {
    CommandMask {
        start_src: TrigSrc::INT,
        scan_begin_src: TrigSrc::TIMER | TrigSrc::EXT,
        convert_src: TrigSrc::NOW,
        scan_end_src: TrigSrc::COUNT,
        stop_src: TrigSrc::COUNT | TrigSrc::NONE,
    }
}

pub(crate) fn cmdtest(dev: &NiMio, cmd: &mut Command) -> Result<()> {
    cmd_mask().check(cmd)?;

    let mut fix = Corrections::new(CmdTestStep::Arguments);
    fix.force(&mut cmd.start_arg, 0);
    fix.force(&mut cmd.convert_arg, 0);
    if cmd.scan_begin_src == TrigSrc::EXT {
        let arg = ext_arg(cmd.scan_begin_arg, ChanFlags::INVERT);
        fix.force(&mut cmd.scan_begin_arg, arg);
    }
    let nb_chan = cmd.nb_chan();
    fix.force(&mut cmd.scan_end_arg, nb_chan);
    if cmd.stop_src == TrigSrc::NONE {
        fix.force(&mut cmd.stop_arg, 0);
    }
    fix.finish()?;

    let mut fix = Corrections::new(CmdTestStep::Bounds);
    if cmd.scan_begin_src == TrigSrc::TIMER {
        fix.at_least(&mut cmd.scan_begin_arg, dev.board.ao_speed);
        fix.at_most(&mut cmd.scan_begin_arg, max_period(UI_MAX));
    }
    if cmd.stop_src == TrigSrc::COUNT {
        fix.at_most(&mut cmd.stop_arg, STOP_COUNT_MAX);
        fix.at_least(&mut cmd.stop_arg, 1);
    }
    fix.finish()?;

    let mut fix = Corrections::new(CmdTestStep::Quantization);
    if cmd.scan_begin_src == TrigSrc::TIMER {
        let round = cmd.flags.round_mode();
        let arg = quantize(cmd.scan_begin_arg, round);
        fix.force(&mut cmd.scan_begin_arg, arg);
    }
    fix.finish()
}

/// Program the update sequencer. The waveform starts on the internal
/// trigger.
pub(crate) fn program(dev: &NiMio, ao: &mut AoState, cmd: &Command) -> Result<()> {
    if !dev.has_irq() {
        return Err(ComediError::NoIrq);
    }
    let Some(transfer) = transfer(dev) else {
        return Err(ComediError::not_supported("AO commands without an AO FIFO"));
    };
    let stc = dev.bus.stc();
    let board = dev.board;
    let nb_chan = cmd.nb_chan();

    stc.writew(joint_reset::AO_CONFIGURATION_START, stc::JOINT_RESET);
    stc.writew(ao_command_1::DISARM, stc::AO_COMMAND_1);

    if board.kind == BoardKind::Pci611x {
        dev.bus.ao_window_write(window::AO_MISC, window::CLEAR_WG);
        let mut timed = 0u16;
        for desc in &cmd.chan_descs {
            let chan = desc.chan();
            timed |= 1 << chan;
            dev.bus
                .ao_window_write(window::AO_WAVEFORM_GENERATION, chan as u16);
        }
        dev.bus.ao_window_write(window::AO_TIMED, timed);
    }
    dev.family.ao_config_chanlist(dev, ao, &cmd.chan_descs, true);
    transfer.set_munge(Some(Arc::new(AoMunge::new(dev, &cmd.chan_descs))));

    if cmd.stop_src == TrigSrc::NONE {
        ao.mode1 |= ao_mode_1::CONTINUOUS;
        ao.mode1 &= !ao_mode_1::TRIGGER_ONCE;
    } else {
        ao.mode1 &= !ao_mode_1::CONTINUOUS;
        ao.mode1 |= ao_mode_1::TRIGGER_ONCE;
    }
    stc.writew(ao.mode1, stc::AO_MODE_1);
    ao.trigger_select &= !(ats::START1_POLARITY | ats::START1_SELECT_MASK);
    ao.trigger_select |= ats::START1_EDGE | ats::START1_SYNC;
    stc.writew(ao.trigger_select, stc::AO_TRIGGER_SELECT);
    ao.mode3 &= !ao_mode_3::TRIGGER_LENGTH;
    stc.writew(ao.mode3, stc::AO_MODE_3);

    // buffer counter: one waveform, or free running
    ao.mode2 &= !ao_mode_2::BC_INITIAL_LOAD_SOURCE;
    stc.writew(ao.mode2, stc::AO_MODE_2);
    let bc = if cmd.stop_src == TrigSrc::NONE { 0x00ff_ffff } else { 0 };
    stc.writel(bc, stc::AO_BC_LOAD_A);
    stc.writew(ao_command_1::BC_LOAD, stc::AO_COMMAND_1);

    // update counter: the initial load counts the first update
    ao.mode2 &= !ao_mode_2::UC_INITIAL_LOAD_SOURCE;
    stc.writew(ao.mode2, stc::AO_MODE_2);
    let (first, reload) = match cmd.stop_src {
        TrigSrc::COUNT => (cmd.stop_arg, cmd.stop_arg.saturating_sub(1)),
        _ => (0x00ff_ffff, 0x00ff_ffff),
    };
    stc.writel(first, stc::AO_UC_LOAD_A);
    stc.writew(ao_command_1::UC_LOAD, stc::AO_COMMAND_1);
    stc.writel(reload, stc::AO_UC_LOAD_A);

    ao.mode1 &= !(ao_mode_1::ui_source_select(0x1f)
        | ao_mode_1::UI_SOURCE_POLARITY
        | ao_mode_1::update_source_select(0x1f)
        | ao_mode_1::UPDATE_SOURCE_POLARITY);
    match cmd.scan_begin_src {
        TrigSrc::TIMER => {
            ao.cmd2 &= !ao_command_2::BC_GATE_ENABLE;
            let timer = ns_to_timer(cmd.scan_begin_arg, RoundMode::Nearest);
            stc.writel(1, stc::AO_UI_LOAD_A);
            stc.writew(ao_command_1::UI_LOAD, stc::AO_COMMAND_1);
            stc.writel(timer, stc::AO_UI_LOAD_A);
        }
        _ => {
            let arg = ChanDesc::from_raw(cmd.scan_begin_arg);
            ao.mode1 |= ao_mode_1::update_source_select(arg.chan());
            if arg.has(ChanFlags::INVERT) {
                ao.mode1 |= ao_mode_1::UPDATE_SOURCE_POLARITY;
            }
            ao.cmd2 |= ao_command_2::BC_GATE_ENABLE;
        }
    }
    stc.writew(ao.cmd2, stc::AO_COMMAND_2);
    stc.writew(ao.mode1, stc::AO_MODE_1);
    ao.mode2 &= !(ao_mode_2::UI_RELOAD_MODE_MASK | ao_mode_2::UI_INITIAL_LOAD_SOURCE);
    stc.writew(ao.mode2, stc::AO_MODE_2);

    // the 611x sequences its channels behind the AO window instead
    if board.kind != BoardKind::Pci611x {
        let output = if cmd.scan_end_arg > 1 {
            ao.mode1 |= ao_mode_1::MULTIPLE_CHANNELS;
            ao_output_control::number_of_channels(cmd.scan_end_arg - 1)
        } else {
            ao.mode1 &= !ao_mode_1::MULTIPLE_CHANNELS;
            let first = if board.is_m_series() {
                0
            } else {
                cmd.chan_descs.first().map_or(0, |d| d.chan())
            };
            ao_output_control::number_of_channels(first)
        };
        stc.writew(
            output | ao_output_control::UPDATE_OUTPUT_HIGH_Z,
            stc::AO_OUTPUT_CONTROL,
        );
        stc.writew(ao.mode1, stc::AO_MODE_1);
    }

    stc.writew(
        ao_command_1::DAC0_UPDATE_MODE | ao_command_1::DAC1_UPDATE_MODE,
        stc::AO_COMMAND_1,
    );
    ao.mode3 |= ao_mode_3::STOP_ON_OVERRUN_ERROR;
    stc.writew(ao.mode3, stc::AO_MODE_3);

    ao.mode2 &= !(ao_mode_2::FIFO_MODE_MASK | ao_mode_2::FIFO_RETRANSMIT_ENABLE);
    ao.mode2 |= if dev.uses_dma() {
        ao_mode_2::FIFO_MODE_HF_TO_F
    } else {
        ao_mode_2::FIFO_MODE_HF
    };
    stc.writew(ao.mode2, stc::AO_MODE_2);

    let mut personal = ao_personal::BC_SOURCE_SELECT
        | ao_personal::UPDATE_PULSE_WIDTH
        | ao_personal::TMRDACWR_PULSE_WIDTH;
    personal |= if board.ao_fifo_depth > 0 {
        ao_personal::FIFO_ENABLE
    } else {
        ao_personal::DMA_PIO_CONTROL
    };
    stc.writew(personal, stc::AO_PERSONAL);
    // let the sequencer request DMA
    stc.writew(ao_start_select::AOFREQ_ENABLE, stc::AO_START_SELECT);
    stc.writew(joint_reset::AO_CONFIGURATION_END, stc::JOINT_RESET);

    if cmd.stop_src == TrigSrc::COUNT {
        stc.writew(IntBAck::AO_BC_TC.bits(), stc::INTERRUPT_B_ACK);
        dev.bus.set_bits(
            Bitfield::InterruptBEnable,
            u32::from(IntBEnable::AO_BC_TC.bits()),
            true,
        );
    }

    ao.start_pending = true;
    debug!(
        nb_chan,
        scan_begin = ?cmd.scan_begin_src,
        scan_begin_arg = cmd.scan_begin_arg,
        stop_arg = cmd.stop_arg,
        "AO command programmed, waiting for internal trigger"
    );
    Ok(())
}

/// Preload the DAC FIFO, arm the counters and pulse `START1`.
pub(crate) fn start(dev: &NiMio, ao: &mut AoState) -> Result<()> {
    let Some(transfer) = transfer(dev) else {
        return Err(ComediError::not_supported("AO commands without an AO FIFO"));
    };
    let stc = dev.bus.stc();
    dev.bus.set_bits(
        Bitfield::InterruptBEnable,
        u32::from((IntBEnable::AO_FIFO | IntBEnable::AO_ERROR).bits()),
        false,
    );
    let mut interrupts = IntBEnable::AO_ERROR;

    if dev.uses_dma() {
        clear_fifo(dev);
        if !dev.dma.has_channel(DmaRole::Ao) {
            dev.dma
                .setup(DmaRole::Ao, transfer, dev.family.ao_dma_widths())?;
        }
        // a waveform shorter than half the FIFO never reaches half full;
        // it is loaded once the engine has taken every queued byte
        let mut sync_error = None;
        let loaded = poll_until(DMA_LOAD_POLLS, DMA_LOAD_STEP, "AO DMA preload", || {
            let status = AoStatus1::from_bits_retain(stc.readw(stc::AO_STATUS_1));
            if status.intersects(AoStatus1::FIFO_HALF_FULL | AoStatus1::FIFO_FULL) {
                return true;
            }
            if let Err(e) = dev.dma.sync(DmaRole::Ao, transfer) {
                sync_error = Some(e);
                return true;
            }
            transfer.buffer().count(BufDirection::Get) == 0
                && !status.contains(AoStatus1::FIFO_EMPTY)
        });
        if let Some(e) = sync_error {
            return Err(e);
        }
        if loaded.is_err() {
            warn!("timed out waiting for the AO DMA preload");
            return Err(ComediError::pipe("AO DMA did not fill the FIFO"));
        }
    } else {
        if prep_fifo(dev, transfer)? == 0 {
            return Err(ComediError::pipe("no AO data to preload"));
        }
        interrupts |= IntBEnable::AO_FIFO;
    }

    // load the first samples into the DACs
    stc.writew(ao.mode3 | ao_mode_3::NOT_AN_UPDATE, stc::AO_MODE_3);
    stc.writew(ao.mode3, stc::AO_MODE_3);
    poll_until(NI_TIMEOUT, Duration::from_micros(1), "AO DAC load", || {
        stc.readw(stc::JOINT_STATUS_2) & joint_status::AO_TMRDACWRS_IN_PROGRESS == 0
    })?;
    // the error interrupt latches during the DAC load
    stc.writew(IntBAck::AO_ERROR.bits(), stc::INTERRUPT_B_ACK);
    dev.bus
        .set_bits(Bitfield::InterruptBEnable, u32::from(interrupts.bits()), true);

    stc.writew(
        ao.cmd1
            | ao_command_1::UI_ARM
            | ao_command_1::UC_ARM
            | ao_command_1::BC_ARM
            | ao_command_1::DAC1_UPDATE_MODE
            | ao_command_1::DAC0_UPDATE_MODE,
        stc::AO_COMMAND_1,
    );
    stc.writew(ao.cmd2 | ao_command_2::START1_PULSE, stc::AO_COMMAND_2);
    ao.start_pending = false;
    debug!(dma = dev.uses_dma(), "AO started");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attach::subdev;
    use crate::regs::board;
    use crate::sim::SimRig;
    use comedi_core::{AnalogReference, BufEvents, CmdFlags};

    fn waveform(nb_chan: u32, stop: u32) -> Command {
        Command::builder(subdev::AO)
            .start(TrigSrc::INT, 0)
            .scan_begin(TrigSrc::TIMER, 100_000)
            .convert(TrigSrc::NOW, 0)
            .stop(TrigSrc::COUNT, stop)
            .channels((0..nb_chan).map(|c| ChanDesc::pack(c, 0, AnalogReference::Ground)))
            .build()
    }

    fn samples(values: impl IntoIterator<Item = u16>) -> Vec<u8> {
        values.into_iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn test_cmdtest_bounds_and_quantization() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = waveform(1, 10);
        c.scan_begin_arg = 100;
        assert!(matches!(
            cmdtest(&rig.driver, &mut c),
            Err(ComediError::CmdTest { step: CmdTestStep::Bounds })
        ));
        assert_eq!(c.scan_begin_arg, 3_000);

        let mut c = waveform(1, 0x0200_0000);
        assert!(cmdtest(&rig.driver, &mut c).is_err());
        assert_eq!(c.stop_arg, STOP_COUNT_MAX);

        let mut c = waveform(1, 10);
        c.flags = CmdFlags::ROUND_UP;
        c.scan_begin_arg = 100_010;
        assert!(matches!(
            cmdtest(&rig.driver, &mut c),
            Err(ComediError::CmdTest { step: CmdTestStep::Quantization })
        ));
        assert_eq!(c.scan_begin_arg, 100_050);
        cmdtest(&rig.driver, &mut c).unwrap();
    }

    #[test]
    fn test_cmdtest_rejects_immediate_start() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = waveform(1, 10);
        c.start_src = TrigSrc::NOW;
        assert!(matches!(
            cmdtest(&rig.driver, &mut c),
            Err(ComediError::CmdTest { step: CmdTestStep::Sources })
        ));
    }

    #[test]
    fn test_cmdtest_fixes_scan_length_and_continuous_stop() {
        let rig = SimRig::polled("pci-6221").unwrap();
        let mut c = waveform(2, 10);
        c.scan_end_arg = 5;
        c.stop_src = TrigSrc::NONE;
        assert!(cmdtest(&rig.driver, &mut c).is_err());
        assert_eq!((c.scan_end_arg, c.stop_arg), (2, 0));
        cmdtest(&rig.driver, &mut c).unwrap();
    }

    #[test]
    fn test_polled_waveform_runs_to_completion() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.device.command(waveform(1, 3000)).unwrap();
        assert!(!rig.sim.ao_running());
        let data: Vec<u16> = (0..3000u16).map(|i| 0x8000 + i).collect();
        assert_eq!(rig.device.write(subdev::AO, &samples(data)).unwrap(), 6000);

        rig.device.inttrig(subdev::AO, 0).unwrap();
        assert!(rig.sim.ao_running());
        assert_eq!(rig.sim.run_updates(5000), 3000);

        let out = rig.sim.dac_outputs();
        assert_eq!(out.len(), 3000);
        // the munge turned offset binary into two's complement
        assert_eq!(&out[..3], &[0, 1, 2]);
        assert_eq!(out[2999], 2999);
        let events = rig.device.take_events(subdev::AO).unwrap();
        assert!(events.contains(BufEvents::EOA));
        assert!(!events.contains(BufEvents::ERROR));
        assert!(rig.device.get_cmd(subdev::AO).is_none());
    }

    #[test]
    fn test_trigger_without_data_is_a_pipe_error() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.device.command(waveform(1, 10)).unwrap();
        let err = rig.device.inttrig(subdev::AO, 0).unwrap_err();
        assert!(matches!(err, ComediError::Pipe { .. }));
        // still armed for a retry once data arrives
        rig.device.write(subdev::AO, &samples(0..10)).unwrap();
        rig.device.inttrig(subdev::AO, 0).unwrap();
        assert!(rig.device.inttrig(subdev::AO, 0).is_err());
    }

    #[test]
    fn test_underrun_raises_error() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.device.command(waveform(1, 5000)).unwrap();
        rig.device.write(subdev::AO, &samples(0..100)).unwrap();
        rig.device.inttrig(subdev::AO, 0).unwrap();
        rig.sim.run_updates(200);
        let events = rig.device.take_events(subdev::AO).unwrap();
        assert!(events.contains(BufEvents::ERROR));
        assert!(!rig.sim.ao_running());
        assert!(rig.device.get_cmd(subdev::AO).is_none());
        assert!(rig.driver.stats().ao_errors >= 1);
    }

    #[test]
    fn test_multi_channel_output_control() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.device.command(waveform(2, 4)).unwrap();
        assert_ne!(
            rig.sim.stc_reg(stc::AO_MODE_1) & ao_mode_1::MULTIPLE_CHANNELS,
            0
        );
        assert_eq!(
            rig.sim.stc_reg(stc::AO_OUTPUT_CONTROL),
            ao_output_control::number_of_channels(1)
        );
        rig.device
            .write(subdev::AO, &samples((0..8).map(|i| 0x8000 + i)))
            .unwrap();
        rig.device.inttrig(subdev::AO, 0).unwrap();
        assert_eq!(rig.sim.run_updates(10), 4);
        assert_eq!(rig.sim.dac_outputs(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_611x_programs_window_channels() {
        let rig = SimRig::polled("pci-6110").unwrap();
        rig.device.command(waveform(2, 4)).unwrap();
        assert_eq!(
            rig.sim.board_reg(0x1000 | u32::from(window::AO_TIMED)),
            0b11
        );
        assert_eq!(
            rig.sim.board_reg(0x1000 | u32::from(window::AO_WAVEFORM_GENERATION)),
            1
        );
        assert_eq!(
            rig.sim.stc_reg(stc::AO_MODE_1) & ao_mode_1::MULTIPLE_CHANNELS,
            0
        );
    }

    #[test]
    fn test_external_update_source() {
        let rig = SimRig::polled("pci-6221").unwrap();
        let mut c = waveform(1, 10);
        c.scan_begin_src = TrigSrc::EXT;
        c.scan_begin_arg = 3 | ChanFlags::INVERT.bits();
        rig.device.command(c).unwrap();
        let mode1 = rig.sim.stc_reg(stc::AO_MODE_1);
        assert_eq!(
            mode1 & ao_mode_1::update_source_select(0x1f),
            ao_mode_1::update_source_select(3)
        );
        assert_ne!(mode1 & ao_mode_1::UPDATE_SOURCE_POLARITY, 0);
        assert_ne!(
            rig.sim.stc_reg(stc::AO_COMMAND_2) & ao_command_2::BC_GATE_ENABLE,
            0
        );
    }

    #[test]
    fn test_dma_preload_and_run() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        let n = 1500u16;
        rig.device.command(waveform(1, u32::from(n))).unwrap();
        rig.device
            .write(subdev::AO, &samples((0..n).map(|i| 0x8000 + i)))
            .unwrap();
        rig.device.inttrig(subdev::AO, 0).unwrap();
        let mite = rig.mite.as_ref().unwrap();
        assert_eq!(mite.claimed(), 1);
        assert_ne!(
            rig.sim.stc_reg(stc::AO_MODE_2) & ao_mode_2::FIFO_MODE_MASK,
            0
        );
        assert_ne!(rig.driver.bus.shadow().ai_ao_select & board::AO_DMA_SELECT_MASK, 0);

        assert_eq!(rig.sim.run_updates(usize::from(n) + 10), usize::from(n));
        let out = rig.sim.dac_outputs();
        assert_eq!(out.len(), usize::from(n));
        assert_eq!(out[1499], 1499);
        assert!(rig.device.take_events(subdev::AO).unwrap().contains(BufEvents::EOA));
        assert_eq!(mite.claimed(), 0);
    }

    #[test]
    fn test_dma_preload_times_out_without_data() {
        let rig = SimRig::attach("pci-6221").unwrap();
        rig.device.command(waveform(1, 100)).unwrap();
        rig.device.write(subdev::AO, &samples(0..10)).unwrap();
        let err = rig.device.inttrig(subdev::AO, 0).unwrap_err();
        assert!(matches!(err, ComediError::Pipe { .. }));
        assert!(!rig.sim.ao_running());
    }

    #[test]
    fn test_command_needs_irq() {
        let mut config = SimRig::config("pci-6052e");
        config.irq = None;
        let rig = SimRig::attach_with(config).unwrap();
        let err = rig.device.command(waveform(1, 10)).unwrap_err();
        assert_eq!(err, ComediError::NoIrq);
        assert!(rig.device.get_cmd(subdev::AO).is_none());
    }

    #[test]
    fn test_cancel_disarms() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut c = waveform(1, 0);
        c.stop_src = TrigSrc::NONE;
        rig.device.command(c).unwrap();
        rig.device.write(subdev::AO, &samples(0..64)).unwrap();
        rig.device.inttrig(subdev::AO, 0).unwrap();
        assert!(rig.sim.ao_running());
        rig.device.cancel(subdev::AO).unwrap();
        assert!(!rig.sim.ao_running());
        assert!(rig.device.get_cmd(subdev::AO).is_none());
        assert_eq!(
            rig.driver.bus.shadow().int_b_enable & IntBEnable::AO_FIFO.bits(),
            0
        );
    }
}
