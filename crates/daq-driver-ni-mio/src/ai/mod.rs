//! Analog input subdevice.
//!
//! Single conversions run through the family strategy; commands program
//! the STC sequencer ([`cmd`]) after validation ([`cmdtest`]). Samples
//! reach the ring buffer either by DMA or, without an engine, by the
//! interrupt handler draining half the FIFO at a time.

pub(crate) mod cmd;
pub(crate) mod cmdtest;
pub(crate) mod fifo;

use std::sync::Arc;
use std::time::Duration;

use comedi_core::wait::{poll_until, udelay};
use comedi_core::{
    insn_config, BufEvents, ChanDesc, ComediError, Command, CommandMask, Insn, Munge, Result,
    SubdeviceOps, TrigSrc,
};
use tracing::{debug, error, trace, warn};

use crate::attach::subdev;
use crate::board::BoardKind;
use crate::chanlist::calib_source_mask;
use crate::device::{Bitfield, NiMio, Stats, NI_TIMEOUT};
use crate::dma::DmaRole;
use crate::ranges::AoRanges;
use crate::regs::mite::Chsr;
use crate::regs::{
    ai_command_1, ai_command_2, ai_mode_1, ai_mode_3, board, joint_reset, m_series, r611x, r6143,
    stc, AiStatus1, IntAAck, IntAEnable,
};

/// Half-full service passes per interrupt before giving up.
const HALF_FULL_RETRIES: usize = 10;

/// DMA drain wait: polls and the pause between them.
const DRAIN_POLLS: u32 = 10_000;
const DRAIN_STEP: Duration = Duration::from_micros(5);

/// Every interrupt source the AI owns in `Interrupt_A_Enable`.
const AI_INTERRUPTS: IntAEnable = IntAEnable::AI_SC_TC
    .union(IntAEnable::AI_START1)
    .union(IntAEnable::AI_START2)
    .union(IntAEnable::AI_START)
    .union(IntAEnable::AI_STOP)
    .union(IntAEnable::AI_ERROR)
    .union(IntAEnable::AI_FIFO);

/// Every AI condition `Interrupt_A_Ack` can clear.
pub(crate) const AI_ACKS: IntAAck = IntAAck::AI_SC_TC_ERROR_CONFIRM
    .union(IntAAck::AI_START)
    .union(IntAAck::AI_START2)
    .union(IntAAck::AI_START1)
    .union(IntAAck::AI_SC_TC)
    .union(IntAAck::AI_ERROR)
    .union(IntAAck::AI_STOP);

/// When the interrupt handler moves samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum AiMode {
    /// On FIFO half full (polled) or DMA link completion
    #[default]
    HalfFull,
    /// At the end of every scan
    Scan,
}

/// Analog input soft state.
#[derive(Debug, Default)]
pub(crate) struct AiState {
    /// Offset added to each scan position's raw code
    pub(crate) offsets: Vec<u32>,
    /// Single descriptor currently in configuration memory
    pub(crate) cached: Option<ChanDesc>,
    /// Calibration source selected by `ALT_SOURCE`
    pub(crate) calib_source: u32,
    /// 6143 calibration relay position
    pub(crate) calib_source_enabled: bool,
    /// Bits OR-ed into every `AI_Command_2` write
    pub(crate) cmd2: u16,
    /// The running command has no stop count
    pub(crate) continuous: bool,
    pub(crate) mode: AiMode,
    /// Soft copy of `Analog_Trigger_Etc`
    pub(crate) analog_trigger_etc: u16,
    /// An internal start trigger is armed and not yet fired
    pub(crate) start_pending: bool,
    /// Status reads returned all ones; the registers are left alone
    pub(crate) card_gone: bool,
}

impl AiState {
    /// Forget the state of the last command.
    fn clear(&mut self) {
        self.cmd2 = 0;
        self.continuous = false;
        self.mode = AiMode::HalfFull;
        self.start_pending = false;
    }
}

/// Flush the AI FIFO.
pub(crate) fn clear_fifo(dev: &NiMio) {
    let io = dev.bus.io();
    if dev.board.kind == BoardKind::Pci6143 {
        io.write32(r6143::AIFIFO_CONTROL, r6143::FIFO_FLUSHING);
        io.write32(r6143::AIFIFO_CONTROL, 0);
        let flushed = poll_until(NI_TIMEOUT, Duration::ZERO, "AI FIFO flush", || {
            io.read32(r6143::AIFIFO_STATUS) & r6143::FIFO_FLUSHING == 0
        });
        if flushed.is_err() {
            warn!("timeout flushing the AI FIFO");
        }
        return;
    }
    dev.bus.stc().writew(1, stc::ADC_FIFO_CLEAR);
    // 625x boards also need the static AI control strobe
    if dev.board.ao_ranges == AoRanges::M625x {
        io.write8(m_series::static_ai_control(0), 0);
        io.write8(m_series::static_ai_control(0), 1);
    }
}

/// Put the AI sequencer into its idle configuration and release its DMA
/// channel. Leaves the transfer state to the caller.
pub(crate) fn reset(dev: &NiMio, ai: &mut AiState) {
    dev.dma.release(DmaRole::Ai);
    let stc = dev.bus.stc();
    stc.writew(
        joint_reset::AI_CONFIGURATION_START | joint_reset::AI_RESET,
        stc::JOINT_RESET,
    );
    dev.bus
        .set_bits(Bitfield::InterruptAEnable, u32::from(AI_INTERRUPTS.bits()), false);
    clear_fifo(dev);
    if dev.board.kind != BoardKind::Pci6143 {
        dev.bus.io().write8(board::MISC_COMMAND, 0);
    }
    stc.writew(ai_command_1::DISARM, stc::AI_COMMAND_1);
    stc.writew(ai_mode_1::START_STOP | ai_mode_1::RESERVED, stc::AI_MODE_1);
    stc.writew(0, stc::AI_MODE_2);
    stc.writew(ai_mode_3::FIFO_MODE_NE, stc::AI_MODE_3);
    stc.writew(dev.family.ai_personal(), stc::AI_PERSONAL);
    stc.writew(dev.family.ai_output_control(dev.board), stc::AI_OUTPUT_CONTROL);
    stc.writew(AI_ACKS.bits(), stc::INTERRUPT_A_ACK);
    stc.writew(joint_reset::AI_CONFIGURATION_END, stc::JOINT_RESET);

    ai.clear();
    debug!("AI reset");
}

/// Adds the per-position offset to each raw sample, turning the signed
/// codes of bipolar ranges into offset binary.
#[derive(Debug)]
pub(crate) struct AiMunge {
    offsets: Vec<u32>,
    width: usize,
}

impl AiMunge {
    pub(crate) fn new(offsets: Vec<u32>, width: usize) -> Self {
        Self { offsets, width }
    }
}

impl Munge for AiMunge {
    fn munge(&self, first_chan: usize, samples: &mut [u8]) {
        if self.offsets.iter().all(|&o| o == 0) {
            return;
        }
        let n = self.offsets.len();
        for (i, s) in samples.chunks_exact_mut(self.width).enumerate() {
            let offset = self.offsets[(first_chan + i) % n];
            if self.width == 4 {
                let v = u32::from_le_bytes([s[0], s[1], s[2], s[3]]).wrapping_add(offset);
                s.copy_from_slice(&v.to_le_bytes());
            } else {
                let v = u16::from_le_bytes([s[0], s[1]]).wrapping_add(offset as u16);
                s.copy_from_slice(&v.to_le_bytes());
            }
        }
    }
}

/// Copy FIFO samples into the AI ring buffer at the command's sample size.
fn put_samples(dev: &NiMio, samples: &[u32]) -> Result<()> {
    if samples.is_empty() {
        return Ok(());
    }
    let transfer = &dev.transfers.ai;
    let bytes: Vec<u8> = if transfer.sample_size() == 4 {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    } else {
        samples.iter().flat_map(|&s| (s as u16).to_le_bytes()).collect()
    };
    transfer.put(&bytes)
}

fn sync_dma(dev: &NiMio) -> Result<()> {
    Stats::bump(&dev.stats.dma_syncs);
    dev.dma.sync(DmaRole::Ai, &dev.transfers.ai)
}

/// Read whatever is left in the FIFO, including a stranded packed sample.
fn handle_dregs(dev: &NiMio) -> Result<()> {
    let mut samples = Vec::new();
    dev.family.ai_fifo_dregs(dev, &mut samples);
    samples.extend(dev.family.ai_last_sample(dev));
    trace!(n = samples.len(), "AI dregs");
    put_samples(dev, &samples)
}

fn handle_half_full(dev: &NiMio) -> Result<()> {
    let n = (dev.board.ai_fifo_depth / 2) as usize;
    for _ in 0..HALF_FULL_RETRIES {
        let mut samples = Vec::with_capacity(n);
        dev.family.read_ai_fifo(dev, n, &mut samples);
        put_samples(dev, &samples)?;
        if !fifo::status(dev).contains(AiStatus1::FIFO_HALF_FULL) {
            return Ok(());
        }
    }
    warn!(
        retries = HALF_FULL_RETRIES,
        "AI FIFO still half full after servicing, continuing"
    );
    Stats::bump(&dev.stats.fifo_retry_exhausted);
    Ok(())
}

/// Wait for the engine to land everything still in flight.
fn drain_dma(dev: &NiMio) -> Result<()> {
    let drained = poll_until(DRAIN_POLLS, DRAIN_STEP, "AI DMA drain", || {
        dev.dma.in_transit(DmaRole::Ai) == 0
    });
    if drained.is_err() {
        warn!(
            in_transit = dev.dma.in_transit(DmaRole::Ai),
            "timed out draining AI DMA"
        );
    }
    sync_dma(dev)
}

/// Normal end of a counted acquisition.
fn shutdown(dev: &NiMio, ai: &mut AiState) -> Result<()> {
    if dev.dma.has_channel(DmaRole::Ai) {
        drain_dma(dev)?;
    }
    handle_dregs(dev)?;
    let transfer = &dev.transfers.ai;
    transfer.event(BufEvents::EOA);
    reset(dev, ai);
    transfer.finish();
    debug!(
        bytes = transfer.buffer().put_count(),
        "AI acquisition complete"
    );
    Ok(())
}

/// Error end: raise `ERROR`, stop the hardware, leave the FIFO unread.
fn abort(dev: &NiMio, ai: &mut AiState) {
    let transfer = &dev.transfers.ai;
    transfer.event(BufEvents::ERROR);
    Stats::bump(&dev.stats.ai_errors);
    reset(dev, ai);
    transfer.finish();
}

fn handle_end_of_scan(dev: &NiMio, ai: &mut AiState) -> Result<()> {
    if ai.mode == AiMode::Scan {
        if dev.dma.has_channel(DmaRole::Ai) {
            sync_dma(dev)?;
        } else {
            handle_dregs(dev)?;
        }
    }
    if ai.cmd2 & ai_command_2::END_ON_END_OF_SCAN != 0 {
        shutdown(dev, ai)?;
    }
    Ok(())
}

fn service(dev: &NiMio, ai: &mut AiState, status: AiStatus1, mite: Chsr) -> Result<()> {
    let dma = dev.dma.has_channel(DmaRole::Ai);
    if dma {
        if mite.unknown() || mite.failed() {
            return Err(ComediError::io(format!(
                "AI DMA fault, channel status 0x{:08x}",
                mite.bits()
            )));
        }
        if mite.contains(Chsr::LINKC) {
            sync_dma(dev)?;
        }
    }
    if status.intersects(AiStatus1::ERRORS) {
        return Err(ComediError::pipe(format!("AI status {status}")));
    }
    if status.contains(AiStatus1::SC_TC) && !ai.continuous {
        return shutdown(dev, ai);
    }
    if !dma && status.contains(AiStatus1::FIFO_HALF_FULL) {
        handle_half_full(dev)?;
    }
    if status.contains(AiStatus1::STOP) {
        handle_end_of_scan(dev, ai)?;
    }
    Ok(())
}

/// Service the AI side of an interrupt. `status` is `AI_Status_1` as read
/// before acknowledging, `mite` the AI DMA channel status.
pub(crate) fn handle_interrupt(dev: &NiMio, status: AiStatus1, mite: Chsr) {
    if !dev.transfers.ai.is_running() {
        return;
    }
    let mut ai = dev.ai.lock();
    if let Err(e) = service(dev, &mut ai, status, mite) {
        error!(error = %e, %status, "AI acquisition aborted");
        abort(dev, &mut ai);
    }
}

/// The card stopped answering: fail the running acquisition without
/// touching the FIFO.
pub(crate) fn card_removed(dev: &NiMio) {
    let mut ai = dev.ai.lock();
    ai.clear();
    ai.cached = None;
    ai.card_gone = true;
    let transfer = &dev.transfers.ai;
    if !transfer.is_running() {
        return;
    }
    error!("AI status reads all ones, card removed");
    dev.dma.release(DmaRole::Ai);
    transfer.event(BufEvents::ERROR | BufEvents::EOA);
    Stats::bump(&dev.stats.ai_errors);
    transfer.finish();
}

/// Operation set of the AI subdevice.
pub(crate) struct AiOps {
    pub(crate) dev: Arc<NiMio>,
}

impl AiOps {
    fn set_alt_source(&self, source: u32) -> Result<()> {
        let dev = &*self.dev;
        let mut ai = dev.ai.lock();
        match dev.board.kind {
            BoardKind::MSeries => {
                if source & !calib_source_mask() != 0 {
                    return Err(ComediError::invalid(format!(
                        "calibration source 0x{source:x} has bits outside the bypass mask"
                    )));
                }
                ai.calib_source = source;
            }
            BoardKind::Pci6143 => {
                let source = source & 0xf;
                ai.calib_source = source;
                dev.bus
                    .io()
                    .write16(r6143::CALIBRATION_CHANNEL, source as u16);
            }
            BoardKind::ESeries | BoardKind::Pci611x => {
                let chan = source & 0xf;
                if chan >= 8 {
                    return Err(ComediError::invalid(format!(
                        "calibration source {chan} out of range"
                    )));
                }
                ai.calib_source = chan;
                if dev.board.kind == BoardKind::Pci611x {
                    let adjust = ((source >> 4) & 0xff) as u8;
                    dev.bus.io().write8(r611x::CAL_GAIN_SELECT, adjust);
                }
            }
        }
        // force the next channel list load
        ai.cached = None;
        debug!(source = ai.calib_source, "AI calibration source selected");
        Ok(())
    }
}

impl SubdeviceOps for AiOps {
    fn insn_read(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        if dev.transfers.ai.is_running() {
            return Err(ComediError::Busy {
                subdevice: subdev::AI,
            });
        }
        let mut ai = dev.ai.lock();
        dev.family.load_chanlist(dev, &mut ai, &[insn.chan_desc])?;
        clear_fifo(dev);
        let signbits = ai.offsets.first().copied().unwrap_or(0);

        // fill the ADC pipeline
        let stc = dev.bus.stc();
        for _ in 0..dev.board.adc_stages() {
            stc.writew(ai_command_1::CONVERT_PULSE, stc::AI_COMMAND_1);
            udelay(1);
        }
        for word in insn.data.iter_mut() {
            *word = dev.family.ai_convert_one(dev, signbits)?;
        }
        Ok(())
    }

    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        match insn.word(0)? {
            insn_config::ALT_SOURCE => self.set_alt_source(insn.word(1)?),
            insn_config::GET_CMD_TIMING_CONSTRAINTS => {
                let nb_chan = insn.data.get(1).copied().filter(|&n| n > 0).unwrap_or(1);
                let convert_min = if dev.family.simultaneous() {
                    0
                } else {
                    dev.board.ai_speed
                };
                insn.set_word(1, dev.family.min_scan_period(dev.board, nb_chan));
                insn.set_word(2, convert_min);
                Ok(())
            }
            other => Err(ComediError::invalid(format!(
                "AI configuration id {other} not supported"
            ))),
        }
    }

    fn cmd_mask(&self) -> Option<CommandMask> {
        Some(cmdtest::cmd_mask(&self.dev))
    }

    fn do_cmdtest(&self, cmd: &mut Command) -> Result<()> {
        cmdtest::cmdtest(&self.dev, cmd)
    }

    fn do_cmd(&self, cmd: &Command) -> Result<()> {
        let dev = &*self.dev;
        let _guard = dev.dev_lock.lock();
        let mut ai = dev.ai.lock();
        cmd::program(dev, &mut ai, cmd)
    }

    fn cancel(&self) -> Result<()> {
        let mut ai = self.dev.ai.lock();
        if ai.card_gone {
            ai.clear();
            self.dev.dma.release(DmaRole::Ai);
            debug!("AI cancel on a removed card, registers untouched");
            return Ok(());
        }
        reset(&self.dev, &mut ai);
        Ok(())
    }

    fn inttrig(&self, trignum: u32) -> Result<()> {
        if trignum != 0 {
            return Err(ComediError::invalid(format!(
                "AI has no internal trigger {trignum}"
            )));
        }
        let dev = &*self.dev;
        let _guard = dev.dev_lock.lock();
        let mut ai = dev.ai.lock();
        let internal = dev
            .transfers
            .ai
            .command()
            .is_some_and(|c| c.start_src == TrigSrc::INT);
        if !internal || !ai.start_pending {
            return Err(ComediError::invalid("AI start trigger is not pending"));
        }
        ai.start_pending = false;
        dev.bus
            .stc()
            .writew(ai_command_2::START1_PULSE | ai.cmd2, stc::AI_COMMAND_2);
        debug!("AI started by internal trigger");
        Ok(())
    }
}
