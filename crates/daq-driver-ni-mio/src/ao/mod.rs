//! Analog output subdevice.
//!
//! Direct writes go straight to the DAC registers of the board family.
//! Waveform commands run the STC update sequencer: [`cmd`] validates and
//! programs it, the internal trigger preloads the DAC FIFO (by DMA or by
//! copying from the ring buffer) and fires `START1`. Without DMA the
//! interrupt handler tops the FIFO up whenever it drops below half.

pub(crate) mod cmd;

use std::sync::Arc;

use comedi_core::{
    AnalogReference, BufDirection, BufEvents, ChanDesc, ChanFlags, ComediError, Command,
    CommandMask, Insn, Munge, Result, SubdeviceOps, Transfer,
};
use tracing::{debug, error, trace, warn};

use crate::attach::subdev;
use crate::board::BoardKind;
use crate::device::{Bitfield, NiMio, Stats};
use crate::dma::DmaRole;
use crate::regs::mite::Chsr;
use crate::regs::r611x::window;
use crate::regs::{
    ao_command_1, ao_mode_3, ao_personal, board, joint_reset, m_series, r611x, stc, AoStatus1,
    IntBAck, IntBEnable,
};

/// Every interrupt source the AO owns in `Interrupt_B_Enable`.
const AO_INTERRUPTS: IntBEnable = IntBEnable::AO_BC_TC
    .union(IntBEnable::AO_START1)
    .union(IntBEnable::AO_UPDATE)
    .union(IntBEnable::AO_START)
    .union(IntBEnable::AO_STOP)
    .union(IntBEnable::AO_ERROR)
    .union(IntBEnable::AO_UC_TC)
    .union(IntBEnable::AO_UI2_TC)
    .union(IntBEnable::AO_FIFO);

/// Acknowledges written by a reset.
const AO_RESET_ACKS: IntBAck = IntBAck::AO_ERROR
    .union(IntBAck::AO_STOP)
    .union(IntBAck::AO_START)
    .union(IntBAck::AO_UPDATE)
    .union(IntBAck::AO_START1)
    .union(IntBAck::AO_BC_TC)
    .union(IntBAck::AO_UC_TC)
    .union(IntBAck::AO_BC_TC_ERROR_CONFIRM)
    .union(IntBAck::AO_BC_TC_TRIGGER_ERROR_CONFIRM);

/// Analog output soft state.
#[derive(Debug, Default)]
pub(crate) struct AoState {
    /// Last value written to each DAC, for read-back
    pub(crate) last: Vec<u32>,
    /// Last configuration word of each DAC
    pub(crate) conf: Vec<u16>,
    /// XOR applied to direct writes of the last configured channel
    pub(crate) invert: u32,
    pub(crate) cmd1: u16,
    pub(crate) cmd2: u16,
    pub(crate) mode1: u16,
    pub(crate) mode2: u16,
    pub(crate) mode3: u16,
    pub(crate) trigger_select: u16,
    /// A command is programmed and waits for its internal trigger
    pub(crate) start_pending: bool,
}

impl AoState {
    fn remember(&mut self, chan: u32, value: u32) {
        let i = chan as usize;
        if self.last.len() <= i {
            self.last.resize(i + 1, 0);
        }
        self.last[i] = value;
    }

    fn set_conf(&mut self, chan: u32, conf: u16) {
        let i = chan as usize;
        if self.conf.len() <= i {
            self.conf.resize(i + 1, 0);
        }
        self.conf[i] = conf;
    }
}

/// Code of zero volts in a bipolar range.
fn bipolar_offset(dev: &NiMio) -> u32 {
    1 << dev.board.aobits.saturating_sub(1)
}

/// The range index selects a bipolar output.
fn is_bipolar(dev: &NiMio, range: u32) -> bool {
    !dev.board.ao_unipolar || range & 1 == 0
}

// ----------------------------------------------------------------------
// Family primitives
// ----------------------------------------------------------------------

/// E-series and 611x DAC configuration through `AO_Configuration`.
pub(crate) fn config_legacy(dev: &NiMio, ao: &mut AoState, list: &[ChanDesc]) {
    let io = dev.bus.io();
    for desc in list {
        let chan = desc.chan();
        let range = desc.range();
        let mut conf = board::ao_channel(chan);
        if is_bipolar(dev, range) {
            conf |= board::AO_BIPOLAR;
            ao.invert = bipolar_offset(dev);
        } else {
            ao.invert = 0;
        }
        if dev.board.ao_unipolar && range & 2 != 0 {
            conf |= board::AO_EXT_REF;
        }
        if desc.has(ChanFlags::DEGLITCH) {
            conf |= board::AO_DEGLITCH;
        }
        // AREF_OTHER ties AO ground to AI ground
        if desc.aref() == AnalogReference::Other {
            conf |= board::AO_GROUND_REF;
        }
        io.write16(board::AO_CONFIGURATION, conf);
        ao.set_conf(chan, conf);
        trace!(chan, conf = format_args!("0x{conf:04x}"), "AO channel configured");
    }
}

/// M-series DAC configuration: reference, attenuation, offset and
/// waveform order per channel.
pub(crate) fn config_m_series(dev: &NiMio, ao: &mut AoState, list: &[ChanDesc], timed: bool) {
    let io = dev.bus.io();
    let ranges = dev.board.ao_ranges.ranges();
    for chan in 0..dev.board.n_aochan {
        io.write8(m_series::ao_waveform_order(chan), 0xf);
    }
    for (position, desc) in list.iter().enumerate() {
        let chan = desc.chan();
        let Some(range) = ranges.get(desc.range() as usize) else {
            warn!(chan, range = desc.range(), "AO range index out of table");
            continue;
        };
        // microvolts, so the table can be matched exactly
        let span = ((range.max - range.min) * 1e6).round() as i64;
        let center = ((range.max + range.min) * 1e6).round() as i64;

        let mut conf = 0u8;
        let attenuation = match span {
            20_000_000 => {
                conf |= m_series::AO_DAC_REFERENCE_10V_INTERNAL;
                0
            }
            10_000_000 => {
                conf |= m_series::AO_DAC_REFERENCE_5V_INTERNAL;
                0
            }
            4_000_000 => {
                conf |= m_series::AO_DAC_REFERENCE_10V_INTERNAL;
                m_series::AO_ATTENUATE_X5
            }
            2_000_000 => {
                conf |= m_series::AO_DAC_REFERENCE_5V_INTERNAL;
                m_series::AO_ATTENUATE_X5
            }
            other => {
                warn!(chan, span_uv = other, "unhandled AO reference voltage");
                0
            }
        };
        io.write8(m_series::ao_reference_attenuation(chan), attenuation);
        match center {
            0 => conf |= m_series::AO_DAC_OFFSET_0V,
            10_000_000 => conf |= m_series::AO_DAC_OFFSET_5V,
            other => warn!(chan, center_uv = other, "unhandled AO offset voltage"),
        }
        if timed {
            conf |= m_series::AO_UPDATE_TIMED;
        }
        io.write8(m_series::ao_config_bank(chan), conf);
        ao.set_conf(chan, u16::from(conf));
        io.write8(m_series::ao_waveform_order(chan), position as u8);
    }
    ao.invert = 0;
}

/// E-series direct write: the board expects two's complement in bipolar
/// ranges.
pub(crate) fn write_direct_legacy(dev: &NiMio, ao: &mut AoState, desc: ChanDesc, value: u32) {
    config_legacy(dev, ao, &[desc]);
    let chan = desc.chan();
    ao.remember(chan, value);
    let reg = if chan == 0 {
        board::DAC0_DIRECT_DATA
    } else {
        board::DAC1_DIRECT_DATA
    };
    dev.bus.io().write16(reg, (value ^ ao.invert) as u16);
}

/// 611x direct write through the AO window.
pub(crate) fn write_direct_611x(dev: &NiMio, ao: &mut AoState, desc: ChanDesc, value: u32) {
    let chan = desc.chan();
    dev.bus.ao_window_write(window::AO_IMMEDIATE, 1 << chan);
    config_legacy(dev, ao, &[desc]);
    ao.remember(chan, value);
    let invert = bipolar_offset(dev);
    dev.bus
        .ao_window_write(window::dac_direct_data(chan), (value ^ invert) as u16);
}

/// M-series direct write; the DAC takes offset binary.
pub(crate) fn write_direct_m_series(dev: &NiMio, ao: &mut AoState, desc: ChanDesc, value: u32) {
    config_m_series(dev, ao, &[desc], false);
    let chan = desc.chan();
    ao.remember(chan, value);
    dev.bus.io().write32(m_series::dac_direct_data(chan), value);
}

/// E-series FIFO: one sample per 16-bit write.
pub(crate) fn fifo_load_words(dev: &NiMio, samples: &[u16]) {
    let io = dev.bus.io();
    for &s in samples {
        io.write16(board::DAC_FIFO_DATA, s);
    }
}

/// 611x FIFO: two samples per 32-bit write, first sample in the low half.
pub(crate) fn fifo_load_packed(dev: &NiMio, samples: &[u16]) {
    let io = dev.bus.io();
    for pair in samples.chunks(2) {
        let low = u32::from(pair[0]);
        let high = pair.get(1).map_or(0, |&s| u32::from(s) << 16);
        io.write32(r611x::DAC_FIFO_DATA, low | high);
    }
}

/// M-series FIFO: one sample per 32-bit write.
pub(crate) fn fifo_load_m_series(dev: &NiMio, samples: &[u16]) {
    let io = dev.bus.io();
    for &s in samples {
        io.write32(m_series::AO_FIFO_DATA, u32::from(s));
    }
}

// ----------------------------------------------------------------------
// Reset and data movement
// ----------------------------------------------------------------------

/// Idle the update sequencer and release the AO DMA channel.
pub(crate) fn reset(dev: &NiMio, ao: &mut AoState) {
    dev.dma.release(DmaRole::Ao);
    let stc = dev.bus.stc();
    stc.writew(joint_reset::AO_CONFIGURATION_START, stc::JOINT_RESET);
    stc.writew(ao_command_1::DISARM, stc::AO_COMMAND_1);
    dev.bus
        .set_bits(Bitfield::InterruptBEnable, u32::from(AO_INTERRUPTS.bits()), false);
    stc.writew(ao_personal::BC_SOURCE_SELECT, stc::AO_PERSONAL);
    stc.writew(AO_RESET_ACKS.bits(), stc::INTERRUPT_B_ACK);
    stc.writew(
        ao_personal::BC_SOURCE_SELECT
            | ao_personal::UPDATE_PULSE_WIDTH
            | ao_personal::TMRDACWR_PULSE_WIDTH,
        stc::AO_PERSONAL,
    );
    stc.writew(0, stc::AO_OUTPUT_CONTROL);
    stc.writew(0, stc::AO_START_SELECT);
    ao.cmd1 = 0;
    stc.writew(ao.cmd1, stc::AO_COMMAND_1);
    ao.cmd2 = 0;
    stc.writew(ao.cmd2, stc::AO_COMMAND_2);
    ao.mode1 = 0;
    stc.writew(ao.mode1, stc::AO_MODE_1);
    ao.mode2 = 0;
    stc.writew(ao.mode2, stc::AO_MODE_2);
    ao.mode3 = if dev.board.is_m_series() {
        ao_mode_3::LAST_GATE_DISABLE
    } else {
        0
    };
    stc.writew(ao.mode3, stc::AO_MODE_3);
    ao.trigger_select = 0;
    stc.writew(ao.trigger_select, stc::AO_TRIGGER_SELECT);
    if dev.board.kind == BoardKind::Pci611x {
        dev.bus.ao_window_write(window::AO_IMMEDIATE, 0x3);
        dev.bus.ao_window_write(window::AO_MISC, window::CLEAR_WG);
    }
    stc.writew(joint_reset::AO_CONFIGURATION_END, stc::JOINT_RESET);
    ao.start_pending = false;
    debug!("AO reset");
}

/// Subtracts the bipolar offset from samples of bipolar channels so
/// callers can write offset binary regardless of the DAC coding.
#[derive(Debug)]
pub(crate) struct AoMunge {
    offset: u16,
    bipolar: Vec<bool>,
}

impl AoMunge {
    pub(crate) fn new(dev: &NiMio, list: &[ChanDesc]) -> Self {
        Self {
            offset: bipolar_offset(dev) as u16,
            bipolar: list.iter().map(|d| is_bipolar(dev, d.range())).collect(),
        }
    }
}

impl Munge for AoMunge {
    fn munge(&self, first_chan: usize, samples: &mut [u8]) {
        let n = self.bipolar.len().max(1);
        for (i, s) in samples.chunks_exact_mut(2).enumerate() {
            if self.bipolar.get((first_chan + i) % n).copied().unwrap_or(true) {
                let v = u16::from_le_bytes([s[0], s[1]]).wrapping_sub(self.offset);
                s.copy_from_slice(&v.to_le_bytes());
            }
        }
    }
}

fn transfer(dev: &NiMio) -> Option<&Arc<Transfer>> {
    dev.transfers.ao.as_ref()
}

/// Move up to `max` samples from the ring buffer into the DAC FIFO.
/// Returns the samples moved.
fn load_from_buffer(dev: &NiMio, transfer: &Transfer, max: usize) -> Result<usize> {
    let available = transfer.buffer().count(BufDirection::Get) / 2;
    let mut n = available.min(max);
    // the packed FIFO takes whole pairs
    if dev.board.kind == BoardKind::Pci611x {
        n -= n % 2;
    }
    if n == 0 {
        return Ok(0);
    }
    let mut bytes = vec![0u8; n * 2];
    transfer.buffer().get(&mut bytes)?;
    let samples: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    dev.family.ao_fifo_load(dev, &samples);
    trace!(n, "AO FIFO loaded");
    Ok(n)
}

/// Every sample of a counted command has left the ring buffer.
fn all_loaded(transfer: &Transfer) -> bool {
    transfer
        .command()
        .and_then(|c| c.total_samples())
        .is_some_and(|total| transfer.buffer().get_count() >= total * 2)
}

/// Clear the FIFO and fill it from the ring buffer. Returns the samples
/// loaded.
pub(crate) fn prep_fifo(dev: &NiMio, transfer: &Transfer) -> Result<usize> {
    clear_fifo(dev);
    load_from_buffer(dev, transfer, dev.board.ao_fifo_depth as usize)
}

pub(crate) fn clear_fifo(dev: &NiMio) {
    dev.bus.stc().writew(1, stc::DAC_FIFO_CLEAR);
    if dev.board.kind == BoardKind::Pci611x {
        dev.bus.ao_window_write32(window::AO_FIFO_OFFSET_LOAD, 0x6);
    }
}

/// Refill half the FIFO. `Ok(false)` when the ring buffer ran dry before
/// the command's data was complete.
fn half_empty(dev: &NiMio, transfer: &Transfer) -> Result<bool> {
    if transfer.buffer().count(BufDirection::Get) == 0 {
        return Ok(all_loaded(transfer));
    }
    load_from_buffer(dev, transfer, (dev.board.ao_fifo_depth / 2) as usize)?;
    Ok(true)
}

// ----------------------------------------------------------------------
// Interrupts
// ----------------------------------------------------------------------

/// `Interrupt_B_Ack` bits clearing the AO conditions latched in `status`.
pub(crate) fn acks_for(status: AoStatus1) -> IntBAck {
    let mut ack = IntBAck::empty();
    for (bit, a) in [
        (AoStatus1::BC_TC, IntBAck::AO_BC_TC),
        (AoStatus1::OVERRUN, IntBAck::AO_ERROR),
        (AoStatus1::START, IntBAck::AO_START),
        (AoStatus1::START1, IntBAck::AO_START1),
        (AoStatus1::UC_TC, IntBAck::AO_UC_TC),
        (AoStatus1::UI2_TC, IntBAck::AO_UI2_TC),
        (AoStatus1::UPDATE, IntBAck::AO_UPDATE),
    ] {
        if status.contains(bit) {
            ack |= a;
        }
    }
    ack
}

/// End the waveform: stop the sequencer and leave the running state.
fn stop(dev: &NiMio, ao: &mut AoState, transfer: &Transfer, events: BufEvents) {
    transfer.event(events);
    if events.contains(BufEvents::ERROR) {
        Stats::bump(&dev.stats.ao_errors);
    }
    reset(dev, ao);
    transfer.finish();
}

fn service(dev: &NiMio, ao: &mut AoState, transfer: &Transfer, status: AoStatus1, mite: Chsr) -> Result<()> {
    if dev.dma.has_channel(DmaRole::Ao) {
        if mite.unknown() || mite.failed() {
            return Err(ComediError::io(format!(
                "AO DMA fault, channel status 0x{:08x}",
                mite.bits()
            )));
        }
        if mite.contains(Chsr::LINKC) {
            Stats::bump(&dev.stats.dma_syncs);
            dev.dma.sync(DmaRole::Ao, transfer)?;
        }
    }
    if status.contains(AoStatus1::OVERRUN) {
        return Err(ComediError::pipe(format!("AO FIFO underrun, {status}")));
    }
    if status.contains(AoStatus1::BC_TC) {
        debug!(%status, "AO waveform complete");
        stop(dev, ao, transfer, BufEvents::EOA);
        return Ok(());
    }
    let fifo_enabled = dev.bus.shadow().int_b_enable & IntBEnable::AO_FIFO.bits() != 0;
    if fifo_enabled && status.contains(AoStatus1::FIFO_REQUEST) {
        if !half_empty(dev, transfer)? {
            return Err(ComediError::pipe("AO ring buffer ran dry"));
        }
        if all_loaded(transfer) {
            // nothing left to feed; BC_TC ends the command
            dev.bus
                .set_bits(Bitfield::InterruptBEnable, u32::from(IntBEnable::AO_FIFO.bits()), false);
        }
    }
    Ok(())
}

/// Service the AO side of an interrupt. `status` is `AO_Status_1` as read
/// before acknowledging, `mite` the AO DMA channel status.
pub(crate) fn handle_interrupt(dev: &NiMio, status: AoStatus1, mite: Chsr) {
    let Some(transfer) = transfer(dev).filter(|t| t.is_running()) else {
        return;
    };
    let mut ao = dev.ao.lock();
    if let Err(e) = service(dev, &mut ao, transfer, status, mite) {
        error!(error = %e, %status, "AO waveform aborted");
        stop(dev, &mut ao, transfer, BufEvents::ERROR);
    }
}

/// The card stopped answering: fail a running waveform.
pub(crate) fn card_removed(dev: &NiMio) {
    let Some(transfer) = transfer(dev).filter(|t| t.is_running()) else {
        return;
    };
    error!("AO status reads all ones, card removed");
    dev.dma.release(DmaRole::Ao);
    transfer.event(BufEvents::ERROR | BufEvents::EOA);
    Stats::bump(&dev.stats.ao_errors);
    transfer.finish();
}

// ----------------------------------------------------------------------
// Subdevice
// ----------------------------------------------------------------------

/// Operation set of the AO subdevice.
pub(crate) struct AoOps {
    pub(crate) dev: Arc<NiMio>,
}

impl SubdeviceOps for AoOps {
    fn insn_read(&self, insn: &mut Insn) -> Result<()> {
        let ao = self.dev.ao.lock();
        let value = ao
            .last
            .get(insn.chan_desc.chan() as usize)
            .copied()
            .unwrap_or(0);
        insn.data.iter_mut().for_each(|d| *d = value);
        Ok(())
    }

    fn insn_write(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        if transfer(dev).is_some_and(|t| t.is_running()) {
            return Err(ComediError::Busy {
                subdevice: subdev::AO,
            });
        }
        let mut ao = dev.ao.lock();
        for &value in &insn.data {
            dev.family.ao_write_direct(dev, &mut ao, insn.chan_desc, value);
        }
        Ok(())
    }

    fn cmd_mask(&self) -> Option<CommandMask> {
        Some(cmd::cmd_mask())
    }

    fn do_cmdtest(&self, cmd: &mut Command) -> Result<()> {
        cmd::cmdtest(&self.dev, cmd)
    }

    fn do_cmd(&self, cmd: &Command) -> Result<()> {
        let dev = &*self.dev;
        let _guard = dev.dev_lock.lock();
        let mut ao = dev.ao.lock();
        cmd::program(dev, &mut ao, cmd)
    }

    fn cancel(&self) -> Result<()> {
        reset(&self.dev, &mut self.dev.ao.lock());
        Ok(())
    }

    fn inttrig(&self, trignum: u32) -> Result<()> {
        if trignum != 0 {
            return Err(ComediError::invalid(format!(
                "AO has no internal trigger {trignum}"
            )));
        }
        let dev = &*self.dev;
        let _guard = dev.dev_lock.lock();
        let mut ao = dev.ao.lock();
        if !ao.start_pending {
            return Err(ComediError::invalid("AO start trigger is not pending"));
        }
        cmd::start(dev, &mut ao)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRig;
    use comedi_core::AnalogReference;

    fn desc(chan: u32, range: u32) -> ChanDesc {
        ChanDesc::pack(chan, range, AnalogReference::Ground)
    }

    #[test]
    fn test_munge_subtracts_offset_on_bipolar_positions() {
        let munge = AoMunge {
            offset: 0x8000,
            bipolar: vec![true, false],
        };
        let mut data: Vec<u8> = [0x8001u16, 0x0100, 0x0000]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        munge.munge(0, &mut data);
        let out: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(out, vec![0x0001, 0x0100, 0x8000]);
    }

    #[test]
    fn test_e_series_write_inverts_bipolar() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut insn = Insn::write(desc(1, 0), vec![0x9000]);
        rig.device.insn(subdev::AO, &mut insn).unwrap();
        assert_eq!(rig.sim.dac_direct(1), Some(0x1000));
        let conf = rig.sim.board_reg(board::AO_CONFIGURATION) as u16;
        assert_eq!(conf, board::ao_channel(1) | board::AO_BIPOLAR);

        let mut insn = Insn::read(desc(1, 0), 2);
        rig.device.insn(subdev::AO, &mut insn).unwrap();
        assert_eq!(insn.data, vec![0x9000, 0x9000]);
    }

    #[test]
    fn test_e_series_unipolar_external_reference() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut insn = Insn::write(desc(0, 3), vec![0x1234]);
        rig.device.insn(subdev::AO, &mut insn).unwrap();
        assert_eq!(rig.sim.dac_direct(0), Some(0x1234));
        let conf = rig.sim.board_reg(board::AO_CONFIGURATION) as u16;
        assert_eq!(conf & board::AO_BIPOLAR, 0);
        assert_ne!(conf & board::AO_EXT_REF, 0);
    }

    #[test]
    fn test_611x_write_goes_through_window() {
        let rig = SimRig::polled("pci-6110").unwrap();
        let mut insn = Insn::write(desc(1, 0), vec![0x8000]);
        rig.device.insn(subdev::AO, &mut insn).unwrap();
        assert_eq!(
            rig.sim.dac_direct(u32::from(window::dac_direct_data(1))),
            Some(0)
        );
        assert_eq!(
            rig.sim.board_reg(0x1000 | u32::from(window::AO_IMMEDIATE)),
            1 << 1
        );
    }

    #[test]
    fn test_m_series_write_configures_bank() {
        let rig = SimRig::polled("pci-6251").unwrap();
        // ±5 V on a 625x
        let mut insn = Insn::write(desc(0, 1), vec![0xabcd]);
        rig.device.insn(subdev::AO, &mut insn).unwrap();
        assert_eq!(rig.sim.dac_direct(0), Some(0xabcd));
        assert_eq!(
            rig.sim.board_reg(m_series::ao_config_bank(0)) as u8,
            m_series::AO_DAC_REFERENCE_5V_INTERNAL | m_series::AO_DAC_OFFSET_0V
        );
        assert_eq!(rig.sim.board_reg(m_series::ao_waveform_order(0)), 0);
        assert_eq!(rig.sim.board_reg(m_series::ao_waveform_order(1)), 0xf);
    }

    #[test]
    fn test_m_series_attenuation_and_offset() {
        let rig = SimRig::polled("pci-6281").unwrap();
        // ±2 V: 10 V reference attenuated by five
        let mut insn = Insn::write(desc(1, 2), vec![0]);
        rig.device.insn(subdev::AO, &mut insn).unwrap();
        assert_eq!(
            rig.sim.board_reg(m_series::ao_reference_attenuation(1)) as u8,
            m_series::AO_ATTENUATE_X5
        );
        // 0..10 V: 5 V reference with a 5 V offset
        let mut insn = Insn::write(desc(1, 4), vec![0]);
        rig.device.insn(subdev::AO, &mut insn).unwrap();
        assert_eq!(
            rig.sim.board_reg(m_series::ao_config_bank(1)) as u8,
            m_series::AO_DAC_REFERENCE_5V_INTERNAL | m_series::AO_DAC_OFFSET_5V
        );
    }

    #[test]
    fn test_acks_map_status_bits() {
        let ack = acks_for(AoStatus1::OVERRUN | AoStatus1::BC_TC | AoStatus1::FIFO_REQUEST);
        assert_eq!(ack, IntBAck::AO_ERROR | IntBAck::AO_BC_TC);
    }

    #[test]
    fn test_reset_keeps_counter_interrupts() {
        let rig = SimRig::polled("pci-6221").unwrap();
        rig.driver.bus.set_bits(
            Bitfield::InterruptBEnable,
            u32::from((IntBEnable::AO_FIFO | IntBEnable::G1_TC).bits()),
            true,
        );
        reset(&rig.driver, &mut rig.driver.ao.lock());
        assert_eq!(rig.driver.bus.shadow().int_b_enable, IntBEnable::G1_TC.bits());
        assert_eq!(
            rig.sim.stc_reg(stc::AO_MODE_3),
            ao_mode_3::LAST_GATE_DISABLE
        );
    }
}
