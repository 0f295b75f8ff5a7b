//! Channel/gain list programming.
//!
//! Configuration memory holds one entry per scan position. The hardware
//! walks it in order on every scan and wraps after the entry carrying the
//! last-channel bit. Programming also records, per position, the offset the
//! munge adds to turn the raw FIFO word into the caller's sample format.

use comedi_core::{AnalogReference, ChanDesc, ChanFlags, ComediError, Result};
use comedi_core::wait::poll_until;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::ai::AiState;
use crate::board::{BoardInfo, BoardKind};
use crate::device::{NiMio, NI_TIMEOUT};
use crate::ranges::UNIPOLAR_CODE;
use crate::regs::{ai_command_1, board, m_series, r611x, r6143, stc, AiStatus1};

/// Check every descriptor against the board and look up its gain code.
fn gain_codes(board: &BoardInfo, list: &[ChanDesc]) -> Result<Vec<u16>> {
    if list.is_empty() {
        return Err(ComediError::invalid("empty channel list"));
    }
    // 611x and 6143 force their own reference; the rest must name one
    let free_aref = matches!(board.kind, BoardKind::ESeries | BoardKind::MSeries);
    list.iter()
        .enumerate()
        .map(|(i, desc)| {
            if free_aref && desc.aref() == AnalogReference::Other {
                return Err(ComediError::invalid(format!(
                    "scan position {i}: no analog reference given"
                )));
            }
            if desc.chan() >= board.n_adchan {
                return Err(ComediError::invalid(format!(
                    "scan position {i}: channel {} out of {}",
                    desc.chan(),
                    board.n_adchan
                )));
            }
            board.gains.code(desc.range()).ok_or_else(|| {
                ComediError::invalid(format!(
                    "scan position {i}: range {} not in the gain table",
                    desc.range()
                ))
            })
        })
        .collect()
}

fn dither(board: &BoardInfo, desc: ChanDesc) -> bool {
    board.alwaysdither || desc.has(ChanFlags::DITHER)
}

/// Convert once so the first real conversion starts from a settled mux,
/// then throw the sample away.
fn prime(dev: &NiMio) {
    let stc = dev.bus.stc();
    stc.writew(ai_command_1::CONVERT_PULSE, stc::AI_COMMAND_1);
    let settled = poll_until(NI_TIMEOUT, Duration::from_micros(1), "channel list prime", || {
        !AiStatus1::from_bits_retain(stc.readw(stc::AI_STATUS_1)).contains(AiStatus1::FIFO_EMPTY)
    });
    match settled {
        Ok(_) => stc.writew(1, stc::ADC_FIFO_CLEAR),
        Err(_) => warn!("timeout loading channel/gain list"),
    }
}

/// Strobe the 6143 calibration relay when the source mode changes.
fn switch_relay(dev: &NiMio, ai: &mut AiState, calibrate: bool) {
    if calibrate == ai.calib_source_enabled {
        return;
    }
    let io = dev.bus.io();
    let source = (ai.calib_source & 0xf) as u16;
    let strobe = if calibrate {
        r6143::CALIBRATION_CHANNEL_RELAY_ON
    } else {
        r6143::CALIBRATION_CHANNEL_RELAY_OFF
    };
    io.write16(r6143::CALIBRATION_CHANNEL, source | strobe);
    io.write16(r6143::CALIBRATION_CHANNEL, source);
    ai.calib_source_enabled = calibrate;
    debug!(calibrate, source, "calibration relay switched");
    std::thread::sleep(dev.config.relay_settle());
}

/// E-series, 611x and 6143 configuration memory.
pub(crate) fn load_legacy(dev: &NiMio, ai: &mut AiState, list: &[ChanDesc]) -> Result<()> {
    let board = dev.board;
    let codes = gain_codes(board, list)?;
    let kind = board.kind;
    let simultaneous = matches!(kind, BoardKind::Pci611x | BoardKind::Pci6143);

    if list.len() == 1 && !simultaneous {
        if ai.cached == Some(list[0]) {
            trace!(desc = ?list[0], "channel list unchanged");
            return Ok(());
        }
        ai.cached = Some(list[0]);
    } else {
        ai.cached = None;
    }

    let stc = dev.bus.stc();
    let io = dev.bus.io();
    stc.writew(1, stc::CONFIGURATION_MEMORY_CLEAR);

    if kind == BoardKind::Pci6143 {
        switch_relay(dev, ai, list[0].has(ChanFlags::ALT_SOURCE));
    }

    let offset = 1u32 << (board.adbits - 1);
    ai.offsets.clear();
    for (i, (desc, &code)) in list.iter().zip(&codes).enumerate() {
        let alt = desc.has(ChanFlags::ALT_SOURCE);
        let chan = if alt && kind != BoardKind::Pci6143 {
            ai.calib_source
        } else {
            desc.chan()
        };

        let bipolar = kind == BoardKind::Pci611x || code & UNIPOLAR_CODE == 0;
        ai.offsets.push(if bipolar { offset } else { 0 });

        let mut hi = 0;
        if alt {
            if kind == BoardKind::Pci611x {
                io.write16(r611x::CALIBRATION_CHANNEL_SELECT, (desc.chan() & 0x3) as u16);
            }
        } else {
            let aref = match kind {
                BoardKind::Pci611x => AnalogReference::Diff,
                BoardKind::Pci6143 => AnalogReference::Other,
                _ => desc.aref(),
            };
            hi |= match aref {
                AnalogReference::Diff => board::AI_DIFFERENTIAL,
                AnalogReference::Common => board::AI_COMMON,
                AnalogReference::Ground => board::AI_GROUND,
                AnalogReference::Other => 0,
            };
        }
        hi |= board::ai_config_channel(chan);
        io.write16(board::CONFIGURATION_MEMORY_HIGH, hi);

        if kind != BoardKind::Pci6143 {
            let mut lo = code;
            if i == list.len() - 1 {
                lo |= board::AI_LAST_CHANNEL;
            }
            if dither(board, *desc) {
                lo |= board::AI_DITHER;
            }
            io.write16(board::CONFIGURATION_MEMORY_LOW, lo);
        }
    }

    if !simultaneous {
        prime(dev);
    }
    debug!(n_chan = list.len(), offsets = ?ai.offsets, "channel list loaded");
    Ok(())
}

/// M-series configuration FIFO.
pub(crate) fn load_m_series(dev: &NiMio, ai: &mut AiState, list: &[ChanDesc]) -> Result<()> {
    let board = dev.board;
    let codes = gain_codes(board, list)?;
    let stc = dev.bus.stc();
    let io = dev.bus.io();

    stc.writew(1, stc::CONFIGURATION_MEMORY_CLEAR);

    let first = list[0];
    let bypass = if first.has(ChanFlags::ALT_SOURCE) {
        let mut bits = m_series::AI_BYPASS_CONFIG_FIFO
            | first.chan()
            | (ai.calib_source & calib_source_mask())
            | m_series::ai_bypass_gain(codes[0])
            | m_series::AI_BYPASS_POLARITY;
        if dither(board, first) {
            bits |= m_series::AI_BYPASS_DITHER;
        }
        bits
    } else {
        0
    };
    io.write32(m_series::AI_CONFIG_FIFO_BYPASS, bypass);

    ai.cached = None;
    ai.offsets.clear();
    for (i, (desc, &code)) in list.iter().zip(&codes).enumerate() {
        ai.offsets.push(0);
        let mut bits = match desc.aref() {
            AnalogReference::Diff => m_series::AI_CONFIG_CHANNEL_TYPE_DIFFERENTIAL,
            AnalogReference::Common => m_series::AI_CONFIG_CHANNEL_TYPE_COMMON_REF,
            AnalogReference::Ground => m_series::AI_CONFIG_CHANNEL_TYPE_GROUND_REF,
            AnalogReference::Other => 0,
        };
        bits |= m_series::ai_config_channel(desc.chan())
            | m_series::ai_config_bank(desc.chan())
            | m_series::ai_config_gain(code)
            | m_series::AI_CONFIG_POLARITY;
        if i == list.len() - 1 {
            bits |= m_series::AI_CONFIG_LAST_CHANNEL;
        }
        if dither(board, *desc) {
            bits |= m_series::AI_CONFIG_DITHER;
        }
        io.write16(m_series::AI_CONFIG_FIFO_DATA, bits);
    }

    prime(dev);
    debug!(n_chan = list.len(), bypass = format_args!("0x{bypass:08x}"), "channel list loaded");
    Ok(())
}

/// Calibration source bits an M-series board accepts.
pub(crate) const fn calib_source_mask() -> u32 {
    m_series::AI_BYPASS_CAL_SEL_POS_MASK
        | m_series::AI_BYPASS_CAL_SEL_NEG_MASK
        | m_series::AI_BYPASS_MODE_MUX_MASK
        | m_series::AO_BYPASS_AO_CAL_SEL_MASK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRig;

    fn desc(chan: u32, range: u32) -> ChanDesc {
        ChanDesc::pack(chan, range, AnalogReference::Diff)
    }

    #[test]
    fn test_offsets_follow_range_polarity_in_order() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        let list = [desc(0, 0), desc(1, 8), desc(2, 3), desc(3, 15)];
        let mut ai = rig.driver.ai.lock();
        load_legacy(&rig.driver, &mut ai, &list).unwrap();
        assert_eq!(ai.offsets, vec![0x8000, 0, 0x8000, 0]);

        let entries = rig.sim.config_memory();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1].low & 0x1ff, 0x100);
        assert_eq!(entries[3].low & board::AI_LAST_CHANNEL, board::AI_LAST_CHANNEL);
        assert_eq!(entries[2].high & 0x3f, 2);
        assert_eq!(entries[2].high & (3 << 12), board::AI_DIFFERENTIAL);
    }

    #[test]
    fn test_single_channel_list_is_cached() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        let mut ai = rig.driver.ai.lock();
        load_legacy(&rig.driver, &mut ai, &[desc(5, 1)]).unwrap();
        let clears = rig.sim.stc_writes(stc::CONFIGURATION_MEMORY_CLEAR);
        load_legacy(&rig.driver, &mut ai, &[desc(5, 1)]).unwrap();
        assert_eq!(rig.sim.stc_writes(stc::CONFIGURATION_MEMORY_CLEAR), clears);
        load_legacy(&rig.driver, &mut ai, &[desc(6, 1)]).unwrap();
        assert_eq!(rig.sim.stc_writes(stc::CONFIGURATION_MEMORY_CLEAR), clears + 1);
    }

    #[test]
    fn test_611x_forces_differential_and_bipolar() {
        let rig = SimRig::attach("pci-6110").unwrap();
        let mut ai = rig.driver.ai.lock();
        let list = [ChanDesc::pack(0, 0, AnalogReference::Ground), desc(1, 7)];
        load_legacy(&rig.driver, &mut ai, &list).unwrap();
        assert_eq!(ai.offsets, vec![0x800, 0x800]);
        for entry in rig.sim.config_memory() {
            assert_eq!(entry.high & (3 << 12), board::AI_DIFFERENTIAL);
        }
    }

    #[test]
    fn test_m_series_entries_carry_polarity_and_last_bit() {
        let rig = SimRig::attach("pci-6221").unwrap();
        let mut ai = rig.driver.ai.lock();
        let list = [desc(0, 0), desc(1, 3)];
        load_m_series(&rig.driver, &mut ai, &list).unwrap();
        assert_eq!(ai.offsets, vec![0, 0]);
        let entries = rig.sim.config_memory();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.low & m_series::AI_CONFIG_POLARITY != 0));
        assert_ne!(entries[1].low & m_series::AI_CONFIG_LAST_CHANNEL, 0);
        assert_eq!(rig.sim.board_reg(m_series::AI_CONFIG_FIFO_BYPASS), 0);
    }

    #[test]
    fn test_malformed_descriptor_is_rejected() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        let mut ai = rig.driver.ai.lock();
        let err = load_legacy(&rig.driver, &mut ai, &[desc(0, 0), desc(0, 40)]).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
        let err = load_legacy(&rig.driver, &mut ai, &[desc(99, 0)]).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
        assert!(load_legacy(&rig.driver, &mut ai, &[]).is_err());
    }

    #[test]
    fn test_6143_relay_toggles_once() {
        let rig = SimRig::attach("pci-6143").unwrap();
        let mut ai = rig.driver.ai.lock();
        let cal = ChanDesc::pack_flags(0, 0, AnalogReference::Diff, ChanFlags::ALT_SOURCE);
        load_legacy(&rig.driver, &mut ai, &[cal]).unwrap();
        assert!(ai.calib_source_enabled);
        let strobes = rig.sim.writes_to(r6143::CALIBRATION_CHANNEL);
        load_legacy(&rig.driver, &mut ai, &[cal]).unwrap();
        assert_eq!(rig.sim.writes_to(r6143::CALIBRATION_CHANNEL), strobes);
        load_legacy(&rig.driver, &mut ai, &[desc(0, 0)]).unwrap();
        assert!(!ai.calib_source_enabled);
        assert_eq!(rig.sim.writes_to(r6143::CALIBRATION_CHANNEL), strobes + 2);
    }
}
