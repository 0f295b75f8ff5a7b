//! AI FIFO access for the four data layouts.
//!
//! | Family | FIFO word | Empty test | Stranded sample |
//! |--------|-----------|------------|-----------------|
//! | E-series | 16-bit `ADC_FIFO_Data` | `AI_Status_1` | - |
//! | 611x | 32-bit pair, high half first | `AI_Status_1` | `XXX_Status` bit 7 |
//! | 6143 | 32-bit pair from `AIFIFO_Data` | `AIFIFO_Status` | status bit 0 |
//! | M-series | 32-bit `AI_FIFO_Data` | `AI_Status_1` | - |
//!
//! Drain loops are bounded by the FIFO depth so a board that reads back
//! all ones (pulled card) cannot spin them forever.

use std::time::Duration;

use comedi_core::wait::poll_until;
use comedi_core::Result;

use crate::device::{NiMio, NI_TIMEOUT};
use crate::regs::{ai_command_1, board, m_series, r611x, r6143, stc, AiStatus1};

pub(crate) fn status(dev: &NiMio) -> AiStatus1 {
    AiStatus1::from_bits_retain(dev.bus.stc().readw(stc::AI_STATUS_1))
}

fn fifo_empty(dev: &NiMio) -> bool {
    status(dev).contains(AiStatus1::FIFO_EMPTY)
}

fn convert_pulse(dev: &NiMio) {
    dev.bus
        .stc()
        .writew(ai_command_1::CONVERT_PULSE, stc::AI_COMMAND_1);
}

fn drain_budget(dev: &NiMio) -> usize {
    dev.board.ai_fifo_depth as usize + 1
}

fn push_pair(out: &mut Vec<u32>, dl: u32) {
    out.push(dl >> 16);
    out.push(dl & 0xffff);
}

// E-series

pub(crate) fn read_words(dev: &NiMio, n: usize, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    out.extend((0..n).map(|_| u32::from(io.read16(board::ADC_FIFO_DATA))));
}

pub(crate) fn dregs_words(dev: &NiMio, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    for _ in 0..drain_budget(dev) {
        if fifo_empty(dev) {
            break;
        }
        out.push(u32::from(io.read16(board::ADC_FIFO_DATA)));
    }
}

pub(crate) fn convert_one_word(dev: &NiMio, signbits: u32) -> Result<u32> {
    convert_pulse(dev);
    poll_until(NI_TIMEOUT, Duration::ZERO, "AI conversion", || !fifo_empty(dev))?;
    let d = u32::from(dev.bus.io().read16(board::ADC_FIFO_DATA));
    Ok(d.wrapping_add(signbits) & 0xffff)
}

// 611x

pub(crate) fn read_packed_611x(dev: &NiMio, n: usize, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    for _ in 0..n / 2 {
        push_pair(out, io.read32(r611x::ADC_FIFO_DATA));
    }
    if n % 2 == 1 {
        out.push(io.read32(r611x::ADC_FIFO_DATA) >> 16);
    }
}

pub(crate) fn dregs_packed_611x(dev: &NiMio, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    for _ in 0..drain_budget(dev) / 2 {
        if fifo_empty(dev) {
            break;
        }
        push_pair(out, io.read32(r611x::ADC_FIFO_DATA));
    }
}

fn lower_not_empty_611x(dev: &NiMio) -> bool {
    dev.bus.io().read8(board::XXX_STATUS) & board::AI_FIFO_LOWER_NOT_EMPTY != 0
}

pub(crate) fn last_sample_611x(dev: &NiMio) -> Option<u32> {
    lower_not_empty_611x(dev).then(|| dev.bus.io().read32(r611x::ADC_FIFO_DATA) >> 16)
}

pub(crate) fn convert_one_611x(dev: &NiMio, signbits: u32) -> Result<u32> {
    convert_pulse(dev);
    let io = dev.bus.io();
    let mut d = 0;
    poll_until(NI_TIMEOUT, Duration::ZERO, "AI conversion", || {
        if lower_not_empty_611x(dev) {
            d = io.read32(r611x::ADC_FIFO_DATA) >> 16;
            true
        } else if !fifo_empty(dev) {
            d = io.read32(r611x::ADC_FIFO_DATA) & 0xffff;
            true
        } else {
            false
        }
    })?;
    Ok(d.wrapping_add(signbits) & 0xffff)
}

// 6143

fn status_6143(dev: &NiMio) -> u32 {
    dev.bus.io().read32(r6143::AIFIFO_STATUS)
}

/// Move the stranded half-word into the data register and read it.
fn take_stranded_6143(dev: &NiMio) -> u32 {
    let io = dev.bus.io();
    io.write32(r6143::AIFIFO_CONTROL, r6143::FIFO_STRANDED_SAMPLE);
    io.read32(r6143::AIFIFO_DATA) >> 16
}

pub(crate) fn read_packed_6143(dev: &NiMio, n: usize, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    for _ in 0..n / 2 {
        push_pair(out, io.read32(r6143::AIFIFO_DATA));
    }
    if n % 2 == 1 {
        out.push(take_stranded_6143(dev));
    }
}

pub(crate) fn dregs_packed_6143(dev: &NiMio, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    for _ in 0..drain_budget(dev) / 2 {
        if status_6143(dev) & r6143::FIFO_NOT_EMPTY == 0 {
            break;
        }
        push_pair(out, io.read32(r6143::AIFIFO_DATA));
    }
}

pub(crate) fn stranded_sample_6143(dev: &NiMio) -> Option<u32> {
    let st = status_6143(dev);
    (st & r6143::FIFO_STRANDED_SAMPLE != 0 && st != u32::MAX).then(|| take_stranded_6143(dev))
}

pub(crate) fn convert_one_6143(dev: &NiMio, signbits: u32) -> Result<u32> {
    convert_pulse(dev);
    poll_until(NI_TIMEOUT, Duration::ZERO, "AI conversion", || {
        status_6143(dev) & r6143::FIFO_STRANDED_SAMPLE != 0
    })?;
    Ok(take_stranded_6143(dev).wrapping_add(signbits) & 0xffff)
}

// M-series

pub(crate) fn read_m_series(dev: &NiMio, n: usize, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    let mask = dev.board.ai_maxdata();
    out.extend((0..n).map(|_| io.read32(m_series::AI_FIFO_DATA) & mask));
}

pub(crate) fn dregs_m_series(dev: &NiMio, out: &mut Vec<u32>) {
    let io = dev.bus.io();
    let mask = dev.board.ai_maxdata();
    for _ in 0..drain_budget(dev) {
        if fifo_empty(dev) {
            break;
        }
        out.push(io.read32(m_series::AI_FIFO_DATA) & mask);
    }
}

pub(crate) fn convert_one_m_series(dev: &NiMio) -> Result<u32> {
    convert_pulse(dev);
    poll_until(NI_TIMEOUT, Duration::ZERO, "AI conversion", || !fifo_empty(dev))?;
    Ok(dev.bus.io().read32(m_series::AI_FIFO_DATA) & dev.board.ai_maxdata())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sample_code, SimRig};
    use comedi_core::{AnalogReference, ChanDesc};

    fn load(rig: &SimRig, chans: &[u32]) {
        let list: Vec<_> = chans
            .iter()
            .map(|&c| ChanDesc::pack(c, 0, AnalogReference::Diff))
            .collect();
        let mut ai = rig.driver.ai.lock();
        rig.driver.family.load_chanlist(&rig.driver, &mut ai, &list).unwrap();
    }

    #[test]
    fn test_611x_pairs_and_stranded_sample() {
        let rig = SimRig::polled("pci-6110").unwrap();
        load(&rig, &[0, 1, 2]);
        let stc = rig.driver.bus.stc();
        stc.writew(1, stc::ADC_FIFO_CLEAR);
        for _ in 0..3 {
            convert_pulse(&rig.driver);
        }
        convert_pulse(&rig.driver);
        assert_eq!(rig.sim.ai_fifo_len(), 3);

        let mut out = Vec::new();
        dregs_packed_611x(&rig.driver, &mut out);
        assert_eq!(out.len(), 2);
        let last = last_sample_611x(&rig.driver).unwrap();
        let offset = 0x800;
        assert_eq!((last + offset) & 0xffff, sample_code(2, 0, 0xfff));
        assert_eq!(last_sample_611x(&rig.driver), None);
    }

    #[test]
    fn test_6143_odd_read_uses_stranded_path() {
        let rig = SimRig::polled("pci-6143").unwrap();
        load(&rig, &[0, 1, 2]);
        convert_pulse(&rig.driver);
        let mut out = Vec::new();
        read_packed_6143(&rig.driver, 3, &mut out);
        let offset = 0x8000;
        let codes: Vec<_> = out.iter().map(|&d| (d + offset) & 0xffff).collect();
        assert_eq!(
            codes,
            (0..3).map(|c| sample_code(c, 0, 0xffff)).collect::<Vec<_>>()
        );
        assert_eq!(rig.sim.ai_fifo_len(), 0);
        assert_eq!(stranded_sample_6143(&rig.driver), None);
    }

    #[test]
    fn test_m_series_single_conversion() {
        let rig = SimRig::polled("pci-6221").unwrap();
        load(&rig, &[3]);
        let d = convert_one_m_series(&rig.driver).unwrap();
        assert_eq!(d >> 8, 3);
    }

    #[test]
    fn test_conversion_times_out_on_pulled_card() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        load(&rig, &[0]);
        rig.sim.remove_card();
        let err = convert_one_word(&rig.driver, 0).unwrap_err();
        assert!(err.is_timeout());
        let mut out = Vec::new();
        dregs_words(&rig.driver, &mut out);
        assert!(out.is_empty());
    }
}
