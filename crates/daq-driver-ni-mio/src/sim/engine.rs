//! Register model behind [`super::SimBoard`].
//!
//! The model keeps the last value written to every STC register and
//! derives the read-only status registers from a handful of small state
//! machines: the AI sequencer and FIFO, the AO FIFO and update counter,
//! two counters, the M-series correlated DIO FIFO, and the serial lines
//! feeding the EEPROM and the calibration DACs.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::mite::SimMite;
use super::{CaldacLoad, ConfigEntry};
use crate::board::{BoardInfo, BoardKind};
use crate::regs::{
    ai_command_1, ai_command_2, ai_mode_1, ai_mode_3, ao_command_1, ao_command_2, ao_mode_1,
    ao_mode_3, board, dio, g_command, g_status, interrupt_control, joint_reset, m_series, r611x,
    r6143, stc, AiStatus1, AoStatus1, IntAAck, IntAEnable, IntBAck, IntBEnable,
};

pub(super) const CDO_FIFO_DEPTH: usize = 16;

/// Inverse of [`crate::regs::dma_channel_select_bits`].
fn selected_channel(bits: u8) -> Option<usize> {
    match bits {
        0x1 => Some(0),
        0x2 => Some(1),
        0x4 => Some(2),
        0x3 => Some(4),
        0x5 => Some(5),
        _ => None,
    }
}

#[derive(Default)]
struct AiEngine {
    fifo: VecDeque<u32>,
    pointer: usize,
    armed: bool,
    running: bool,
    sc: u32,
    scans: u64,
    emitted: u64,
    swallow: u32,
    latched: AiStatus1,
    fifo_reads: usize,
    stuck_half_full: bool,
}

#[derive(Default)]
struct AoEngine {
    fifo: VecDeque<u16>,
    armed: bool,
    running: bool,
    uc: u32,
    updates: u32,
    latched: AoStatus1,
    outputs: Vec<u16>,
}

#[derive(Default, Clone, Copy)]
struct Counter {
    armed: bool,
    count: u32,
    tc: bool,
}

#[derive(Default)]
struct CdoEngine {
    fifo: VecDeque<u32>,
    armed: bool,
    status: u32,
    error_irq: bool,
    empty_irq: bool,
    outputs: Vec<u32>,
}

#[derive(Default)]
struct EepromPort {
    command: u32,
    in_bits: u32,
    out: u8,
    out_bits: u32,
    promout: bool,
}

#[derive(Default)]
struct SerialPort {
    last: u8,
    shift: u32,
    bits: u32,
}

pub(super) struct SimState {
    board: &'static BoardInfo,
    pub(super) mite: Option<Arc<SimMite>>,
    pub(super) removed: bool,
    window: u32,
    ao_window: u16,
    stc: [u16; 128],
    stc_writes: [usize; 128],
    regs: HashMap<u32, u32>,
    reg_writes: HashMap<u32, usize>,
    pub(super) config: Vec<ConfigEntry>,
    pending_high: Option<u16>,
    ai: AiEngine,
    ao: AoEngine,
    counters: [Counter; 2],
    cdo: CdoEngine,
    eeprom: EepromPort,
    serial: SerialPort,
    pub(super) caldac_loads: Vec<CaldacLoad>,
    pub(super) eeprom_image: Vec<u8>,
    pub(super) dio_inputs: u32,
    pub(super) pfi_inputs: u16,
    pub(super) serial_loopback: bool,
    pub(super) serial_input: u8,
    serial_in: u16,
    pub(super) dac_direct: HashMap<u32, u32>,
}

impl SimState {
    pub(super) fn new(board: &'static BoardInfo) -> Self {
        Self {
            board,
            mite: None,
            removed: false,
            window: 0,
            ao_window: 0,
            stc: [0; 128],
            stc_writes: [0; 128],
            regs: HashMap::new(),
            reg_writes: HashMap::new(),
            config: Vec::new(),
            pending_high: None,
            ai: AiEngine::default(),
            ao: AoEngine::default(),
            counters: [Counter::default(); 2],
            cdo: CdoEngine::default(),
            eeprom: EepromPort::default(),
            serial: SerialPort::default(),
            caldac_loads: Vec::new(),
            eeprom_image: (0..1024u32).map(|i| (i.wrapping_mul(7) ^ 0x5a) as u8).collect(),
            dio_inputs: 0,
            pfi_inputs: 0,
            serial_loopback: false,
            serial_input: 0,
            serial_in: 0,
            dac_direct: HashMap::new(),
        }
    }

    fn packed(&self) -> bool {
        matches!(self.board.kind, BoardKind::Pci611x | BoardKind::Pci6143)
    }

    fn m_series(&self) -> bool {
        self.board.is_m_series()
    }

    fn reg(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn stc_pair(&self, reg: u32) -> u32 {
        let r = reg as usize & 0x7f;
        ((self.stc[r] as u32) << 16) | self.stc[(r + 1) & 0x7f] as u32
    }

    pub(super) fn board_reg(&self, offset: u32) -> u32 {
        self.reg(offset)
    }

    pub(super) fn writes_to(&self, offset: u32) -> usize {
        self.reg_writes.get(&offset).copied().unwrap_or(0)
    }

    pub(super) fn stc_reg(&self, reg: u32) -> u16 {
        self.stc[reg as usize & 0x7f]
    }

    pub(super) fn stc_writes(&self, reg: u32) -> usize {
        self.stc_writes[reg as usize & 0x7f]
    }

    fn record(&mut self, offset: u32, value: u32) {
        self.regs.insert(offset, value);
        *self.reg_writes.entry(offset).or_default() += 1;
    }

    // Bus decode

    pub(super) fn read8(&mut self, offset: u32) -> u8 {
        if self.removed {
            return 0xff;
        }
        if self.m_series() {
            if offset >= m_series::EEPROM_IMAGE {
                let i = (offset - m_series::EEPROM_IMAGE) as usize;
                return self.eeprom_image.get(i).copied().unwrap_or(0xff);
            }
            return self.reg(offset) as u8;
        }
        if offset == board::XXX_STATUS {
            let mut v = 0;
            if self.eeprom.promout {
                v |= board::PROMOUT;
            }
            if self.board.kind == BoardKind::Pci611x && self.ai.fifo.len() == 1 {
                v |= board::AI_FIFO_LOWER_NOT_EMPTY;
            }
            return v;
        }
        self.reg(offset) as u8
    }

    pub(super) fn read16(&mut self, offset: u32) -> u16 {
        if self.removed {
            return 0xffff;
        }
        if self.m_series() {
            if offset == m_series::PFI_DI {
                return self.pfi_inputs;
            }
            if let Some(reg) = reverse16(offset) {
                return self.stc_read(reg);
            }
            return self.reg(offset) as u16;
        }
        match offset {
            board::WINDOW_ADDRESS => self.window as u16,
            board::WINDOW_DATA => self.stc_read(self.window),
            o if o < 0x10 && o % 2 == 0 => self.stc_read(o / 2),
            board::ADC_FIFO_DATA if self.board.kind == BoardKind::ESeries => {
                self.ai.fifo_reads += 1;
                self.ai.fifo.pop_front().unwrap_or(0) as u16
            }
            _ => self.reg(offset) as u16,
        }
    }

    pub(super) fn read32(&mut self, offset: u32) -> u32 {
        if self.removed {
            return 0xffff_ffff;
        }
        if self.m_series() {
            return match offset {
                m_series::AI_FIFO_DATA => {
                    self.ai.fifo_reads += 1;
                    self.ai.fifo.pop_front().unwrap_or(0)
                }
                m_series::STATIC_DIGITAL_INPUT => {
                    let dir = self.reg(m_series::DIO_DIRECTION);
                    (self.reg(m_series::STATIC_DIGITAL_OUTPUT) & dir) | (self.dio_inputs & !dir)
                }
                m_series::CDIO_STATUS => self.cdo_status(),
                o => match reverse32(o) {
                    Some(reg) => ((self.stc_read(reg) as u32) << 16) | self.stc_read(reg + 1) as u32,
                    None => self.reg(o),
                },
            };
        }
        match (self.board.kind, offset) {
            (BoardKind::Pci611x, r611x::ADC_FIFO_DATA) | (BoardKind::Pci6143, r6143::AIFIFO_DATA) => {
                self.pop_pair()
            }
            (BoardKind::Pci6143, r6143::AIFIFO_STATUS) => match self.ai.fifo.len() {
                0 => 0,
                1 => r6143::FIFO_STRANDED_SAMPLE,
                _ => r6143::FIFO_NOT_EMPTY,
            },
            _ => self.reg(offset),
        }
    }

    fn pop_pair(&mut self) -> u32 {
        self.ai.fifo_reads += 1;
        let hi = self.ai.fifo.pop_front().unwrap_or(0) & 0xffff;
        let lo = self.ai.fifo.pop_front().unwrap_or(0) & 0xffff;
        (hi << 16) | lo
    }

    pub(super) fn write8(&mut self, offset: u32, value: u8) {
        self.record(offset, value as u32);
        if !self.m_series() && offset == board::SERIAL_COMMAND {
            self.serial_command(value);
        }
    }

    pub(super) fn write16(&mut self, offset: u32, value: u16) {
        self.record(offset, value as u32);
        if self.m_series() {
            if offset == m_series::AI_CONFIG_FIFO_DATA {
                self.config.push(ConfigEntry { high: 0, low: value });
            } else if let Some(reg) = reverse16(offset) {
                self.stc_write(reg, value);
            }
            return;
        }
        let kind = self.board.kind;
        match offset {
            board::WINDOW_ADDRESS => self.window = value as u32,
            board::WINDOW_DATA => self.stc_write(self.window, value),
            o if o < 0x10 && o % 2 == 0 => self.stc_write(o / 2, value),
            board::CONFIGURATION_MEMORY_HIGH => {
                if kind == BoardKind::Pci6143 {
                    self.config.push(ConfigEntry { high: value, low: 0 });
                } else {
                    self.pending_high = Some(value);
                }
            }
            board::CONFIGURATION_MEMORY_LOW => {
                let high = self.pending_high.take().unwrap_or(0);
                self.config.push(ConfigEntry { high, low: value });
            }
            r611x::AO_WINDOW_ADDRESS if kind == BoardKind::Pci611x => self.ao_window = value,
            r611x::AO_WINDOW_DATA if kind == BoardKind::Pci611x => {
                self.ao_window_write(value as u32)
            }
            board::DAC0_DIRECT_DATA => {
                self.dac_direct.insert(0, value as u32);
            }
            board::DAC1_DIRECT_DATA => {
                self.dac_direct.insert(1, value as u32);
            }
            board::DAC_FIFO_DATA => self.ao_push(value),
            _ => {}
        }
    }

    pub(super) fn write32(&mut self, offset: u32, value: u32) {
        self.record(offset, value);
        if self.m_series() {
            match offset {
                m_series::AO_FIFO_DATA => self.ao_push(value as u16),
                m_series::CDO_FIFO_DATA => {
                    if self.cdo.fifo.len() < CDO_FIFO_DEPTH {
                        self.cdo.fifo.push_back(value);
                    } else {
                        self.cdo.status |= m_series::CDO_OVERRUN;
                    }
                }
                m_series::CDIO_COMMAND => self.cdo_command(value),
                o if (0..self.board.n_aochan).any(|c| m_series::dac_direct_data(c) == o) => {
                    self.dac_direct.insert((o - m_series::dac_direct_data(0)) / 4, value);
                }
                o => {
                    if let Some(reg) = reverse32(o) {
                        self.stc_write(reg, (value >> 16) as u16);
                        self.stc_write(reg + 1, value as u16);
                    }
                }
            }
            return;
        }
        match (self.board.kind, offset) {
            (BoardKind::Pci611x, r611x::DAC_FIFO_DATA) => {
                self.ao_push(value as u16);
                self.ao_push((value >> 16) as u16);
            }
            (BoardKind::Pci611x, r611x::AO_WINDOW_DATA) => self.ao_window_write(value),
            (BoardKind::Pci6143, r6143::AIFIFO_CONTROL) => {
                if value & r6143::FIFO_FLUSHING != 0 {
                    self.ai.fifo.clear();
                }
            }
            _ => {}
        }
    }

    fn ao_window_write(&mut self, value: u32) {
        let addr = self.ao_window;
        if addr < 0x10 {
            self.dac_direct.insert(addr as u32, value);
        }
        self.record(0x1000 | addr as u32, value);
    }

    // STC side effects

    fn stc_read(&mut self, reg: u32) -> u16 {
        match reg {
            stc::AI_STATUS_1 => self.ai_status().bits(),
            stc::AO_STATUS_1 => {
                self.pump_ao_dma();
                self.ao_status().bits()
            }
            stc::G_STATUS => {
                let mut v = 0;
                for (i, c) in self.counters.iter().enumerate() {
                    if c.armed {
                        v |= g_status::armed(i) | g_status::counting(i);
                    }
                }
                v
            }
            stc::AI_STATUS_2 | stc::AO_STATUS_2 => 0,
            stc::DIO_PARALLEL_INPUT => self.dio_parallel_input(),
            8 | 12 => (self.counters[0].count >> 16) as u16,
            9 | 13 => self.counters[0].count as u16,
            10 | 14 => (self.counters[1].count >> 16) as u16,
            11 | 15 => self.counters[1].count as u16,
            stc::JOINT_STATUS_1 | stc::JOINT_STATUS_2 => 0,
            stc::DIO_SERIAL_INPUT => self.serial_in,
            r => self.stc[r as usize & 0x7f],
        }
    }

    pub(super) fn stc_write(&mut self, reg: u32, value: u16) {
        let r = reg as usize & 0x7f;
        self.stc[r] = value;
        self.stc_writes[r] += 1;
        match reg {
            stc::AI_COMMAND_1 => self.ai_command_1(value),
            stc::AI_COMMAND_2 => {
                if value & ai_command_2::START1_PULSE != 0 && self.ai.armed {
                    self.ai_start();
                }
            }
            stc::AO_COMMAND_1 => self.ao_command_1(value),
            stc::AO_COMMAND_2 => {
                if value & ao_command_2::START1_PULSE != 0 && self.ao.armed {
                    self.ao.running = true;
                    self.ao.updates = 0;
                    self.ao.latched |= AoStatus1::START1;
                }
            }
            stc::G0_COMMAND => self.counter_command(0, value),
            stc::G1_COMMAND => self.counter_command(1, value),
            stc::JOINT_RESET => self.joint_reset(value),
            stc::INTERRUPT_A_ACK => self.ack_a(IntAAck::from_bits_retain(value)),
            stc::INTERRUPT_B_ACK => self.ack_b(IntBAck::from_bits_retain(value)),
            stc::CONFIGURATION_MEMORY_CLEAR => {
                self.config.clear();
                self.pending_high = None;
                self.ai.pointer = 0;
            }
            stc::ADC_FIFO_CLEAR => {
                self.ai.fifo.clear();
                if self.board.kind == BoardKind::Pci611x {
                    self.ai.swallow = self.board.adc_stages();
                }
            }
            stc::DAC_FIFO_CLEAR => self.ao.fifo.clear(),
            stc::DIO_CONTROL => {
                if value & dio::HW_SERIAL_START != 0 {
                    self.serial_in = if self.serial_loopback {
                        self.stc[stc::DIO_OUTPUT as usize] >> 8
                    } else {
                        self.serial_input as u16
                    };
                }
            }
            _ => {}
        }
    }

    fn joint_reset(&mut self, value: u16) {
        if value & joint_reset::AI_RESET != 0 {
            self.ai.armed = false;
            self.ai.running = false;
            self.ai.latched = AiStatus1::empty();
        }
        if value & joint_reset::AO_RESET != 0 {
            self.ao.armed = false;
            self.ao.running = false;
            self.ao.latched = AoStatus1::empty();
        }
        if value & joint_reset::G0_RESET != 0 {
            self.counters[0] = Counter::default();
        }
        if value & joint_reset::G1_RESET != 0 {
            self.counters[1] = Counter::default();
        }
    }

    fn ack_a(&mut self, ack: IntAAck) {
        let l = &mut self.ai.latched;
        if ack.contains(IntAAck::AI_SC_TC) {
            l.remove(AiStatus1::SC_TC);
        }
        if ack.contains(IntAAck::AI_START1) {
            l.remove(AiStatus1::START1);
        }
        if ack.contains(IntAAck::AI_START2) {
            l.remove(AiStatus1::START2);
        }
        if ack.contains(IntAAck::AI_START) {
            l.remove(AiStatus1::START);
        }
        if ack.contains(IntAAck::AI_STOP) {
            l.remove(AiStatus1::STOP);
        }
        if ack.contains(IntAAck::AI_ERROR) {
            l.remove(AiStatus1::OVERRUN | AiStatus1::OVERFLOW);
        }
        if ack.contains(IntAAck::AI_SC_TC_ERROR_CONFIRM) {
            l.remove(AiStatus1::SC_TC_ERROR);
        }
        if ack.contains(IntAAck::G0_TC) {
            self.counters[0].tc = false;
        }
    }

    fn ack_b(&mut self, ack: IntBAck) {
        let l = &mut self.ao.latched;
        if ack.contains(IntBAck::AO_BC_TC) {
            l.remove(AoStatus1::BC_TC);
        }
        if ack.contains(IntBAck::AO_UC_TC) {
            l.remove(AoStatus1::UC_TC);
        }
        if ack.contains(IntBAck::AO_UI2_TC) {
            l.remove(AoStatus1::UI2_TC);
        }
        if ack.contains(IntBAck::AO_START) {
            l.remove(AoStatus1::START);
        }
        if ack.contains(IntBAck::AO_START1) {
            l.remove(AoStatus1::START1);
        }
        if ack.contains(IntBAck::AO_UPDATE) {
            l.remove(AoStatus1::UPDATE);
        }
        if ack.contains(IntBAck::AO_ERROR) {
            l.remove(AoStatus1::OVERRUN);
        }
        if ack.contains(IntBAck::AO_BC_TC_ERROR_CONFIRM) {
            l.remove(AoStatus1::BC_TC_ERROR);
        }
        if ack.contains(IntBAck::G1_TC) {
            self.counters[1].tc = false;
        }
    }

    // Analog input

    fn ai_command_1(&mut self, value: u16) {
        if value & ai_command_1::DISARM != 0 {
            self.ai.armed = false;
            self.ai.running = false;
        }
        if value & ai_command_1::SC_LOAD != 0 {
            self.ai.sc = self.stc_pair(stc::AI_SC_LOAD_A);
        }
        if value & ai_command_1::SC_ARM != 0 {
            self.ai.armed = true;
        }
        if value & ai_command_1::CONVERT_PULSE != 0 && !self.ai.running {
            self.software_convert();
        }
    }

    fn ai_start(&mut self) {
        self.ai.running = true;
        self.ai.scans = 0;
        self.ai.latched |= AiStatus1::START1 | AiStatus1::START;
    }

    pub(super) fn external_start(&mut self) {
        if self.ai.armed && !self.ai.running {
            self.ai_start();
        }
    }

    pub(super) fn ai_running(&self) -> bool {
        self.ai.running
    }

    pub(super) fn ai_fifo_len(&self) -> usize {
        self.ai.fifo.len()
    }

    pub(super) fn ai_fifo_reads(&self) -> usize {
        self.ai.fifo_reads
    }

    pub(super) fn inject_ai_overrun(&mut self) {
        self.ai.latched |= AiStatus1::OVERRUN;
    }

    pub(super) fn hold_ai_half_full(&mut self, on: bool) {
        self.ai.stuck_half_full = on;
    }

    fn entry_channel(&self, e: &ConfigEntry) -> u32 {
        if self.m_series() {
            (e.low & 0xf) as u32 | ((((e.low >> 4) & 0x3) as u32) << 4)
        } else {
            (e.high & 0x3f) as u32
        }
    }

    fn entry_raw(&self, e: &ConfigEntry, scan: u64) -> u32 {
        let maxdata = self.board.ai_maxdata();
        let code = super::sample_code(self.entry_channel(e), scan, maxdata);
        let offset = 1u32 << (self.board.adbits - 1);
        let signed = match self.board.kind {
            BoardKind::MSeries => false,
            BoardKind::Pci611x | BoardKind::Pci6143 => true,
            BoardKind::ESeries => e.low & 0x100 == 0,
        };
        if signed {
            code.wrapping_sub(offset) & 0xffff
        } else {
            code
        }
    }

    fn convert_scan(&mut self) -> Vec<u32> {
        let scan = self.ai.emitted;
        self.ai.emitted += 1;
        if self.config.is_empty() {
            return vec![0];
        }
        self.config.iter().map(|e| self.entry_raw(e, scan)).collect()
    }

    fn software_convert(&mut self) {
        if self.ai.swallow > 0 {
            self.ai.swallow -= 1;
            return;
        }
        if self.packed() || self.config.len() <= 1 {
            let raws = self.convert_scan();
            self.ai.pointer = 0;
            self.deliver_ai(&raws);
            return;
        }
        let e = self.config[self.ai.pointer % self.config.len()];
        let raw = self.entry_raw(&e, self.ai.emitted);
        self.ai.pointer += 1;
        if self.ai.pointer >= self.config.len() {
            self.ai.pointer = 0;
            self.ai.emitted += 1;
        }
        self.deliver_ai(&[raw]);
    }

    fn deliver_ai(&mut self, raws: &[u32]) {
        let select = (self.reg(board::AI_AO_SELECT) as u8) & board::AI_DMA_SELECT_MASK;
        if let (Some(ch), Some(mite)) = (selected_channel(select), self.mite.as_ref()) {
            if mite.push_samples(ch, raws) {
                return;
            }
        }
        let depth = self.board.ai_fifo_depth as usize;
        for &raw in raws {
            if self.ai.fifo.len() >= depth {
                self.ai.latched |= AiStatus1::OVERFLOW;
                break;
            }
            self.ai.fifo.push_back(raw);
        }
    }

    /// One timed scan; `false` when the sequencer is idle.
    pub(super) fn timed_scan(&mut self) -> bool {
        if !self.ai.running {
            return false;
        }
        self.ai.scans += 1;
        if self.ai.swallow > 0 {
            self.ai.swallow -= 1;
        } else {
            let raws = self.convert_scan();
            self.deliver_ai(&raws);
        }
        self.ai.latched |= AiStatus1::STOP;
        let mode1 = self.stc[stc::AI_MODE_1 as usize];
        if mode1 & ai_mode_1::TRIGGER_ONCE != 0 && self.ai.scans > self.ai.sc as u64 {
            self.ai.latched |= AiStatus1::SC_TC;
            self.ai.running = false;
            self.ai.armed = false;
        }
        true
    }

    fn ai_status(&self) -> AiStatus1 {
        let mut s = self.ai.latched;
        let n = self.ai.fifo.len();
        let depth = self.board.ai_fifo_depth as usize;
        let empty = if self.packed() { n < 2 } else { n == 0 };
        if empty {
            s |= AiStatus1::FIFO_EMPTY;
        }
        if n >= depth / 2 || self.ai.stuck_half_full {
            s |= AiStatus1::FIFO_HALF_FULL;
        }
        if n >= depth {
            s |= AiStatus1::FIFO_FULL;
        }
        if self.counters[0].tc {
            s |= AiStatus1::G0_TC;
        }
        if self.interrupt_a(s) {
            s |= AiStatus1::INTERRUPT_A;
        }
        s
    }

    fn interrupt_a(&self, s: AiStatus1) -> bool {
        let en = IntAEnable::from_bits_retain(self.stc[stc::INTERRUPT_A_ENABLE as usize]);
        let fifo = match self.stc[stc::AI_MODE_3 as usize] & ai_mode_3::FIFO_MODE_MASK {
            ai_mode_3::FIFO_MODE_NE => !s.contains(AiStatus1::FIFO_EMPTY),
            ai_mode_3::FIFO_MODE_F => s.contains(AiStatus1::FIFO_FULL),
            _ => s.contains(AiStatus1::FIFO_HALF_FULL),
        };
        (en.contains(IntAEnable::AI_SC_TC) && s.contains(AiStatus1::SC_TC))
            || (en.contains(IntAEnable::AI_ERROR) && s.intersects(AiStatus1::ERRORS))
            || (en.contains(IntAEnable::AI_STOP) && s.contains(AiStatus1::STOP))
            || (en.contains(IntAEnable::AI_START1) && s.contains(AiStatus1::START1))
            || (en.contains(IntAEnable::AI_START) && s.contains(AiStatus1::START))
            || (en.contains(IntAEnable::AI_FIFO) && fifo)
            || (en.contains(IntAEnable::G0_TC) && s.contains(AiStatus1::G0_TC))
    }

    // Analog output

    fn ao_command_1(&mut self, value: u16) {
        if value & ao_command_1::DISARM != 0 {
            self.ao.armed = false;
            self.ao.running = false;
        }
        if value & ao_command_1::UC_LOAD != 0 {
            self.ao.uc = self.stc_pair(stc::AO_UC_LOAD_A);
        }
        if value & (ao_command_1::UI_ARM | ao_command_1::UC_ARM | ao_command_1::BC_ARM) != 0 {
            self.ao.armed = true;
        }
    }

    fn ao_push(&mut self, value: u16) {
        if self.ao.fifo.len() < self.board.ao_fifo_depth as usize {
            self.ao.fifo.push_back(value);
        }
    }

    fn pump_ao_dma(&mut self) {
        let select = ((self.reg(board::AI_AO_SELECT) as u8) & board::AO_DMA_SELECT_MASK) >> 4;
        let (Some(ch), Some(mite)) = (selected_channel(select), self.mite.as_ref()) else {
            return;
        };
        let room = (self.board.ao_fifo_depth as usize).saturating_sub(self.ao.fifo.len());
        let bytes = mite.pull_output(ch, room * 2);
        for pair in bytes.chunks_exact(2) {
            self.ao.fifo.push_back(u16::from_le_bytes([pair[0], pair[1]]));
        }
    }

    pub(super) fn ao_running(&self) -> bool {
        self.ao.running
    }

    pub(super) fn ao_outputs(&self) -> Vec<u16> {
        self.ao.outputs.clone()
    }

    /// One timed update; `false` when the AO is idle.
    pub(super) fn update(&mut self) -> bool {
        if !self.ao.running {
            return false;
        }
        self.pump_ao_dma();
        let mode1 = self.stc[stc::AO_MODE_1 as usize];
        let n = if mode1 & ao_mode_1::MULTIPLE_CHANNELS != 0 {
            ((self.stc[stc::AO_OUTPUT_CONTROL as usize] >> 6) & 0xf) as usize + 1
        } else {
            1
        };
        for _ in 0..n {
            match self.ao.fifo.pop_front() {
                Some(v) => self.ao.outputs.push(v),
                None => {
                    self.ao.latched |= AoStatus1::OVERRUN;
                    if self.stc[stc::AO_MODE_3 as usize] & ao_mode_3::STOP_ON_OVERRUN_ERROR != 0 {
                        self.ao.running = false;
                    }
                    break;
                }
            }
        }
        self.ao.updates += 1;
        self.ao.latched |= AoStatus1::UPDATE;
        if mode1 & ao_mode_1::TRIGGER_ONCE != 0 && self.ao.updates >= self.ao.uc {
            self.ao.latched |= AoStatus1::BC_TC | AoStatus1::UC_TC;
            self.ao.running = false;
            self.ao.armed = false;
        }
        self.pump_ao_dma();
        true
    }

    fn ao_status(&self) -> AoStatus1 {
        let mut s = self.ao.latched;
        let n = self.ao.fifo.len();
        let depth = self.board.ao_fifo_depth as usize;
        if n == 0 {
            s |= AoStatus1::FIFO_EMPTY;
        }
        if depth > 0 {
            if n >= depth / 2 {
                s |= AoStatus1::FIFO_HALF_FULL;
            } else {
                s |= AoStatus1::FIFO_REQUEST;
            }
            if n >= depth {
                s |= AoStatus1::FIFO_FULL;
            }
        }
        if self.counters[1].tc {
            s |= AoStatus1::G1_TC;
        }
        if self.interrupt_b(s) {
            s |= AoStatus1::INTERRUPT_B;
        }
        s
    }

    fn interrupt_b(&self, s: AoStatus1) -> bool {
        let en = IntBEnable::from_bits_retain(self.stc[stc::INTERRUPT_B_ENABLE as usize]);
        (en.contains(IntBEnable::AO_BC_TC) && s.contains(AoStatus1::BC_TC))
            || (en.contains(IntBEnable::AO_ERROR)
                && s.intersects(AoStatus1::OVERRUN | AoStatus1::BC_TC_ERROR))
            || (en.contains(IntBEnable::AO_FIFO) && s.contains(AoStatus1::FIFO_REQUEST))
            || (en.contains(IntBEnable::AO_UPDATE) && s.contains(AoStatus1::UPDATE))
            || (en.contains(IntBEnable::AO_START1) && s.contains(AoStatus1::START1))
            || (en.contains(IntBEnable::AO_UC_TC) && s.contains(AoStatus1::UC_TC))
            || (en.contains(IntBEnable::G1_TC) && s.contains(AoStatus1::G1_TC))
    }

    // Counters

    fn counter_command(&mut self, i: usize, value: u16) {
        if value & g_command::LOAD != 0 {
            let load_a = if i == 0 { stc::G0_LOAD_A } else { stc::G1_LOAD_A };
            self.counters[i].count = self.stc_pair(load_a);
        }
        if value & g_command::ARM != 0 {
            self.counters[i].armed = true;
        }
        if value & g_command::DISARM != 0 {
            self.counters[i].armed = false;
        }
    }

    pub(super) fn tick_counter(&mut self, i: usize, n: u32) {
        if let Some(c) = self.counters.get_mut(i).filter(|c| c.armed) {
            c.count = c.count.wrapping_add(n);
        }
    }

    pub(super) fn latch_counter(&mut self, i: usize) {
        let Some(count) = self.counters.get(i).map(|c| c.count) else {
            return;
        };
        let select = ((self.reg(board::G0_G1_SELECT) as u8) >> (4 * i)) & 0x0f;
        if let (Some(ch), Some(mite)) = (selected_channel(select), self.mite.as_ref()) {
            mite.push_samples(ch, &[count]);
        }
        self.counters[i].tc = true;
    }

    // Correlated DIO

    fn cdo_command(&mut self, value: u32) {
        if value & m_series::CDO_RESET != 0 {
            self.cdo.fifo.clear();
            self.cdo.armed = false;
            self.cdo.status = 0;
        }
        if value & m_series::CDO_DISARM != 0 {
            self.cdo.armed = false;
        }
        if value & m_series::CDO_ARM != 0 {
            self.cdo.armed = true;
        }
        if value & m_series::CDO_ERROR_INTERRUPT_CONFIRM != 0 {
            self.cdo.status &= !(m_series::CDO_OVERRUN | m_series::CDO_UNDERFLOW);
        }
        if value & m_series::CDO_ERROR_INTERRUPT_ENABLE_SET != 0 {
            self.cdo.error_irq = true;
        }
        if value & m_series::CDO_ERROR_INTERRUPT_ENABLE_CLEAR != 0 {
            self.cdo.error_irq = false;
        }
        if value & m_series::CDO_EMPTY_FIFO_INTERRUPT_ENABLE_SET != 0 {
            self.cdo.empty_irq = true;
        }
        if value & m_series::CDO_EMPTY_FIFO_INTERRUPT_ENABLE_CLEAR != 0 {
            self.cdo.empty_irq = false;
        }
        if value & m_series::CDO_SW_UPDATE != 0 {
            if let Some(w) = self.cdo.fifo.pop_front() {
                self.cdo.outputs.push(w);
            }
        }
    }

    fn pump_cdo_dma(&mut self) {
        let select = ((self.reg(m_series::CDIO_DMA_SELECT) as u8) & m_series::CDO_DMA_SELECT_MASK)
            >> m_series::CDO_DMA_SELECT_SHIFT;
        let (Some(ch), Some(mite)) = (selected_channel(select), self.mite.as_ref()) else {
            return;
        };
        let room = CDO_FIFO_DEPTH.saturating_sub(self.cdo.fifo.len());
        let bytes = mite.pull_output(ch, room * 4);
        for w in bytes.chunks_exact(4) {
            self.cdo.fifo.push_back(u32::from_le_bytes([w[0], w[1], w[2], w[3]]));
        }
    }

    fn cdo_status(&mut self) -> u32 {
        self.pump_cdo_dma();
        let mut s = self.cdo.status;
        if self.cdo.fifo.is_empty() {
            s |= m_series::CDO_FIFO_EMPTY;
        }
        if self.cdo.fifo.len() >= CDO_FIFO_DEPTH {
            s |= m_series::CDO_FIFO_FULL;
        }
        s
    }

    pub(super) fn cdo_update(&mut self) -> bool {
        if !self.cdo.armed {
            return false;
        }
        self.pump_cdo_dma();
        match self.cdo.fifo.pop_front() {
            Some(w) => self.cdo.outputs.push(w),
            None => {
                self.cdo.status |= m_series::CDO_UNDERFLOW;
                if self.reg(m_series::CDO_MODE) & m_series::CDO_HALT_ON_ERROR != 0 {
                    self.cdo.armed = false;
                }
            }
        }
        self.pump_cdo_dma();
        true
    }

    pub(super) fn cdo_outputs(&self) -> Vec<u32> {
        self.cdo.outputs.clone()
    }

    fn cdo_interrupt(&self) -> bool {
        let errors = m_series::CDO_OVERRUN | m_series::CDO_UNDERFLOW;
        (self.cdo.error_irq && self.cdo.status & errors != 0)
            || (self.cdo.empty_irq && self.cdo.armed && self.cdo.fifo.is_empty())
    }

    // Digital I/O and serial lines

    fn dio_parallel_input(&self) -> u16 {
        let dir = (self.stc[stc::DIO_CONTROL as usize] & dio::PINS_DIR_MASK) as u32;
        let out = (self.stc[stc::DIO_OUTPUT as usize] & dio::PARALLEL_DATA_MASK) as u32;
        let mut v = (out & dir) | (self.dio_inputs & !dir & 0xff);
        if self.serial_loopback {
            if out & dio::SDOUT != 0 {
                v |= dio::SDIN;
            } else {
                v &= !dio::SDIN;
            }
        }
        v as u16
    }

    fn serial_command(&mut self, value: u8) {
        let rising = value & board::SERIAL_CLOCK != 0 && self.serial.last & board::SERIAL_CLOCK == 0;
        let data = (value & board::SERIAL_DATA != 0) as u32;
        if value & board::EEPROM_CS != 0 {
            if rising {
                self.eeprom_clock(data);
            }
        } else {
            if self.serial.last & board::EEPROM_CS != 0 {
                self.eeprom = EepromPort::default();
            }
            if rising {
                self.serial.shift = (self.serial.shift << 1) | data;
                self.serial.bits += 1;
            }
            let load = value & 0xf8;
            if load != 0 {
                self.caldac_loads.push(CaldacLoad {
                    dac: load.trailing_zeros() as usize - 3,
                    word: self.serial.shift,
                    bits: self.serial.bits,
                });
                self.serial.shift = 0;
                self.serial.bits = 0;
            }
        }
        self.serial.last = value;
    }

    fn eeprom_clock(&mut self, data: u32) {
        let e = &mut self.eeprom;
        if e.in_bits < 16 {
            e.command = (e.command << 1) | data;
            e.in_bits += 1;
            if e.in_bits == 16 {
                let addr = ((e.command & 0xff) | ((e.command >> 3) & 0x100)) as usize;
                e.out = self.eeprom_image.get(addr).copied().unwrap_or(0xff);
            }
        } else {
            e.promout = (e.out >> (7 - (e.out_bits % 8))) & 1 != 0;
            e.out_bits += 1;
        }
    }

    // Interrupt line

    pub(super) fn irq_asserted(&self) -> bool {
        if self.removed {
            return true;
        }
        let ctl = self.stc[stc::INTERRUPT_CONTROL as usize];
        let a = ctl & interrupt_control::INTERRUPT_A_ENABLE != 0
            && self.ai_status().contains(AiStatus1::INTERRUPT_A);
        let b = ctl & interrupt_control::INTERRUPT_B_ENABLE != 0
            && self.ao_status().contains(AoStatus1::INTERRUPT_B);
        let dma = self.mite.as_ref().is_some_and(|m| m.interrupt_pending());
        a || b || dma || self.cdo_interrupt()
    }
}

fn reverse16(offset: u32) -> Option<u32> {
    (0..128).find(|&r| crate::regs::m_series_offset(r) == Some(offset))
}

fn reverse32(offset: u32) -> Option<u32> {
    (0..128).find(|&r| crate::regs::m_series_offset32(r) == Some(offset))
}
