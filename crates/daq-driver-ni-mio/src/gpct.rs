//! General-purpose counters (GPCT 0 and 1).
//!
//! The counter logic addresses its registers by a board-independent name
//! ([`GpctRegister`]); [`gpct_to_stc_register`] maps that name onto the
//! STC register number, and [`write_register`] / [`read_register`] pick
//! the access width. Registers that exist only on M-series boards
//! (counting mode, second gate, DMA configuration, ABZ) live outside the
//! STC map and are reached through the board window directly.
//!
//! Channel 0 of a counter subdevice is the count itself, channels 1 and 2
//! are the `Load_A` and `Load_B` registers. Commands stream the count
//! latched on every gate edge through DMA.

use std::sync::Arc;

use comedi_core::{
    insn_config, BufEvents, CmdTestStep, ComediError, Command, CommandMask, Corrections, Insn,
    Result, SubdeviceOps, TrigSrc,
};
use tracing::{debug, trace, warn};

use crate::device::{Bitfield, NiMio};
use crate::dma::{DmaRole, DmaWidths};
use crate::regs::mite::Chsr;
use crate::regs::{
    g_command, g_input_select, g_status, joint_reset, m_series, second_irq, stc, AiStatus1,
    AoStatus1, IntAAck, IntAEnable, IntBAck, IntBEnable,
};
use crate::timing::CLOCK_NS;

/// Counters on every board.
pub const N_COUNTERS: usize = 2;

/// Channels of a counter subdevice: count, `Load_A`, `Load_B`.
pub const N_CHANNELS: u32 = 3;

/// Counter width of a board family.
pub(crate) fn counter_bits(m_series: bool) -> u32 {
    if m_series {
        32
    } else {
        24
    }
}

/// Fields of a `SET_COUNTER_MODE` argument.
#[allow(missing_docs)]
pub mod counter_mode {
    /// Low half goes straight into `Gi_Mode`
    pub const MODE_REG_MASK: u32 = 0xffff;
    pub const COUNTING_MODE_SHIFT: u32 = 16;
    pub const COUNTING_MODE_MASK: u32 = 0x7 << COUNTING_MODE_SHIFT;
    pub const DIRECTION_SHIFT: u32 = 24;
    pub const DIRECTION_MASK: u32 = 0x3 << DIRECTION_SHIFT;
    pub const DIRECTION_DOWN: u32 = 0;
    pub const DIRECTION_UP: u32 = 1 << DIRECTION_SHIFT;
    pub const DIRECTION_HW_UP_DOWN: u32 = 2 << DIRECTION_SHIFT;
    pub const DIRECTION_HW_GATE: u32 = 3 << DIRECTION_SHIFT;
}

/// `data[1]` of a `GET_COUNTER_STATUS`.
#[allow(missing_docs)]
pub mod counter_status {
    pub const ARMED: u32 = 0x1;
    pub const COUNTING: u32 = 0x2;
}

/// `data[1]` of an `ARM`: start counting now.
pub const ARM_IMMEDIATE: u32 = 0;

/// Gate index of the M-series second gate.
const SECOND_GATE: u32 = 1;
const SECOND_GATE_ENABLE: u16 = 0x1;
const SECOND_GATE_SELECT_SHIFT: u32 = 7;
const SELECT_CODE_MASK: u32 = 0x1f;

/// `Gi_DMA_Config` bits (M-series).
const DMA_ENABLE: u16 = 0x1;
const DMA_INT_ENABLE: u16 = 0x4;

/// Period of the 100 kHz timebase.
const TIMEBASE_2_NS: u32 = 10_000;

/// Counter registers by logical name. The index is the counter.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpctRegister {
    Autoincrement(usize),
    Command(usize),
    HwSave(usize),
    SwSave(usize),
    Mode(usize),
    LoadA(usize),
    LoadB(usize),
    InputSelect(usize),
    InterruptAck(usize),
    Status(usize),
    InterruptEnable(usize),
    /// `G_Status`, shared by both counters
    JointStatus,
    JointReset,
    JointStatus1,
    JointStatus2,
    CountingMode(usize),
    SecondGate(usize),
    DmaConfig(usize),
    DmaStatus(usize),
    Abz(usize),
}

/// STC register behind a counter register, or `None` for the registers
/// that only exist on M-series boards.
pub fn gpct_to_stc_register(reg: GpctRegister) -> Option<u32> {
    use GpctRegister::*;
    let pick = |i: usize, g0: u32, g1: u32| if i == 0 { g0 } else { g1 };
    let r = match reg {
        Autoincrement(i) => pick(i, stc::G0_AUTOINCREMENT, stc::G1_AUTOINCREMENT),
        Command(i) => pick(i, stc::G0_COMMAND, stc::G1_COMMAND),
        HwSave(i) => pick(i, stc::G0_HW_SAVE, stc::G1_HW_SAVE),
        SwSave(i) => pick(i, stc::G0_SAVE, stc::G1_SAVE),
        Mode(i) => pick(i, stc::G0_MODE, stc::G1_MODE),
        LoadA(i) => pick(i, stc::G0_LOAD_A, stc::G1_LOAD_A),
        LoadB(i) => pick(i, stc::G0_LOAD_B, stc::G1_LOAD_B),
        InputSelect(i) => pick(i, stc::G0_INPUT_SELECT, stc::G1_INPUT_SELECT),
        InterruptAck(i) => pick(i, stc::INTERRUPT_A_ACK, stc::INTERRUPT_B_ACK),
        Status(i) => pick(i, stc::AI_STATUS_1, stc::AO_STATUS_1),
        InterruptEnable(i) => pick(i, stc::INTERRUPT_A_ENABLE, stc::INTERRUPT_B_ENABLE),
        JointStatus => stc::G_STATUS,
        JointReset => stc::JOINT_RESET,
        JointStatus1 => stc::JOINT_STATUS_1,
        JointStatus2 => stc::JOINT_STATUS_2,
        CountingMode(_) | SecondGate(_) | DmaConfig(_) | DmaStatus(_) | Abz(_) => return None,
    };
    Some(r)
}

impl GpctRegister {
    /// Counter a per-counter register belongs to.
    fn counter(self) -> Option<usize> {
        use GpctRegister::*;
        match self {
            Autoincrement(i) | Command(i) | HwSave(i) | SwSave(i) | Mode(i) | LoadA(i)
            | LoadB(i) | InputSelect(i) | InterruptAck(i) | Status(i) | InterruptEnable(i)
            | CountingMode(i) | SecondGate(i) | DmaConfig(i) | DmaStatus(i) | Abz(i) => Some(i),
            JointStatus | JointReset | JointStatus1 | JointStatus2 => None,
        }
    }
}

fn check_counter(reg: GpctRegister) -> Result<()> {
    match reg.counter() {
        Some(i) if i >= N_COUNTERS => Err(ComediError::contract(format!(
            "{reg:?} names a counter this board does not have"
        ))),
        _ => Ok(()),
    }
}

fn m_series_register(reg: GpctRegister) -> Option<u32> {
    match reg {
        GpctRegister::CountingMode(i) => Some(m_series::g_counting_mode(i)),
        GpctRegister::SecondGate(i) => Some(m_series::g_second_gate(i)),
        GpctRegister::DmaConfig(i) => Some(m_series::g_dma_config(i)),
        GpctRegister::DmaStatus(i) => Some(m_series::g_dma_status(i)),
        GpctRegister::Abz(i) => Some(m_series::g_abz(i)),
        _ => None,
    }
}

/// Interrupt enable bits a counter owns in its `Interrupt_X_Enable`.
fn interrupt_enable_mask(i: usize) -> u32 {
    if i == 0 {
        u32::from((IntAEnable::G0_TC | IntAEnable::G0_GATE).bits())
    } else {
        u32::from((IntBEnable::G1_TC | IntBEnable::G1_GATE).bits())
    }
}

fn tc_interrupt_enable(i: usize) -> u32 {
    if i == 0 {
        u32::from(IntAEnable::G0_TC.bits())
    } else {
        u32::from(IntBEnable::G1_TC.bits())
    }
}

/// Every acknowledge bit of counter `i`.
fn ack_bits(i: usize) -> u32 {
    if i == 0 {
        u32::from(
            (IntAAck::G0_GATE
                | IntAAck::G0_TC
                | IntAAck::G0_TC_ERROR_CONFIRM
                | IntAAck::G0_GATE_ERROR_CONFIRM)
                .bits(),
        )
    } else {
        u32::from(
            (IntBAck::G1_GATE
                | IntBAck::G1_TC
                | IntBAck::G1_TC_ERROR_CONFIRM
                | IntBAck::G1_GATE_ERROR_CONFIRM)
                .bits(),
        )
    }
}

/// Write a counter register at its natural width.
pub(crate) fn write_register(dev: &NiMio, reg: GpctRegister, bits: u32) -> Result<()> {
    check_counter(reg)?;
    if let Some(offset) = m_series_register(reg) {
        if !dev.board.is_m_series() {
            return Err(ComediError::contract(format!(
                "{reg:?} exists only on M-series boards"
            )));
        }
        dev.bus.io().write16(offset, bits as u16);
        return Ok(());
    }
    let Some(r) = gpct_to_stc_register(reg) else {
        return Err(ComediError::contract(format!("{reg:?} has no STC register")));
    };
    let stc = dev.bus.stc();
    match reg {
        GpctRegister::LoadA(_) | GpctRegister::LoadB(_) => stc.writel(bits, r),
        GpctRegister::InterruptEnable(i) => {
            let field = if i == 0 {
                Bitfield::InterruptAEnable
            } else {
                Bitfield::InterruptBEnable
            };
            dev.bus.set_bitfield(field, interrupt_enable_mask(i), bits);
        }
        GpctRegister::JointReset => {
            let mask = u32::from(joint_reset::G0_RESET | joint_reset::G1_RESET);
            if bits & !mask != 0 {
                return Err(ComediError::contract(format!(
                    "counter reset 0x{bits:x} touches other subsystems"
                )));
            }
            stc.writew(bits as u16, r);
        }
        _ => stc.writew(bits as u16, r),
    }
    trace!(?reg, bits = format_args!("0x{bits:x}"), "counter register write");
    Ok(())
}

/// Read a counter register at its natural width.
pub(crate) fn read_register(dev: &NiMio, reg: GpctRegister) -> Result<u32> {
    check_counter(reg)?;
    if let Some(offset) = m_series_register(reg) {
        if !dev.board.is_m_series() {
            return Err(ComediError::contract(format!(
                "{reg:?} exists only on M-series boards"
            )));
        }
        return Ok(u32::from(dev.bus.io().read16(offset)));
    }
    let Some(r) = gpct_to_stc_register(reg) else {
        return Err(ComediError::contract(format!("{reg:?} has no STC register")));
    };
    let stc = dev.bus.stc();
    Ok(match reg {
        GpctRegister::HwSave(_) | GpctRegister::SwSave(_) => stc.readl(r),
        _ => u32::from(stc.readw(r)),
    })
}

/// Soft copies of one counter's write-only registers.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CounterState {
    pub(crate) mode: u16,
    /// Up/down bits of `Gi_Command`
    pub(crate) command: u16,
    pub(crate) input_select: u16,
    pub(crate) counting_mode: u16,
    pub(crate) second_gate: u16,
    pub(crate) load_a: u32,
    pub(crate) load_b: u32,
    /// A command waits for its internal trigger
    pub(crate) start_pending: bool,
}

/// Gate the E-series gate interrupt onto the second IRQ line. No-op on
/// M-series boards.
fn enable_second_irq(dev: &NiMio, i: usize, on: bool) {
    if dev.board.is_m_series() {
        return;
    }
    let (reg, bit) = if i == 0 {
        (stc::SECOND_IRQ_A_ENABLE, second_irq::G0_GATE_SECOND_IRQ_ENABLE)
    } else {
        (stc::SECOND_IRQ_B_ENABLE, second_irq::G1_GATE_SECOND_IRQ_ENABLE)
    };
    dev.bus.stc().writew(if on { bit } else { 0 }, reg);
}

fn command(dev: &NiMio, i: usize, st: &CounterState, bits: u16) -> Result<()> {
    write_register(dev, GpctRegister::Command(i), u32::from(st.command | bits))
}

fn arm(dev: &NiMio, i: usize, st: &mut CounterState) -> Result<()> {
    st.start_pending = false;
    command(dev, i, st, g_command::ARM)?;
    debug!(counter = i, "counter armed");
    Ok(())
}

/// Latch the running count into the software save register and read it.
/// The count can ripple between reads; two equal reads win.
fn read_count(dev: &NiMio, i: usize, st: &CounterState) -> Result<u32> {
    command(dev, i, st, 0)?;
    command(dev, i, st, g_command::SAVE_TRACE)?;
    let first = read_register(dev, GpctRegister::SwSave(i))?;
    let second = read_register(dev, GpctRegister::SwSave(i))?;
    if first == second {
        return Ok(first);
    }
    read_register(dev, GpctRegister::SwSave(i))
}

/// Put counter `i` back to its power-up state.
pub(crate) fn reset(dev: &NiMio, i: usize, st: &mut CounterState) -> Result<()> {
    let bit = if i == 0 {
        joint_reset::G0_RESET
    } else {
        joint_reset::G1_RESET
    };
    write_register(dev, GpctRegister::JointReset, u32::from(bit))?;
    *st = CounterState::default();
    write_register(dev, GpctRegister::Mode(i), 0)?;
    write_register(dev, GpctRegister::InputSelect(i), 0)?;
    write_register(dev, GpctRegister::LoadA(i), 0)?;
    write_register(dev, GpctRegister::LoadB(i), 0)?;
    write_register(dev, GpctRegister::Autoincrement(i), 0)?;
    write_register(dev, GpctRegister::InterruptEnable(i), 0)?;
    write_register(dev, GpctRegister::InterruptAck(i), ack_bits(i))?;
    if dev.board.is_m_series() {
        write_register(dev, GpctRegister::CountingMode(i), 0)?;
        write_register(dev, GpctRegister::SecondGate(i), 0)?;
        write_register(dev, GpctRegister::DmaConfig(i), 0)?;
    }
    debug!(counter = i, "counter reset");
    Ok(())
}

/// Disarm counter `i` and take its command off the interrupt and DMA paths.
fn stop(dev: &NiMio, i: usize, st: &mut CounterState) -> Result<()> {
    command(dev, i, st, g_command::DISARM)?;
    st.start_pending = false;
    write_register(dev, GpctRegister::InterruptEnable(i), 0)?;
    enable_second_irq(dev, i, false);
    if dev.board.is_m_series() {
        write_register(dev, GpctRegister::DmaConfig(i), 0)?;
    }
    dev.dma.release(DmaRole::Gpct(i));
    Ok(())
}

fn service(dev: &NiMio, i: usize, mite: Chsr) -> Result<()> {
    if mite.unknown() || mite.failed() {
        return Err(ComediError::io(format!(
            "counter {i} DMA fault, channel status 0x{:08x}",
            mite.bits()
        )));
    }
    dev.dma.sync(DmaRole::Gpct(i), &dev.transfers.gpct[i])
}

/// Ack and service the counter side of an interrupt. Called with the
/// device lock held.
pub(crate) fn handle_interrupt(dev: &NiMio, a: AiStatus1, b: AoStatus1) {
    let fired = [
        a.intersects(AiStatus1::G0_TC | AiStatus1::G0_GATE_INTERRUPT),
        b.intersects(AoStatus1::G1_TC | AoStatus1::G1_GATE_INTERRUPT),
    ];
    for (i, &fired) in fired.iter().enumerate() {
        if fired {
            if let Err(e) = write_register(dev, GpctRegister::InterruptAck(i), ack_bits(i)) {
                warn!(counter = i, error = %e, "counter ack failed");
            }
        }
        let transfer = &dev.transfers.gpct[i];
        if !transfer.is_running() {
            continue;
        }
        let mite = dev.dma.take_status(DmaRole::Gpct(i));
        if let Err(e) = service(dev, i, mite) {
            warn!(counter = i, error = %e, "counter command aborted");
            transfer.event(BufEvents::ERROR);
            if let Err(e) = stop(dev, i, &mut dev.counters[i].lock()) {
                warn!(counter = i, error = %e, "counter stop failed");
            }
            transfer.finish();
        }
    }
}

fn gpct_cmd_mask() -> CommandMask {
    CommandMask {
        start_src: TrigSrc::NOW | TrigSrc::INT | TrigSrc::OTHER,
        scan_begin_src: TrigSrc::FOLLOW | TrigSrc::EXT | TrigSrc::OTHER,
        convert_src: TrigSrc::NOW | TrigSrc::EXT | TrigSrc::OTHER,
        scan_end_src: TrigSrc::COUNT,
        stop_src: TrigSrc::NONE,
    }
}

/// Operation set of a counter subdevice.
pub(crate) struct GpctOps {
    pub(crate) dev: Arc<NiMio>,
    pub(crate) index: usize,
}

impl GpctOps {
    fn set_counter_mode(&self, st: &mut CounterState, mode: u32) -> Result<()> {
        let dev = &*self.dev;
        let i = self.index;
        let counting = (mode & counter_mode::COUNTING_MODE_MASK) >> counter_mode::COUNTING_MODE_SHIFT;
        if counting != 0 && !dev.board.is_m_series() {
            return Err(ComediError::invalid(format!(
                "counting mode {counting} needs an M-series counter"
            )));
        }
        let direction = (mode & counter_mode::DIRECTION_MASK) >> counter_mode::DIRECTION_SHIFT;

        st.mode = (mode & counter_mode::MODE_REG_MASK) as u16;
        write_register(dev, GpctRegister::Mode(i), u32::from(st.mode))?;
        if dev.board.is_m_series() {
            st.counting_mode = counting as u16;
            write_register(dev, GpctRegister::CountingMode(i), counting)?;
        }
        st.command = ((direction as u16) << g_command::UP_DOWN_SHIFT) & g_command::UP_DOWN_MASK;
        command(dev, i, st, 0)?;
        debug!(counter = i, mode = format_args!("0x{mode:x}"), "counter mode set");
        Ok(())
    }

    fn set_clock_source(&self, st: &mut CounterState, code: u32) -> Result<()> {
        if code & SELECT_CODE_MASK != code {
            return Err(ComediError::invalid(format!("counter clock source {code} out of range")));
        }
        st.input_select = (st.input_select & !g_input_select::SOURCE_MASK)
            | ((code as u16) << g_input_select::SOURCE_SHIFT);
        write_register(&self.dev, GpctRegister::InputSelect(self.index), u32::from(st.input_select))
    }

    fn clock_source(st: &CounterState) -> (u32, u32) {
        let code = u32::from((st.input_select & g_input_select::SOURCE_MASK) >> g_input_select::SOURCE_SHIFT);
        let period = match code {
            g_input_select::TIMEBASE_1 => CLOCK_NS,
            g_input_select::TIMEBASE_2 => TIMEBASE_2_NS,
            _ => 0,
        };
        (code, period)
    }

    fn set_gate_source(&self, st: &mut CounterState, gate: u32, code: u32) -> Result<()> {
        let dev = &*self.dev;
        if code & SELECT_CODE_MASK != code {
            return Err(ComediError::invalid(format!("counter gate source {code} out of range")));
        }
        match gate {
            0 => {
                st.input_select = (st.input_select & !g_input_select::GATE_MASK)
                    | ((code as u16) << g_input_select::GATE_SHIFT);
                write_register(dev, GpctRegister::InputSelect(self.index), u32::from(st.input_select))
            }
            SECOND_GATE if dev.board.is_m_series() => {
                st.second_gate = ((code as u16) << SECOND_GATE_SELECT_SHIFT) | SECOND_GATE_ENABLE;
                write_register(dev, GpctRegister::SecondGate(self.index), u32::from(st.second_gate))
            }
            _ => Err(ComediError::invalid(format!("counter has no gate {gate}"))),
        }
    }

    fn gate_source(&self, st: &CounterState, gate: u32) -> Result<u32> {
        match gate {
            0 => Ok(u32::from((st.input_select & g_input_select::GATE_MASK) >> g_input_select::GATE_SHIFT)),
            SECOND_GATE if self.dev.board.is_m_series() => {
                Ok(u32::from(st.second_gate >> SECOND_GATE_SELECT_SHIFT) & SELECT_CODE_MASK)
            }
            _ => Err(ComediError::invalid(format!("counter has no gate {gate}"))),
        }
    }

    fn status(&self) -> Result<u32> {
        let bits = read_register(&self.dev, GpctRegister::JointStatus)? as u16;
        let mut status = 0;
        if bits & g_status::armed(self.index) != 0 {
            status |= counter_status::ARMED;
        }
        if bits & g_status::counting(self.index) != 0 {
            status |= counter_status::COUNTING;
        }
        Ok(status)
    }
}

impl SubdeviceOps for GpctOps {
    fn insn_read(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        let st = dev.counters[self.index].lock();
        let value = match insn.chan_desc.chan() {
            0 => read_count(dev, self.index, &st)?,
            1 => st.load_a,
            _ => st.load_b,
        };
        insn.data.iter_mut().for_each(|d| *d = value);
        Ok(())
    }

    fn insn_write(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        let i = self.index;
        let value = insn.word(0)?;
        let mut st = dev.counters[i].lock();
        match insn.chan_desc.chan() {
            0 => {
                // load through A, then put A back
                write_register(dev, GpctRegister::LoadA(i), value)?;
                command(dev, i, &st, g_command::LOAD)?;
                write_register(dev, GpctRegister::LoadA(i), st.load_a)?;
            }
            1 => {
                st.load_a = value;
                write_register(dev, GpctRegister::LoadA(i), value)?;
            }
            _ => {
                st.load_b = value;
                write_register(dev, GpctRegister::LoadB(i), value)?;
            }
        }
        Ok(())
    }

    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        let i = self.index;
        let mut st = dev.counters[i].lock();
        match insn.word(0)? {
            insn_config::SET_COUNTER_MODE => self.set_counter_mode(&mut st, insn.word(1)?),
            insn_config::ARM => match insn.word(1)? {
                ARM_IMMEDIATE => arm(dev, i, &mut st),
                other => Err(ComediError::invalid(format!("counter arm source {other} not supported"))),
            },
            insn_config::DISARM => {
                st.start_pending = false;
                command(dev, i, &st, g_command::DISARM)
            }
            insn_config::RESET => reset(dev, i, &mut st),
            insn_config::GET_COUNTER_STATUS => {
                insn.set_word(1, self.status()?);
                insn.set_word(2, counter_status::ARMED | counter_status::COUNTING);
                Ok(())
            }
            insn_config::SET_CLOCK_SRC => self.set_clock_source(&mut st, insn.word(1)?),
            insn_config::GET_CLOCK_SRC => {
                let (code, period) = Self::clock_source(&st);
                insn.set_word(1, code);
                insn.set_word(2, period);
                Ok(())
            }
            insn_config::SET_GATE_SRC => self.set_gate_source(&mut st, insn.word(1)?, insn.word(2)?),
            insn_config::GET_GATE_SRC => {
                let code = self.gate_source(&st, insn.word(1)?)?;
                insn.set_word(2, code);
                Ok(())
            }
            id => Err(ComediError::invalid(format!(
                "counter config instruction {id} not recognised"
            ))),
        }
    }

    fn cmd_mask(&self) -> Option<CommandMask> {
        Some(gpct_cmd_mask())
    }

    fn do_cmdtest(&self, cmd: &mut Command) -> Result<()> {
        gpct_cmd_mask().check(cmd)?;

        let mut fix = Corrections::new(CmdTestStep::Bounds);
        if cmd.start_src == TrigSrc::NOW {
            fix.force(&mut cmd.start_arg, 0);
        }
        if cmd.scan_begin_src == TrigSrc::FOLLOW {
            fix.force(&mut cmd.scan_begin_arg, 0);
        }
        if cmd.convert_src == TrigSrc::NOW {
            fix.force(&mut cmd.convert_arg, 0);
        }
        let nb_chan = cmd.nb_chan();
        fix.force(&mut cmd.scan_end_arg, nb_chan);
        fix.force(&mut cmd.stop_arg, 0);
        fix.finish()?;

        if nb_chan != 1 {
            return Err(ComediError::invalid("counter commands stream a single channel"));
        }
        Ok(())
    }

    fn do_cmd(&self, cmd: &Command) -> Result<()> {
        let dev = &*self.dev;
        let i = self.index;
        if !dev.dma.is_dma() {
            return Err(ComediError::not_supported("counter commands without DMA"));
        }
        let _guard = dev.dev_lock.lock();
        let mut st = dev.counters[i].lock();
        dev.dma
            .setup(DmaRole::Gpct(i), &dev.transfers.gpct[i], DmaWidths::uniform(32))?;
        write_register(dev, GpctRegister::InterruptAck(i), ack_bits(i))?;
        enable_second_irq(dev, i, true);
        if dev.board.is_m_series() {
            write_register(dev, GpctRegister::DmaConfig(i), u32::from(DMA_ENABLE | DMA_INT_ENABLE))?;
        }
        write_register(dev, GpctRegister::InterruptEnable(i), tc_interrupt_enable(i))?;
        if cmd.start_src == TrigSrc::INT {
            st.start_pending = true;
            debug!(counter = i, trig = cmd.start_arg, "counter command waits for trigger");
            return Ok(());
        }
        arm(dev, i, &mut st)
    }

    fn cancel(&self) -> Result<()> {
        stop(&self.dev, self.index, &mut self.dev.counters[self.index].lock())
    }

    fn inttrig(&self, trignum: u32) -> Result<()> {
        let dev = &*self.dev;
        let i = self.index;
        let expected = dev.transfers.gpct[i].command().map_or(0, |c| c.start_arg);
        if trignum != expected {
            return Err(ComediError::invalid(format!(
                "counter {i} waits for internal trigger {expected}, not {trignum}"
            )));
        }
        let _guard = dev.dev_lock.lock();
        let mut st = dev.counters[i].lock();
        if !st.start_pending {
            return Err(ComediError::invalid(format!("counter {i} start is not pending")));
        }
        arm(dev, i, &mut st)
    }
}
