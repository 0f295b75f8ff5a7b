//! Digital I/O subdevice.
//!
//! E-series boards have eight static lines behind `DIO_Control` and
//! `DIO_Output`; lines 0 and 4 double as the serial data pins. M-series
//! boards have 32 static lines plus the correlated digital output (CDO), a
//! 32-bit wide FIFO clocked by an external sample source and fed by DMA.
//!
//! ```text
//! cmd ──► reset FIFO, mode, prime current state ──► (user writes samples)
//!                                                        │
//! inttrig 0 ──► DMA setup ──► wait FIFO full ──► arm ◄───┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use comedi_core::wait::poll_until;
use comedi_core::{
    insn_config, BufEvents, ChanDesc, ChanFlags, CmdTestStep, ComediError, Command, CommandMask,
    Corrections, Insn, Result, SubdeviceOps, Transfer, TrigSrc,
};
use tracing::{debug, error, trace, warn};

use crate::attach::subdev;
use crate::device::NiMio;
use crate::dma::{DmaRole, DmaWidths};
use crate::regs::mite::Chsr;
use crate::regs::{dio, m_series, stc};

/// Polls of `CDIO_Status` while the CDO FIFO fills.
const CDO_FILL_POLLS: u32 = 100;

/// `data[1]` of a `DIO_QUERY` for an output line.
pub(crate) const DIO_QUERY_OUTPUT: u32 = 1;
/// `data[1]` of a `DIO_QUERY` for an input line.
pub(crate) const DIO_QUERY_INPUT: u32 = 0;

/// Static DIO and serial soft state.
#[derive(Debug, Default)]
pub(crate) struct DioState {
    /// Lines configured as outputs
    pub(crate) io_bits: u32,
    /// Last value written to the output lines
    pub(crate) state: u32,
    /// Soft copy of `DIO_Control`
    pub(crate) dio_control: u16,
    /// Soft copy of `DIO_Output`
    pub(crate) dio_output: u16,
    /// Serial clock period, zero when the serial port is off
    pub(crate) serial_interval_ns: u32,
    /// Serial transfers run on the STC shifter rather than bit-banged
    pub(crate) serial_hw_mode: bool,
    /// A CDO command is programmed and waits for its internal trigger
    pub(crate) cdo_pending: bool,
}

/// Line number of a DIO-style instruction, checked against `count`.
pub(crate) fn check_line(subdevice: usize, desc: ChanDesc, count: u32) -> Result<u32> {
    let line = desc.chan();
    if line >= count {
        return Err(ComediError::InvalidChannel {
            subdevice,
            channel: line,
            max: count,
        });
    }
    Ok(line)
}

/// Apply a direction instruction to `io_bits`. Returns `true` when the
/// instruction changed the direction and the hardware needs rewriting.
pub(crate) fn config_direction(io_bits: &mut u32, line: u32, insn: &mut Insn) -> Result<bool> {
    let bit = 1u32 << line;
    match insn.word(0)? {
        insn_config::DIO_OUTPUT => {
            *io_bits |= bit;
            Ok(true)
        }
        insn_config::DIO_INPUT => {
            *io_bits &= !bit;
            Ok(true)
        }
        insn_config::DIO_QUERY => {
            let dir = if *io_bits & bit != 0 {
                DIO_QUERY_OUTPUT
            } else {
                DIO_QUERY_INPUT
            };
            insn.set_word(1, dir);
            Ok(false)
        }
        id => Err(ComediError::invalid(format!(
            "DIO config instruction {id} not recognised"
        ))),
    }
}

fn write_direction(dev: &NiMio, dio: &mut DioState) {
    if dev.board.is_m_series() {
        dev.bus.io().write32(m_series::DIO_DIRECTION, dio.io_bits);
    } else {
        dio.dio_control = (dio.dio_control & !dio::PINS_DIR_MASK) | dio::pins_dir(dio.io_bits);
        dev.bus.stc().writew(dio.dio_control, stc::DIO_CONTROL);
    }
}

/// Power-up state: every line an input, the CDO and CDI FIFOs reset.
pub(crate) fn init(dev: &NiMio) {
    let mut dio = dev.dio.lock();
    *dio = DioState::default();
    if dev.board.is_m_series() {
        dev.bus
            .io()
            .write32(m_series::CDIO_COMMAND, m_series::CDO_RESET | m_series::CDI_RESET);
    }
    write_direction(dev, &mut dio);
}

// ----------------------------------------------------------------------
// Correlated digital output
// ----------------------------------------------------------------------

pub(crate) fn cdo_cmd_mask() -> CommandMask {
    CommandMask {
        start_src: TrigSrc::INT,
        scan_begin_src: TrigSrc::EXT,
        convert_src: TrigSrc::NOW,
        scan_end_src: TrigSrc::COUNT,
        stop_src: TrigSrc::NONE,
    }
}

/// Sample clock argument reduced to the source select and its polarity.
fn sample_source_arg(arg: u32) -> u32 {
    (ChanDesc::from_raw(arg).chan() & m_series::CDO_SAMPLE_SOURCE_SELECT_MASK)
        | (arg & ChanFlags::INVERT.bits())
}

pub(crate) fn cdo_cmdtest(cmd: &mut Command) -> Result<()> {
    cdo_cmd_mask().check(cmd)?;

    let mut fix = Corrections::new(CmdTestStep::Bounds);
    fix.force(&mut cmd.start_arg, 0);
    let source = sample_source_arg(cmd.scan_begin_arg);
    fix.force(&mut cmd.scan_begin_arg, source);
    fix.force(&mut cmd.convert_arg, 0);
    let nb_chan = cmd.nb_chan();
    fix.force(&mut cmd.scan_end_arg, nb_chan);
    fix.force(&mut cmd.stop_arg, 0);
    fix.finish()?;

    let in_order = cmd
        .chan_descs
        .iter()
        .enumerate()
        .all(|(i, d)| d.chan() as usize == i);
    if !in_order {
        return Err(ComediError::invalid(
            "correlated DO channel list must name lines 0..n in order",
        ));
    }
    Ok(())
}

fn cdo_transfer(dev: &NiMio) -> Result<&Arc<Transfer>> {
    dev.transfers
        .cdo
        .as_ref()
        .ok_or_else(|| ComediError::not_supported("correlated DO on this board"))
}

/// Reset the CDO, select its sample clock and drive the current line
/// state through the FIFO so the outputs start from a known value.
pub(crate) fn cdo_program(dev: &NiMio, dio: &mut DioState, cmd: &Command) -> Result<()> {
    if !dev.dma.is_dma() {
        return Err(ComediError::not_supported("correlated DO without DMA"));
    }
    let io = dev.bus.io();
    io.write32(m_series::CDIO_COMMAND, m_series::CDO_RESET);

    let mut mode = m_series::CDO_FIFO_MODE
        | m_series::CDO_HALT_ON_ERROR
        | (ChanDesc::from_raw(cmd.scan_begin_arg).chan() & m_series::CDO_SAMPLE_SOURCE_SELECT_MASK);
    if cmd.scan_begin_arg & ChanFlags::INVERT.bits() != 0 {
        mode |= m_series::CDO_POLARITY;
    }
    io.write32(m_series::CDO_MODE, mode);

    if dio.io_bits == 0 {
        return Err(ComediError::io(
            "correlated DO needs at least one line configured as an output",
        ));
    }
    io.write32(m_series::CDO_FIFO_DATA, dio.state);
    io.write32(m_series::CDIO_COMMAND, m_series::CDO_SW_UPDATE);
    io.write32(m_series::CDO_MASK_ENABLE, dio.io_bits);
    dio.cdo_pending = true;
    debug!(mode = format_args!("0x{mode:x}"), lines = format_args!("0x{:x}", dio.io_bits), "CDO programmed");
    Ok(())
}

/// Start the DMA feed, wait for the FIFO to fill, then arm.
pub(crate) fn cdo_start(dev: &NiMio, dio: &mut DioState) -> Result<()> {
    let transfer = cdo_transfer(dev)?;
    dev.dma.setup(DmaRole::Cdo, transfer, DmaWidths::uniform(32))?;

    let io = dev.bus.io();
    let filled = poll_until(CDO_FILL_POLLS, Duration::from_micros(10), "CDO FIFO fill", || {
        io.read32(m_series::CDIO_STATUS) & m_series::CDO_FIFO_FULL != 0
    });
    if let Err(e) = filled {
        error!(error = %e, "CDO FIFO did not fill before arming");
        cdo_reset(dev, dio);
        return Err(ComediError::io("correlated DO FIFO did not fill"));
    }
    io.write32(
        m_series::CDIO_COMMAND,
        m_series::CDO_ARM
            | m_series::CDO_ERROR_INTERRUPT_ENABLE_SET
            | m_series::CDO_EMPTY_FIFO_INTERRUPT_ENABLE_SET,
    );
    dio.cdo_pending = false;
    debug!("CDO armed");
    Ok(())
}

/// Disarm the CDO, mask its lines off the FIFO and release the DMA channel.
pub(crate) fn cdo_reset(dev: &NiMio, dio: &mut DioState) {
    let io = dev.bus.io();
    io.write32(
        m_series::CDIO_COMMAND,
        m_series::CDO_DISARM
            | m_series::CDO_ERROR_INTERRUPT_ENABLE_CLEAR
            | m_series::CDO_EMPTY_FIFO_INTERRUPT_ENABLE_CLEAR
            | m_series::CDO_FIFO_REQUEST_INTERRUPT_ENABLE_CLEAR,
    );
    io.write32(m_series::CDO_MASK_ENABLE, 0);
    dev.dma.release(DmaRole::Cdo);
    dio.cdo_pending = false;
}

fn cdo_service(dev: &NiMio, transfer: &Transfer, mite: Chsr) -> Result<()> {
    if mite.unknown() || mite.failed() {
        return Err(ComediError::io(format!(
            "CDO DMA fault, channel status 0x{:08x}",
            mite.bits()
        )));
    }
    if mite.contains(Chsr::LINKC) {
        dev.dma.sync(DmaRole::Cdo, transfer)?;
    }
    let io = dev.bus.io();
    let status = io.read32(m_series::CDIO_STATUS);
    trace!(status = format_args!("0x{status:x}"), "CDIO status");
    if status & (m_series::CDO_OVERRUN | m_series::CDO_UNDERFLOW) != 0 {
        io.write32(m_series::CDIO_COMMAND, m_series::CDO_ERROR_INTERRUPT_CONFIRM);
        return Err(ComediError::pipe(format!(
            "correlated DO FIFO error, status 0x{status:x}"
        )));
    }
    if status & m_series::CDO_FIFO_EMPTY != 0 {
        // drained: stop asking until the next arm
        io.write32(
            m_series::CDIO_COMMAND,
            m_series::CDO_EMPTY_FIFO_INTERRUPT_ENABLE_CLEAR,
        );
    }
    Ok(())
}

/// Service the correlated DO side of an interrupt.
pub(crate) fn handle_cdo_interrupt(dev: &NiMio) {
    let Some(transfer) = dev.transfers.cdo.as_ref().filter(|t| t.is_running()) else {
        return;
    };
    let mite = dev.dma.take_status(DmaRole::Cdo);
    if let Err(e) = cdo_service(dev, transfer, mite) {
        warn!(error = %e, "correlated DO aborted");
        transfer.event(BufEvents::ERROR);
        cdo_reset(dev, &mut dev.dio.lock());
        transfer.finish();
    }
}

// ----------------------------------------------------------------------
// Subdevice
// ----------------------------------------------------------------------

/// Operation set of the DIO subdevice.
pub(crate) struct DioOps {
    pub(crate) dev: Arc<NiMio>,
}

impl DioOps {
    fn bits_e_series(&self, dio: &mut DioState, mask: u32, bits: u32) -> Result<u32> {
        let dev = &*self.dev;
        let serial_pins = dio::SDIN | dio::SDOUT;
        if dio.serial_interval_ns != 0 && mask & serial_pins != 0 {
            return Err(ComediError::Busy {
                subdevice: subdev::DIO,
            });
        }
        let stc = dev.bus.stc();
        if mask != 0 {
            dio.state = (dio.state & !mask) | (bits & mask);
            dio.dio_output = (dio.dio_output & !dio::PARALLEL_DATA_MASK) | dio::parallel_data_out(dio.state);
            stc.writew(dio.dio_output, stc::DIO_OUTPUT);
        }
        Ok(u32::from(stc.readw(stc::DIO_PARALLEL_INPUT)))
    }

    fn bits_m_series(&self, dio: &mut DioState, mask: u32, bits: u32) -> u32 {
        let io = self.dev.bus.io();
        if mask != 0 {
            dio.state = (dio.state & !mask) | (bits & mask);
            io.write32(m_series::STATIC_DIGITAL_OUTPUT, dio.state);
        }
        io.read32(m_series::STATIC_DIGITAL_INPUT)
    }
}

impl SubdeviceOps for DioOps {
    fn insn_bits(&self, insn: &mut Insn) -> Result<()> {
        let mask = insn.word(0)?;
        let bits = insn.word(1)?;
        let mut dio = self.dev.dio.lock();
        let input = if self.dev.board.is_m_series() {
            self.bits_m_series(&mut dio, mask, bits)
        } else {
            self.bits_e_series(&mut dio, mask, bits)?
        };
        insn.set_word(1, input);
        Ok(())
    }

    fn insn_config(&self, insn: &mut Insn) -> Result<()> {
        let dev = &*self.dev;
        let line = check_line(subdev::DIO, insn.chan_desc, dev.board.n_dio_channels)?;
        let mut dio = dev.dio.lock();
        if config_direction(&mut dio.io_bits, line, insn)? {
            write_direction(dev, &mut dio);
        }
        Ok(())
    }

    fn cmd_mask(&self) -> Option<CommandMask> {
        self.dev.transfers.cdo.as_ref().map(|_| cdo_cmd_mask())
    }

    fn do_cmdtest(&self, cmd: &mut Command) -> Result<()> {
        cdo_transfer(&self.dev)?;
        cdo_cmdtest(cmd)
    }

    fn do_cmd(&self, cmd: &Command) -> Result<()> {
        let dev = &*self.dev;
        let _guard = dev.dev_lock.lock();
        let mut dio = dev.dio.lock();
        cdo_program(dev, &mut dio, cmd)
    }

    fn cancel(&self) -> Result<()> {
        if self.dev.transfers.cdo.is_some() {
            cdo_reset(&self.dev, &mut self.dev.dio.lock());
        }
        Ok(())
    }

    fn inttrig(&self, trignum: u32) -> Result<()> {
        let dev = &*self.dev;
        let expected = cdo_transfer(dev)?.command().map_or(0, |c| c.start_arg);
        if trignum != expected {
            return Err(ComediError::invalid(format!(
                "correlated DO waits for internal trigger {expected}, not {trignum}"
            )));
        }
        let _guard = dev.dev_lock.lock();
        let mut dio = dev.dio.lock();
        if !dio.cdo_pending {
            return Err(ComediError::invalid("correlated DO start is not pending"));
        }
        cdo_start(dev, &mut dio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimRig;
    use comedi_core::AnalogReference;

    fn line(n: u32) -> ChanDesc {
        ChanDesc::pack(n, 0, AnalogReference::Ground)
    }

    fn configure(rig: &SimRig, n: u32, id: u32) {
        let mut insn = Insn::config(line(n), vec![id, 0]);
        rig.device.insn(subdev::DIO, &mut insn).unwrap();
    }

    fn cdo_cmd(nb_chan: u32) -> Command {
        Command::builder(subdev::DIO)
            .start(TrigSrc::INT, 0)
            .scan_begin(TrigSrc::EXT, 3)
            .convert(TrigSrc::NOW, 0)
            .stop(TrigSrc::NONE, 0)
            .channels((0..nb_chan).map(line))
            .build()
    }

    fn words(values: impl IntoIterator<Item = u32>) -> Vec<u8> {
        values.into_iter().flat_map(u32::to_le_bytes).collect()
    }

    #[test]
    fn test_e_series_direction_and_bits() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        configure(&rig, 1, insn_config::DIO_OUTPUT);
        configure(&rig, 2, insn_config::DIO_OUTPUT);
        assert_eq!(rig.sim.stc_reg(stc::DIO_CONTROL) & dio::PINS_DIR_MASK, 0x06);

        rig.sim.set_dio_inputs(0x80);
        let mut insn = Insn::bits(0x06, 0x04);
        rig.device.insn(subdev::DIO, &mut insn).unwrap();
        assert_eq!(rig.sim.stc_reg(stc::DIO_OUTPUT) & dio::PARALLEL_DATA_MASK, 0x04);
        assert_eq!(insn.data[1], 0x84);
    }

    #[test]
    fn test_query_reports_direction() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        configure(&rig, 5, insn_config::DIO_OUTPUT);
        let mut insn = Insn::config(line(5), vec![insn_config::DIO_QUERY, 9]);
        rig.device.insn(subdev::DIO, &mut insn).unwrap();
        assert_eq!(insn.data[1], DIO_QUERY_OUTPUT);

        configure(&rig, 5, insn_config::DIO_INPUT);
        let mut insn = Insn::config(line(5), vec![insn_config::DIO_QUERY, 9]);
        rig.device.insn(subdev::DIO, &mut insn).unwrap();
        assert_eq!(insn.data[1], DIO_QUERY_INPUT);
    }

    #[test]
    fn test_config_rejects_line_out_of_range() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let mut insn = Insn::config(line(8), vec![insn_config::DIO_OUTPUT]);
        let err = rig.device.insn(subdev::DIO, &mut insn).unwrap_err();
        assert!(matches!(err, ComediError::InvalidChannel { channel: 8, .. }));
    }

    #[test]
    fn test_serial_pins_busy_while_serial_enabled() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        rig.driver.dio.lock().serial_interval_ns = 1_200;
        let mut insn = Insn::bits(dio::SDOUT, dio::SDOUT);
        let err = rig.device.insn(subdev::DIO, &mut insn).unwrap_err();
        assert!(err.is_busy());

        let mut insn = Insn::bits(0x02, 0x02);
        rig.device.insn(subdev::DIO, &mut insn).unwrap();
    }

    #[test]
    fn test_m_series_static_lines() {
        let rig = SimRig::polled("pci-6221").unwrap();
        configure(&rig, 20, insn_config::DIO_OUTPUT);
        assert_eq!(rig.sim.board_reg(m_series::DIO_DIRECTION), 1 << 20);

        rig.sim.set_dio_inputs(0x3);
        let mut insn = Insn::bits(1 << 20, 1 << 20);
        rig.device.insn(subdev::DIO, &mut insn).unwrap();
        assert_eq!(rig.sim.board_reg(m_series::STATIC_DIGITAL_OUTPUT), 1 << 20);
        assert_eq!(insn.data[1], (1 << 20) | 0x3);
    }

    #[test]
    fn test_cdo_cmdtest_masks_sample_source() {
        let mut c = cdo_cmd(4);
        c.scan_begin_arg = 0x25 | ChanFlags::INVERT.bits() | ChanFlags::EDGE.bits();
        c.stop_arg = 3;
        let err = cdo_cmdtest(&mut c).unwrap_err();
        assert!(matches!(err, ComediError::CmdTest { step: CmdTestStep::Bounds }));
        assert_eq!(c.scan_begin_arg, 0x5 | ChanFlags::INVERT.bits());
        assert_eq!(c.stop_arg, 0);
        cdo_cmdtest(&mut c).unwrap();
    }

    #[test]
    fn test_cdo_channel_list_must_be_in_order() {
        let mut c = cdo_cmd(3);
        c.chan_descs.swap(0, 1);
        let err = cdo_cmdtest(&mut c).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
    }

    #[test]
    fn test_e_series_has_no_cdo() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        let err = rig.device.command(cdo_cmd(1)).unwrap_err();
        assert!(matches!(err, ComediError::NotSupported { .. }));
    }

    #[test]
    fn test_cdo_needs_output_lines() {
        let rig = SimRig::attach("pci-6221").unwrap();
        let err = rig.device.command(cdo_cmd(4)).unwrap_err();
        assert!(matches!(err, ComediError::Io { .. }));
        assert!(rig.device.get_cmd(subdev::DIO).is_none());
    }

    #[test]
    fn test_cdo_streams_samples() {
        let rig = SimRig::attach("pci-6221").unwrap();
        for n in 0..4 {
            configure(&rig, n, insn_config::DIO_OUTPUT);
        }
        let mut insn = Insn::bits(0xf, 0x5);
        rig.device.insn(subdev::DIO, &mut insn).unwrap();

        rig.device.command(cdo_cmd(4)).unwrap();
        assert_eq!(rig.sim.board_reg(m_series::CDO_MASK_ENABLE), 0xf);
        assert_eq!(rig.sim.cdo_outputs(), vec![0x5]);
        let mode = rig.sim.board_reg(m_series::CDO_MODE);
        assert_eq!(mode & m_series::CDO_SAMPLE_SOURCE_SELECT_MASK, 3);
        assert_ne!(mode & m_series::CDO_HALT_ON_ERROR, 0);

        let data = words(0..24);
        assert_eq!(rig.device.write(subdev::DIO, &data).unwrap(), data.len());
        rig.device.inttrig(subdev::DIO, 0).unwrap();
        assert_eq!(rig.mite.as_ref().unwrap().claimed(), 1);

        assert_eq!(rig.sim.run_cdo_updates(4), 4);
        assert_eq!(rig.sim.cdo_outputs(), vec![0x5, 0, 1, 2, 3]);
        assert!(rig.device.get_cmd(subdev::DIO).is_some());

        rig.device.cancel(subdev::DIO).unwrap();
        assert_eq!(rig.sim.board_reg(m_series::CDO_MASK_ENABLE), 0);
        assert_eq!(rig.mite.as_ref().unwrap().claimed(), 0);
    }

    #[test]
    fn test_cdo_underflow_ends_command_with_error() {
        let rig = SimRig::attach("pci-6221").unwrap();
        configure(&rig, 0, insn_config::DIO_OUTPUT);
        rig.device.command(cdo_cmd(1)).unwrap();
        rig.device.write(subdev::DIO, &words(0..16)).unwrap();
        rig.device.inttrig(subdev::DIO, 0).unwrap();

        assert_eq!(rig.sim.run_cdo_updates(40), 17);
        assert!(rig.device.get_cmd(subdev::DIO).is_none());
        let events = rig.device.take_events(subdev::DIO).unwrap();
        assert!(events.contains(BufEvents::ERROR));
        assert_eq!(rig.mite.as_ref().unwrap().claimed(), 0);
    }

    #[test]
    fn test_cdo_fill_timeout_releases_dma() {
        let rig = SimRig::attach("pci-6221").unwrap();
        configure(&rig, 0, insn_config::DIO_OUTPUT);
        rig.device.command(cdo_cmd(1)).unwrap();
        rig.device.write(subdev::DIO, &words(0..3)).unwrap();
        let err = rig.device.inttrig(subdev::DIO, 0).unwrap_err();
        assert!(matches!(err, ComediError::Io { .. }));
        assert_eq!(rig.mite.as_ref().unwrap().claimed(), 0);
    }

    #[test]
    fn test_cdo_rejects_wrong_trigger_number() {
        let rig = SimRig::attach("pci-6221").unwrap();
        configure(&rig, 0, insn_config::DIO_OUTPUT);
        rig.device.command(cdo_cmd(1)).unwrap();
        let err = rig.device.inttrig(subdev::DIO, 2).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));
    }
}
