//! Bringing a board up and down.
//!
//! [`attach`] builds the driver state, registers the subdevices in their
//! fixed order, puts every block of the DAQ-STC into its idle
//! configuration and installs the interrupt handler. [`detach`] undoes the
//! parts that outlive the registry.

use std::sync::Arc;

use comedi_core::{
    ArefFlags, ChannelDescriptor, Device, IrqFlags, Result, SubdeviceDescriptor,
    SubdeviceFlags, SubdeviceKind, Transfer, TransferKind,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::ai::{self, AiOps, AiState};
use crate::ao::{self, AoOps, AoState};
use crate::board::{BoardInfo, BoardKind};
use crate::calib::{self, CalOps, CalState};
use crate::config::AttachConfig;
use crate::device::{Bus, NiMio, Stats, Transfers};
use crate::dio::{self, DioOps, DioState};
use crate::dma::{DmaTransfers, Mite, PolledTransfers, TransferStrategy};
use crate::eeprom::{self, EepromOps, E_SERIES_EEPROM_SIZE, M_SERIES_EEPROM_SIZE};
use crate::fout::FoutOps;
use crate::gpct::{self, CounterState, GpctOps};
use crate::interrupt;
use crate::io::{RegisterIo, Stc};
use crate::pfi::{self, PfiOps, PfiState};
use crate::port8255::{self, BoardPorts, Port8255};
use crate::regs::{board, clock_and_fout, interrupt_control, m_series, r611x, r6143, stc};
use crate::serial::SerialOps;

/// Driver name reported by the registry.
pub const DRIVER_NAME: &str = "ni_mio";

/// Subdevice indices. Slots a board lacks are registered as unused so the
/// indices never move.
pub mod subdev {
    /// Analog input
    pub const AI: usize = 0;
    /// Analog output
    pub const AO: usize = 1;
    /// Static and correlated digital I/O
    pub const DIO: usize = 2;
    /// 8255 digital I/O
    pub const DIO_8255: usize = 3;
    /// Calibration DACs and PWM
    pub const CALIB: usize = 5;
    /// EEPROM
    pub const EEPROM: usize = 6;
    /// Programmable function inputs
    pub const PFI: usize = 7;
    /// Serial DIO
    pub const SERIAL: usize = 9;
    /// Counter 0
    pub const GPCT0: usize = 11;
    /// Counter 1
    pub const GPCT1: usize = 12;
    /// Frequency output
    pub const FREQ_OUT: usize = 13;
    /// Total number of slots
    pub const COUNT: usize = 14;

    /// Index of counter `i`.
    pub const fn gpct(i: usize) -> usize {
        GPCT0 + i
    }
}

const SERIAL_BITS: u32 = 8;
const FOUT_BITS: u32 = 4;

fn input_transfer(size: usize) -> Arc<Transfer> {
    Arc::new(Transfer::new(TransferKind::Input, size))
}

fn output_transfer(size: usize) -> Arc<Transfer> {
    Arc::new(Transfer::new(TransferKind::Output, size))
}

fn strategy(config: &AttachConfig, bus: &Arc<Bus>, engine: Option<Arc<dyn Mite>>) -> Box<dyn TransferStrategy> {
    match (config.dma, engine) {
        (true, Some(mite)) => Box::new(DmaTransfers::new(mite, Arc::clone(bus))),
        (true, None) => {
            warn!(board = %config.board, "DMA requested but no engine present, polling FIFOs");
            Box::new(PolledTransfers)
        }
        (false, _) => Box::new(PolledTransfers),
    }
}

fn descriptor(
    kind: SubdeviceKind,
    flags: SubdeviceFlags,
    count: u32,
    nb_bits: u32,
    arefs: ArefFlags,
) -> SubdeviceDescriptor {
    SubdeviceDescriptor {
        kind,
        flags,
        channels: ChannelDescriptor {
            count,
            nb_bits,
            arefs,
        },
        ranges: &[],
        ops: Arc::new(comedi_core::UnusedOps),
        transfer: None,
    }
}

fn ai_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    let board = dev.board;
    let mut flags = SubdeviceFlags::CMD | SubdeviceFlags::READABLE;
    if board.ai_lsampl() {
        flags |= SubdeviceFlags::LSAMPL;
    }
    // the 6143 picks its own reference, so any is accepted; elsewhere
    // AREF_OTHER has no gain-list encoding
    let arefs = match board.kind {
        BoardKind::Pci611x => ArefFlags::DIFF,
        BoardKind::Pci6143 => {
            ArefFlags::DIFF | ArefFlags::GROUND | ArefFlags::COMMON | ArefFlags::OTHER
        }
        BoardKind::ESeries | BoardKind::MSeries => {
            ArefFlags::DIFF | ArefFlags::GROUND | ArefFlags::COMMON
        }
    };
    SubdeviceDescriptor {
        ranges: board.gains.ranges(),
        ops: Arc::new(AiOps {
            dev: Arc::clone(dev),
        }),
        transfer: Some(Arc::clone(&dev.transfers.ai)),
        ..descriptor(
            SubdeviceKind::AnalogInput,
            flags,
            board.n_adchan,
            board.adbits,
            arefs,
        )
    }
}

fn ao_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    let board = dev.board;
    if board.n_aochan == 0 {
        return SubdeviceDescriptor::unused();
    }
    let mut flags = SubdeviceFlags::WRITABLE;
    if dev.transfers.ao.is_some() {
        flags |= SubdeviceFlags::CMD;
    }
    SubdeviceDescriptor {
        ranges: board.ao_ranges.ranges(),
        ops: Arc::new(AoOps {
            dev: Arc::clone(dev),
        }),
        transfer: dev.transfers.ao.clone(),
        ..descriptor(
            SubdeviceKind::AnalogOutput,
            flags,
            board.n_aochan,
            board.aobits,
            ArefFlags::GROUND,
        )
    }
}

fn dio_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    let mut flags = SubdeviceFlags::READABLE | SubdeviceFlags::WRITABLE;
    if dev.transfers.cdo.is_some() {
        flags |= SubdeviceFlags::CMD;
    }
    SubdeviceDescriptor {
        ops: Arc::new(DioOps {
            dev: Arc::clone(dev),
        }),
        transfer: dev.transfers.cdo.clone(),
        ..descriptor(
            SubdeviceKind::DigitalIO,
            flags,
            dev.board.n_dio_channels,
            1,
            ArefFlags::GROUND,
        )
    }
}

fn port8255_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    if !dev.board.has_8255 {
        return SubdeviceDescriptor::unused();
    }
    let ports = BoardPorts {
        bus: Arc::clone(&dev.bus),
    };
    SubdeviceDescriptor {
        ops: Arc::new(Port8255::new(Box::new(ports))),
        ..descriptor(
            SubdeviceKind::DigitalIO,
            SubdeviceFlags::READABLE | SubdeviceFlags::WRITABLE,
            port8255::N_LINES,
            1,
            ArefFlags::GROUND,
        )
    }
}

fn calib_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    let board = dev.board;
    // PWM-only boards still expose one channel for the config instructions
    let count = calib::n_caldac_channels(board).max(1);
    SubdeviceDescriptor {
        ops: Arc::new(CalOps {
            dev: Arc::clone(dev),
        }),
        ..descriptor(
            SubdeviceKind::Calibration,
            SubdeviceFlags::READABLE | SubdeviceFlags::WRITABLE,
            count,
            calib::caldac_bits(board),
            ArefFlags::empty(),
        )
    }
}

fn eeprom_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    let size = if dev.board.is_m_series() {
        M_SERIES_EEPROM_SIZE
    } else {
        E_SERIES_EEPROM_SIZE
    };
    SubdeviceDescriptor {
        ops: Arc::new(EepromOps {
            dev: Arc::clone(dev),
        }),
        ..descriptor(
            SubdeviceKind::Memory,
            SubdeviceFlags::READABLE,
            size,
            8,
            ArefFlags::empty(),
        )
    }
}

fn pfi_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    SubdeviceDescriptor {
        ops: Arc::new(PfiOps {
            dev: Arc::clone(dev),
        }),
        ..descriptor(
            SubdeviceKind::Pfi,
            SubdeviceFlags::READABLE | SubdeviceFlags::WRITABLE,
            pfi::n_channels(dev.board),
            1,
            ArefFlags::empty(),
        )
    }
}

fn serial_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    SubdeviceDescriptor {
        ops: Arc::new(SerialOps {
            dev: Arc::clone(dev),
        }),
        ..descriptor(
            SubdeviceKind::Serial,
            SubdeviceFlags::READABLE | SubdeviceFlags::WRITABLE,
            1,
            SERIAL_BITS,
            ArefFlags::empty(),
        )
    }
}

fn gpct_subdevice(dev: &Arc<NiMio>, index: usize) -> SubdeviceDescriptor {
    SubdeviceDescriptor {
        ops: Arc::new(GpctOps {
            dev: Arc::clone(dev),
            index,
        }),
        transfer: Some(Arc::clone(&dev.transfers.gpct[index])),
        ..descriptor(
            SubdeviceKind::Counter,
            SubdeviceFlags::CMD
                | SubdeviceFlags::READABLE
                | SubdeviceFlags::WRITABLE
                | SubdeviceFlags::LSAMPL,
            gpct::N_CHANNELS,
            gpct::counter_bits(dev.board.is_m_series()),
            ArefFlags::empty(),
        )
    }
}

fn fout_subdevice(dev: &Arc<NiMio>) -> SubdeviceDescriptor {
    SubdeviceDescriptor {
        ops: Arc::new(FoutOps {
            dev: Arc::clone(dev),
        }),
        ..descriptor(
            SubdeviceKind::FrequencyOutput,
            SubdeviceFlags::READABLE | SubdeviceFlags::WRITABLE,
            1,
            FOUT_BITS,
            ArefFlags::empty(),
        )
    }
}

/// Register every subdevice slot in index order.
fn register_subdevices(device: &mut Device, dev: &Arc<NiMio>) {
    let slots = [
        ai_subdevice(dev),
        ao_subdevice(dev),
        dio_subdevice(dev),
        port8255_subdevice(dev),
        SubdeviceDescriptor::unused(),
        calib_subdevice(dev),
        eeprom_subdevice(dev),
        pfi_subdevice(dev),
        SubdeviceDescriptor::unused(),
        serial_subdevice(dev),
        SubdeviceDescriptor::unused(),
        gpct_subdevice(dev, 0),
        gpct_subdevice(dev, 1),
        fout_subdevice(dev),
    ];
    for desc in slots {
        device.add_subdevice(desc);
    }
}

/// Idle value of `Clock_and_FOUT`.
fn initial_clock_and_fout(board: &BoardInfo) -> u16 {
    let mut clock = clock_and_fout::SLOW_INTERNAL_TIME_DIVIDE_BY_2
        | clock_and_fout::SLOW_INTERNAL_TIMEBASE
        | clock_and_fout::CLOCK_TO_BOARD_DIVIDE_BY_2
        | clock_and_fout::CLOCK_TO_BOARD;
    if !matches!(board.kind, BoardKind::Pci611x | BoardKind::Pci6143) {
        clock |= clock_and_fout::AI_OUTPUT_DIVIDE_BY_2 | clock_and_fout::AO_OUTPUT_DIVIDE_BY_2;
    }
    clock
}

/// `Interrupt_Control` routing both groups to `pin`.
fn interrupt_control_word(pin: u32, polarity_low: bool) -> u16 {
    let mut word = interrupt_control::INTERRUPT_A_ENABLE
        | interrupt_control::INTERRUPT_B_ENABLE
        | interrupt_control::interrupt_a_output_select(pin)
        | interrupt_control::interrupt_b_output_select(pin);
    if polarity_low {
        word |= interrupt_control::INTERRUPT_OUTPUT_POLARITY;
    }
    word
}

/// Family registers that need a value before anything else runs.
fn init_family(dev: &NiMio) {
    let io = dev.bus.io();
    match dev.board.kind {
        BoardKind::Pci611x => io.write8(r611x::MAGIC, 0),
        BoardKind::Pci6143 => {
            io.write8(r6143::MAGIC, 0);
            io.write8(r6143::PIPELINE_DELAY, 0x80);
            io.write8(r6143::EOC_SET, 0);
            io.write32(r6143::AIFIFO_FLAG, dev.board.ai_fifo_depth / 2);
            io.write32(r6143::CALIBRATION_LOW_TIME, 0x10);
            io.write32(r6143::CALIBRATION_HIGH_TIME, 0);
        }
        BoardKind::MSeries => {
            for chan in 0..dev.board.n_aochan {
                io.write8(m_series::ao_waveform_order(chan), 0xf);
                io.write8(m_series::ao_reference_attenuation(chan), 0);
            }
            io.write8(m_series::AO_CALIBRATION, 0);
        }
        BoardKind::ESeries => {}
    }
}

/// Put the hardware into its idle state.
fn init_hardware(dev: &NiMio) -> Result<()> {
    let stc = dev.bus.stc();
    dio::init(dev);
    ai::reset(dev, &mut dev.ai.lock());

    {
        let mut clock = dev.clock_and_fout.lock();
        *clock = initial_clock_and_fout(dev.board);
        stc.writew(*clock, stc::CLOCK_AND_FOUT);
    }

    ao::reset(dev, &mut dev.ao.lock());

    if dev.config.irq.is_some() {
        let word = interrupt_control_word(dev.config.irq_pin, dev.config.irq_polarity_low);
        stc.writew(word, stc::INTERRUPT_CONTROL);
        debug!(word, "interrupt output routed");
    }

    // DMA channel routing starts disconnected
    let shadow = dev.bus.shadow();
    let io = dev.bus.io();
    io.write8(board::AI_AO_SELECT, shadow.ai_ao_select);
    io.write8(board::G0_G1_SELECT, shadow.g0_g1_select);

    init_family(dev);

    if dev.board.is_m_series() {
        calib::init_pwm(dev);
    } else {
        calib::caldac_setup(dev)?;
    }
    pfi::init(dev);
    for (i, counter) in dev.counters.iter().enumerate() {
        gpct::reset(dev, i, &mut counter.lock())?;
    }
    Ok(())
}

/// Attach the board named in `config`, reached through `io`. `engine` is
/// the MITE DMA engine, if the bus provides one.
///
/// Returns the registry the caller drives and the driver state behind it.
pub fn attach(
    config: AttachConfig,
    io: Arc<dyn RegisterIo>,
    engine: Option<Arc<dyn Mite>>,
) -> Result<(Device, Arc<NiMio>)> {
    config.validate()?;
    let info = config.board_info()?;
    info!(board = info.name, kind = ?info.kind, dma = config.dma, irq = ?config.irq, "attaching");

    let mut device = Device::new(DRIVER_NAME, info.name);
    let stc = if info.is_m_series() {
        Stc::m_series(Arc::clone(&io))
    } else {
        Stc::windowed(Arc::clone(&io))
    };
    let bus = Arc::new(Bus::new(stc));
    let dma = strategy(&config, &bus, engine);

    let transfers = Transfers {
        ai: input_transfer(config.ai_buffer_size),
        ao: (info.n_aochan > 0 && info.ao_fifo_depth > 0)
            .then(|| output_transfer(config.ao_buffer_size)),
        cdo: info
            .is_m_series()
            .then(|| output_transfer(config.cdo_buffer_size)),
        gpct: [
            input_transfer(config.gpct_buffer_size),
            input_transfer(config.gpct_buffer_size),
        ],
    };
    let eeprom = if info.is_m_series() {
        eeprom::read_image(io.as_ref())
    } else {
        Vec::new()
    };

    let dev = Arc::new(NiMio {
        dev_lock: device.lock_handle(),
        board: info,
        family: crate::family::for_board(info),
        bus,
        dma,
        irq: Arc::clone(device.irq()),
        transfers,
        config,
        ai: Mutex::new(AiState::default()),
        ao: Mutex::new(AoState::default()),
        dio: Mutex::new(DioState::default()),
        counters: [
            Mutex::new(CounterState::default()),
            Mutex::new(CounterState::default()),
        ],
        cal: Mutex::new(CalState::for_board(info)),
        pfi: Mutex::new(PfiState::default()),
        clock_and_fout: Mutex::new(0),
        eeprom,
        stats: Stats::default(),
    });

    register_subdevices(&mut device, &dev);
    init_hardware(&dev)?;

    if let Some(line) = dev.config.irq {
        dev.irq.request(
            line,
            interrupt::handler(Arc::downgrade(&dev)),
            IrqFlags::SHARED,
            info.name,
        )?;
    }
    info!(
        board = info.name,
        subdevices = device.n_subdevices(),
        transfers = dev.dma.name(),
        "attached"
    );
    Ok((device, dev))
}

/// Stop every running command and release the interrupt line.
pub fn detach(device: &Device) -> Result<()> {
    let mut first_err = None;
    for index in 0..device.n_subdevices() {
        let running = device
            .transfer(index)
            .map(|t| t.is_running())
            .unwrap_or(false);
        if running {
            if let Err(e) = device.cancel(index) {
                warn!(index, error = %e, "cancel on detach failed");
                first_err.get_or_insert(e);
            }
        }
    }
    device.irq().free();
    info!(board = device.board_name(), "detached");
    first_err.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::find_board;
    use crate::regs::IntAEnable;
    use crate::sim::{SimBoard, SimRig};
    use comedi_core::{ComediError, IrqReturn};

    #[test]
    fn test_subdevice_order_e_series() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        let info = rig.device.info();
        assert_eq!(info.subdevices.len(), subdev::COUNT);
        let kinds: Vec<_> = info.subdevices.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SubdeviceKind::AnalogInput,
                SubdeviceKind::AnalogOutput,
                SubdeviceKind::DigitalIO,
                SubdeviceKind::Unused,
                SubdeviceKind::Unused,
                SubdeviceKind::Calibration,
                SubdeviceKind::Memory,
                SubdeviceKind::Pfi,
                SubdeviceKind::Unused,
                SubdeviceKind::Serial,
                SubdeviceKind::Unused,
                SubdeviceKind::Counter,
                SubdeviceKind::Counter,
                SubdeviceKind::FrequencyOutput,
            ]
        );
        assert_eq!(info.irq, Some(11));
    }

    #[test]
    fn test_ai_subdevice_description() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let ai = rig.device.subdevice(subdev::AI).unwrap();
        assert!(ai.flags.contains(SubdeviceFlags::CMD | SubdeviceFlags::READABLE));
        assert!(!ai.flags.contains(SubdeviceFlags::LSAMPL));
        assert!(ai.channels.arefs.contains(ArefFlags::GROUND | ArefFlags::DIFF));
        assert!(!ai.channels.arefs.contains(ArefFlags::OTHER));
        assert_eq!(ai.channels.count, 16);

        let rig = SimRig::polled("pci-6143").unwrap();
        let ai = rig.device.subdevice(subdev::AI).unwrap();
        assert!(ai.channels.arefs.contains(ArefFlags::OTHER));

        let rig = SimRig::polled("pci-6110").unwrap();
        let ai = rig.device.subdevice(subdev::AI).unwrap();
        assert_eq!(ai.channels.arefs, ArefFlags::DIFF);
    }

    #[test]
    fn test_m_series_counters_and_dio() {
        let rig = SimRig::polled("pci-6221").unwrap();
        let g0 = rig.device.subdevice(subdev::GPCT0).unwrap();
        assert_eq!(g0.channels.nb_bits, 32);
        assert_eq!(g0.channels.count, gpct::N_CHANNELS);
        let dio = rig.device.subdevice(subdev::DIO).unwrap();
        assert!(dio.flags.contains(SubdeviceFlags::CMD));
        assert!(dio.transfer.is_some());
        let eeprom = rig.device.subdevice(subdev::EEPROM).unwrap();
        assert_eq!(eeprom.channels.count, M_SERIES_EEPROM_SIZE);

        let rig = SimRig::polled("pci-6052e").unwrap();
        let g0 = rig.device.subdevice(subdev::gpct(0)).unwrap();
        assert_eq!(g0.channels.nb_bits, 24);
        assert!(rig.device.subdevice(subdev::DIO).unwrap().transfer.is_none());
    }

    #[test]
    fn test_8255_slot_follows_board() {
        let rig = SimRig::polled("pci-mio-16e-1").unwrap();
        let ports = rig.device.subdevice(subdev::DIO_8255).unwrap();
        assert_eq!(ports.kind, SubdeviceKind::DigitalIO);
        assert_eq!(ports.channels.count, port8255::N_LINES);
    }

    #[test]
    fn test_interrupt_routing() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        let word = rig.sim.stc_reg(stc::INTERRUPT_CONTROL);
        assert_eq!(word, interrupt_control_word(0, true));
        assert_ne!(word & interrupt_control::INTERRUPT_A_ENABLE, 0);

        let rig = SimRig::attach_with(AttachConfig {
            irq: None,
            ..SimRig::config("pci-6052e")
        })
        .unwrap();
        assert_eq!(rig.sim.stc_reg(stc::INTERRUPT_CONTROL), 0);
        assert_eq!(rig.device.irq().line(), None);
    }

    #[test]
    fn test_clock_and_fout_idle_value() {
        let rig = SimRig::polled("pci-6052e").unwrap();
        let clock = rig.sim.stc_reg(stc::CLOCK_AND_FOUT);
        assert_ne!(clock & clock_and_fout::AI_OUTPUT_DIVIDE_BY_2, 0);
        assert_ne!(clock & clock_and_fout::CLOCK_TO_BOARD, 0);

        let rig = SimRig::polled("pci-6110").unwrap();
        let clock = rig.sim.stc_reg(stc::CLOCK_AND_FOUT);
        assert_eq!(clock & clock_and_fout::AI_OUTPUT_DIVIDE_BY_2, 0);
        assert_eq!(rig.sim.board_reg(r611x::MAGIC), 0);
    }

    #[test]
    fn test_m_series_ao_init() {
        let rig = SimRig::polled("pci-6221").unwrap();
        for chan in 0..rig.driver.board().n_aochan {
            assert_eq!(rig.sim.board_reg(m_series::ao_waveform_order(chan)), 0xf);
        }
        assert_eq!(rig.sim.board_reg(m_series::AO_CALIBRATION), 0);
    }

    #[test]
    fn test_idle_after_attach() {
        let rig = SimRig::attach("pci-6251").unwrap();
        let a = IntAEnable::from_bits_retain(rig.driver.bus().shadow().int_a_enable);
        assert!(a.is_empty());
        assert_eq!(rig.mite.as_ref().unwrap().claimed(), 0);
        assert_eq!(rig.sim.interrupt(), IrqReturn::None);
    }

    #[test]
    fn test_dma_without_engine_polls() {
        let info = find_board("pci-6052e").unwrap();
        let sim = SimBoard::new(info);
        let (_device, driver) = attach(SimRig::config(info.name), sim, None).unwrap();
        assert!(!driver.uses_dma());
    }

    #[test]
    fn test_rejects_unknown_board_and_bad_pin() {
        let sim = SimBoard::new(find_board("pci-6052e").unwrap());
        let err = attach(AttachConfig::for_board("pci-9999"), sim.clone(), None).unwrap_err();
        assert!(matches!(err, ComediError::InvalidArgument { .. }));

        let config = AttachConfig {
            irq_pin: 9,
            ..AttachConfig::for_board("pci-6052e")
        };
        assert!(attach(config, sim, None).is_err());
    }

    #[test]
    fn test_detach_frees_line() {
        let rig = SimRig::attach("pci-6052e").unwrap();
        detach(&rig.device).unwrap();
        assert_eq!(rig.device.irq().line(), None);
    }
}
