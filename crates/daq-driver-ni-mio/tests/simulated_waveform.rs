//! Analog output waveform generation against the simulated board.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_preloaded_waveform_plays_once` | Preload, internal trigger, every update reaches the DACs, then EOA |
//! | `test_waveform_through_dma` | Same waveform through the DMA engine |
//! | `test_short_dma_waveform_starts` | DMA waveform far below half a FIFO still starts |
//! | `test_dma_start_without_data_is_refused` | Nothing queued: the start trigger fails |
//! | `test_two_channel_interleave` | Scan order of a two channel waveform |
//! | `test_starved_output_underruns` | Running dry raises ERROR and idles the subdevice |
//! | `test_no_output_on_pci_6143` | Boards without DACs expose no AO subdevice |

use comedi_core::{
    AnalogReference, BufEvents, ChanDesc, ComediError, Command, SubdeviceKind, TrigSrc,
};
use daq_driver_ni_mio::sim::SimRig;
use daq_driver_ni_mio::subdev;

fn waveform(nb_chan: u32, stop: u32) -> Command {
    Command::builder(subdev::AO)
        .start(TrigSrc::INT, 0)
        .scan_begin(TrigSrc::TIMER, 100_000)
        .convert(TrigSrc::NOW, 0)
        .stop(TrigSrc::COUNT, stop)
        .channels((0..nb_chan).map(|c| ChanDesc::pack(c, 0, AnalogReference::Ground)))
        .build()
}

/// Offset-binary samples for a bipolar range, as a user buffer.
fn offset_binary(values: impl IntoIterator<Item = u16>) -> Vec<u8> {
    values
        .into_iter()
        .flat_map(|v| (v ^ 0x8000).to_le_bytes())
        .collect()
}

#[test]
fn test_preloaded_waveform_plays_once() {
    let rig = SimRig::polled("pci-6052e").unwrap();
    let n = 1000u16;
    rig.device.command(waveform(1, u32::from(n))).unwrap();
    let written = rig
        .device
        .write(subdev::AO, &offset_binary(0..n))
        .unwrap();
    assert_eq!(written, usize::from(n) * 2);
    assert!(!rig.sim.ao_running());

    rig.device.inttrig(subdev::AO, 0).unwrap();
    assert!(rig.sim.ao_running());
    assert_eq!(rig.sim.run_updates(2000), usize::from(n));

    assert_eq!(rig.sim.dac_outputs(), (0..n).collect::<Vec<_>>());
    let events = rig.device.take_events(subdev::AO).unwrap();
    assert!(events.contains(BufEvents::EOA));
    assert!(!events.contains(BufEvents::ERROR));
    assert!(!rig.sim.ao_running());
    assert_eq!(rig.driver.stats().ao_errors, 0);
}

#[test]
fn test_waveform_through_dma() {
    let rig = SimRig::attach("pci-6221").unwrap();
    let mite = rig.mite.clone().unwrap();
    let n = 600u16;
    rig.device.command(waveform(1, u32::from(n))).unwrap();
    rig.device
        .write(subdev::AO, &offset_binary((0..n).map(|i| i * 3)))
        .unwrap();
    rig.device.inttrig(subdev::AO, 0).unwrap();
    assert_eq!(mite.claimed(), 1);

    assert_eq!(rig.sim.run_updates(usize::from(n) + 50), usize::from(n));
    let out = rig.sim.dac_outputs();
    assert_eq!(out.len(), usize::from(n));
    assert_eq!(out[200], 600);
    assert!(rig
        .device
        .take_events(subdev::AO)
        .unwrap()
        .contains(BufEvents::EOA));
    assert_eq!(mite.claimed(), 0);
}

#[test]
fn test_short_dma_waveform_starts() {
    let rig = SimRig::attach("pci-6221").unwrap();
    rig.device.command(waveform(1, 16)).unwrap();
    rig.device
        .write(subdev::AO, &offset_binary((0..16).map(|i| 100 + i)))
        .unwrap();
    rig.device.inttrig(subdev::AO, 0).unwrap();
    assert!(rig.sim.ao_running());

    assert_eq!(rig.sim.run_updates(20), 16);
    assert_eq!(
        rig.sim.dac_outputs(),
        (0..16).map(|i| 100 + i).collect::<Vec<u16>>()
    );
    let events = rig.device.take_events(subdev::AO).unwrap();
    assert!(events.contains(BufEvents::EOA));
    assert!(!events.contains(BufEvents::ERROR));
}

#[test]
fn test_dma_start_without_data_is_refused() {
    let rig = SimRig::attach("pci-6221").unwrap();
    rig.device.command(waveform(1, 8)).unwrap();
    let err = rig.device.inttrig(subdev::AO, 0).unwrap_err();
    assert!(matches!(err, ComediError::Pipe { .. }));
    assert!(!rig.sim.ao_running());
}

#[test]
fn test_two_channel_interleave() {
    let rig = SimRig::polled("pci-6052e").unwrap();
    rig.device.command(waveform(2, 3)).unwrap();
    rig.device
        .write(subdev::AO, &offset_binary([10, 20, 11, 21, 12, 22]))
        .unwrap();
    rig.device.inttrig(subdev::AO, 0).unwrap();
    assert_eq!(rig.sim.run_updates(10), 3);
    assert_eq!(rig.sim.dac_outputs(), vec![10, 20, 11, 21, 12, 22]);
}

#[test]
fn test_starved_output_underruns() {
    let rig = SimRig::polled("pci-6052e").unwrap();
    rig.device.command(waveform(1, 4000)).unwrap();
    rig.device.write(subdev::AO, &offset_binary(0..50)).unwrap();
    rig.device.inttrig(subdev::AO, 0).unwrap();
    rig.sim.run_updates(500);

    assert!(!rig.sim.ao_running());
    assert!(rig.device.get_cmd(subdev::AO).is_none());
    assert!(rig.driver.stats().ao_errors >= 1);
    // writes are refused until the error is acknowledged
    assert!(rig.device.write(subdev::AO, &offset_binary([1])).is_err());
    let events = rig.device.take_events(subdev::AO).unwrap();
    assert!(events.contains(BufEvents::ERROR));
    rig.device.command(waveform(1, 4)).unwrap();
}

#[test]
fn test_no_output_on_pci_6143() {
    let rig = SimRig::polled("pci-6143").unwrap();
    assert_eq!(
        rig.device.subdevice(subdev::AO).unwrap().kind,
        SubdeviceKind::Unused
    );
    assert!(rig.device.command(waveform(1, 4)).is_err());
}
