//! Continuous reader with asynchronous consumers.
//!
//! The reader thread fills bounded `tokio` channels; these tests consume
//! them from async tasks while a blocking task clocks the simulator.
//!
//! # Test Coverage
//!
//! | Test | Description |
//! |------|-------------|
//! | `test_async_sink_receives_every_scan` | Ordered batches, channel layout, clean finish |
//! | `test_two_sinks_see_the_same_stream` | Fan-out to independent consumers |
//! | `test_overrun_ends_the_stream` | Sinks close and the reader reports the error |

use std::sync::Arc;

use comedi_core::{AnalogReference, ChanDesc, ComediError, Command, TrigSrc};
use daq_driver_ni_mio::sim::SimRig;
use daq_driver_ni_mio::{subdev, ContinuousReader, ReaderOutcome, SinkReceiver};

fn ai_command(nb_chan: u32, stop: Option<u32>) -> Command {
    let (src, arg) = stop.map_or((TrigSrc::NONE, 0), |n| (TrigSrc::COUNT, n));
    Command::builder(subdev::AI)
        .start(TrigSrc::NOW, 0)
        .scan_begin(TrigSrc::TIMER, 1_000_000)
        .convert(TrigSrc::TIMER, 100_000)
        .stop(src, arg)
        .channels((0..nb_chan).map(|c| ChanDesc::pack(c, 0, AnalogReference::Ground)))
        .build()
}

/// Receive until the reader closes the sink; returns (scans, batches).
async fn collect(mut rx: SinkReceiver, nb_chan: usize) -> (usize, u64) {
    let mut scans = 0;
    let mut expected_sequence = 0;
    while let Some(batch) = rx.recv().await {
        assert_eq!(batch.sequence, expected_sequence);
        assert_eq!(batch.n_channels, nb_chan);
        for c in 0..nb_chan {
            assert!(batch.channel_data(c).iter().all(|d| d >> 8 == c as u32));
        }
        expected_sequence += 1;
        scans += batch.n_scans();
    }
    (scans, expected_sequence)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_sink_receives_every_scan() {
    let SimRig { device, sim, .. } = SimRig::polled("pci-6052e").unwrap();
    let reader = ContinuousReader::new(Arc::new(device), subdev::AI, 25).unwrap();
    let rx = reader.add_sink("storage", 64).unwrap();
    reader.start(ai_command(3, Some(200))).unwrap();

    let consumer = tokio::spawn(collect(rx, 3));
    let clocked = tokio::task::spawn_blocking(move || sim.run_scans(300))
        .await
        .unwrap();
    assert_eq!(clocked, 200);

    let (scans, batches) = consumer.await.unwrap();
    assert_eq!(scans, 200);
    assert_eq!(batches, 8);
    assert_eq!(reader.wait().unwrap(), ReaderOutcome::Finished);
    assert_eq!(reader.stats().samples_read, 600);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_sinks_see_the_same_stream() {
    let SimRig { device, sim, .. } = SimRig::attach("pci-6221").unwrap();
    let reader = ContinuousReader::new(Arc::new(device), subdev::AI, 10).unwrap();
    let display = tokio::spawn(collect(reader.add_sink("display", 32).unwrap(), 2));
    let storage = tokio::spawn(collect(reader.add_sink("storage", 32).unwrap(), 2));
    reader.start(ai_command(2, Some(120))).unwrap();

    tokio::task::spawn_blocking(move || sim.run_scans(200))
        .await
        .unwrap();
    assert_eq!(display.await.unwrap(), (120, 12));
    assert_eq!(storage.await.unwrap(), (120, 12));
    assert_eq!(reader.wait().unwrap(), ReaderOutcome::Finished);
    assert_eq!(reader.stats().samples_dropped, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_overrun_ends_the_stream() {
    let SimRig { device, sim, .. } = SimRig::polled("pci-6052e").unwrap();
    let reader = ContinuousReader::new(Arc::new(device), subdev::AI, 5).unwrap();
    let consumer = tokio::spawn(collect(reader.add_sink("storage", 64).unwrap(), 1));
    reader.start(ai_command(1, None)).unwrap();

    tokio::task::spawn_blocking(move || {
        sim.run_scans(40);
        sim.inject_ai_overrun();
    })
    .await
    .unwrap();

    // the sink closes without the consumer having to be told
    let (scans, _) = consumer.await.unwrap();
    assert!(scans <= 40);
    assert!(matches!(
        reader.wait().unwrap(),
        ReaderOutcome::Failed(ComediError::Pipe { .. })
    ));
}
