//! Shared interrupt line of the board.
//!
//! One handler serves every source: the AI sequencer (group A), the AO
//! sequencer (group B), the DMA channels, the counters and the correlated
//! DO FIFO. It runs with the device lock held so it never interleaves with
//! `do_cmd`, `cancel` or `inttrig`.

use std::sync::{Arc, Weak};

use comedi_core::{IrqHandler, IrqReturn};
use tracing::{error, trace};

use crate::device::{NiMio, Stats};
use crate::dma::DmaRole;
use crate::regs::mite::Chsr;
use crate::regs::{stc, AiStatus1, AoStatus1, IntAAck};
use crate::{ai, ao, dio, gpct};

/// Status value of a board that no longer answers on the bus.
const CARD_GONE: u16 = 0xffff;

/// `Interrupt_A_Ack` bits for the AI conditions latched in `status`.
/// Counter 0 acknowledges its own bits.
fn ai_acks(status: AiStatus1) -> IntAAck {
    let mut ack = IntAAck::empty();
    for (bit, a) in [
        (AiStatus1::SC_TC, IntAAck::AI_SC_TC),
        (AiStatus1::START1, IntAAck::AI_START1),
        (AiStatus1::START, IntAAck::AI_START),
        (AiStatus1::STOP, IntAAck::AI_STOP),
    ] {
        if status.contains(bit) {
            ack |= a;
        }
    }
    ack
}

/// Build the handler registered on the line. The handler holds the driver
/// weakly; once the driver is gone interrupts are reported as not ours.
pub(crate) fn handler(dev: Weak<NiMio>) -> IrqHandler {
    Arc::new(move || match dev.upgrade() {
        Some(dev) => interrupt(&dev),
        None => IrqReturn::None,
    })
}

/// Service one interrupt.
pub(crate) fn interrupt(dev: &NiMio) -> IrqReturn {
    let _guard = dev.dev_lock.lock();
    Stats::bump(&dev.stats.interrupts);

    let stc = dev.bus.stc();
    let a_raw = stc.readw(stc::AI_STATUS_1);
    let b_raw = stc.readw(stc::AO_STATUS_1);
    if a_raw == CARD_GONE || b_raw == CARD_GONE {
        error!(
            a_status = a_raw,
            b_status = b_raw,
            "status registers read all ones, card removed?"
        );
        ai::card_removed(dev);
        ao::card_removed(dev);
        return IrqReturn::Handled;
    }
    let a = AiStatus1::from_bits_retain(a_raw);
    let b = AoStatus1::from_bits_retain(b_raw);

    let ai_mite = dev.dma.take_status(DmaRole::Ai);
    let ao_mite = dev.dma.take_status(DmaRole::Ao);
    trace!(%a, %b, ai_mite = ai_mite.bits(), ao_mite = ao_mite.bits(), "interrupt");

    let ack_a = ai_acks(a);
    if !ack_a.is_empty() {
        stc.writew(ack_a.bits(), stc::INTERRUPT_A_ACK);
    }
    let ack_b = ao::acks_for(b);
    if !ack_b.is_empty() {
        stc.writew(ack_b.bits(), stc::INTERRUPT_B_ACK);
    }

    if a.contains(AiStatus1::INTERRUPT_A) || ai_mite.contains(Chsr::INT) {
        ai::handle_interrupt(dev, a, ai_mite);
    }
    if b.contains(AoStatus1::INTERRUPT_B) || ao_mite.contains(Chsr::INT) {
        ao::handle_interrupt(dev, b, ao_mite);
    }
    gpct::handle_interrupt(dev, a, b);
    dio::handle_cdo_interrupt(dev);
    IrqReturn::Handled
}
