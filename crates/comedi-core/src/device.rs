//! Device: subdevice registry and command lifecycle.
//!
//! A driver builds a [`Device`] at attach time, registers its subdevices in
//! a fixed order with [`Device::add_subdevice`] and installs its interrupt
//! handler on [`Device::irq`]. Callers then drive subdevices by index:
//!
//! ```text
//! cmdtest ─► command ─► (read | write | poll | mark_bufrw)* ─► EOA / ERROR
//!                                 │
//!                                 └──────────► cancel ─► IDLE
//! ```
//!
//! The registry enforces the per-subdevice state machine: a command is only
//! accepted while the subdevice is idle and has no pending `ERROR` event.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::buffer::BufEvents;
use crate::cmd::Command;
use crate::error::{ComediError, Result, SubdeviceKind};
use crate::irq::IrqSlot;
use crate::subdevice::{InsnKind, Insn, SubdeviceDescriptor, SubdeviceFlags};
use crate::transfer::{Transfer, TransferKind};

/// Summary of a registered subdevice.
#[derive(Debug, Clone)]
pub struct SubdeviceInfo {
    /// Subdevice index
    pub index: usize,
    /// Function
    pub kind: SubdeviceKind,
    /// Number of channels
    pub n_channels: u32,
    /// Maximum data value (e.g., 65535 for 16-bit)
    pub maxdata: u32,
    /// Capability flags
    pub flags: SubdeviceFlags,
    /// Number of ranges
    pub n_ranges: usize,
    /// Whether a command is running
    pub busy: bool,
}

impl SubdeviceInfo {
    /// Check if subdevice supports commands (async acquisition).
    pub fn supports_commands(&self) -> bool {
        self.flags.contains(SubdeviceFlags::CMD)
    }
}

/// Information about the device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Board name (e.g., "pci-6052e")
    pub board_name: String,
    /// Driver name
    pub driver_name: String,
    /// Registered interrupt line
    pub irq: Option<u32>,
    /// Subdevices in registration order
    pub subdevices: Vec<SubdeviceInfo>,
}

/// An attached device.
pub struct Device {
    board_name: String,
    driver_name: String,
    subdevices: Vec<SubdeviceDescriptor>,
    lock: Arc<Mutex<()>>,
    irq: Arc<IrqSlot>,
}

impl Device {
    /// Create an empty device.
    pub fn new(driver_name: impl Into<String>, board_name: impl Into<String>) -> Self {
        Self {
            board_name: board_name.into(),
            driver_name: driver_name.into(),
            subdevices: Vec::new(),
            lock: Arc::new(Mutex::new(())),
            irq: Arc::new(IrqSlot::new()),
        }
    }

    /// Register a subdevice; returns its index. Indices follow call order.
    pub fn add_subdevice(&mut self, desc: SubdeviceDescriptor) -> usize {
        let index = self.subdevices.len();
        debug!(index, kind = %desc.kind, "subdevice registered");
        self.subdevices.push(desc);
        index
    }

    /// Handle on the device lock, shared with the interrupt handler.
    pub fn lock_handle(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.lock)
    }

    /// Acquire the device lock.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Interrupt registration.
    pub fn irq(&self) -> &Arc<IrqSlot> {
        &self.irq
    }

    /// Board name.
    pub fn board_name(&self) -> &str {
        &self.board_name
    }

    /// Number of subdevices.
    pub fn n_subdevices(&self) -> usize {
        self.subdevices.len()
    }

    /// Descriptor of a subdevice.
    pub fn subdevice(&self, index: usize) -> Result<&SubdeviceDescriptor> {
        self.subdevices
            .get(index)
            .ok_or(ComediError::InvalidSubdevice {
                index,
                count: self.subdevices.len(),
            })
    }

    /// Asynchronous context of a command-capable subdevice.
    pub fn transfer(&self, index: usize) -> Result<&Arc<Transfer>> {
        self.subdevice(index)?
            .transfer
            .as_ref()
            .ok_or_else(|| ComediError::not_supported(format!("commands on subdevice {index}")))
    }

    /// Device summary.
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            board_name: self.board_name.clone(),
            driver_name: self.driver_name.clone(),
            irq: self.irq.line(),
            subdevices: self
                .subdevices
                .iter()
                .enumerate()
                .map(|(index, s)| SubdeviceInfo {
                    index,
                    kind: s.kind,
                    n_channels: s.channels.count,
                    maxdata: if s.channels.nb_bits >= 32 {
                        u32::MAX
                    } else {
                        (1u32 << s.channels.nb_bits).wrapping_sub(1)
                    },
                    flags: s.flags,
                    n_ranges: s.ranges.len(),
                    busy: s.transfer.as_ref().is_some_and(|t| t.is_running()),
                })
                .collect(),
        }
    }

    fn check_chanlist(&self, cmd: &Command) -> Result<&SubdeviceDescriptor> {
        let subd = self.subdevice(cmd.idx_subd)?;
        if !subd.flags.contains(SubdeviceFlags::CMD) {
            return Err(ComediError::not_supported(format!(
                "commands on subdevice {}",
                cmd.idx_subd
            )));
        }
        if cmd.chan_descs.is_empty() {
            return Err(ComediError::invalid("command has an empty channel list"));
        }
        for desc in &cmd.chan_descs {
            subd.check_chan_desc(cmd.idx_subd, *desc)?;
        }
        Ok(subd)
    }

    // ------------------------------------------------------------------
    // Command lifecycle
    // ------------------------------------------------------------------

    /// Validate a command, correcting it in place.
    pub fn cmdtest(&self, cmd: &mut Command) -> Result<()> {
        let subd = self.check_chanlist(cmd)?;
        subd.ops.do_cmdtest(cmd)
    }

    /// Start a command. The subdevice must be idle without a pending error.
    pub fn command(&self, cmd: Command) -> Result<()> {
        let subd = self.check_chanlist(&cmd)?;
        let index = cmd.idx_subd;
        let transfer = self.transfer(index)?;

        let mut checked = cmd.clone();
        if let Err(e) = subd.ops.do_cmdtest(&mut checked) {
            return match e {
                ComediError::CmdTest { step } => Err(ComediError::invalid(format!(
                    "command rejected by command test at step {step}"
                ))),
                other => Err(other),
            };
        }

        let cmd = Arc::new(cmd);
        let sample_size = if subd.flags.contains(SubdeviceFlags::LSAMPL) {
            4
        } else {
            subd.channels.sample_size()
        };
        transfer.begin(index, Arc::clone(&cmd), sample_size)?;
        info!(
            subdevice = index,
            nb_chan = cmd.nb_chan(),
            stop = ?cmd.stop_src,
            stop_arg = cmd.stop_arg,
            "command started"
        );
        if let Err(e) = subd.ops.do_cmd(&cmd) {
            warn!(subdevice = index, error = %e, "command failed to start");
            transfer.finish();
            return Err(e);
        }
        Ok(())
    }

    /// Stop a subdevice. Safe to call when idle; always resets hardware.
    pub fn cancel(&self, index: usize) -> Result<()> {
        let subd = self.subdevice(index)?;
        let _guard = self.lock.lock();
        subd.ops.cancel()?;
        if let Some(t) = &subd.transfer {
            t.finish();
        }
        debug!(subdevice = index, "cancelled");
        Ok(())
    }

    /// Active command of a subdevice.
    pub fn get_cmd(&self, index: usize) -> Option<Arc<Command>> {
        self.transfer(index).ok().and_then(|t| t.command())
    }

    /// Software trigger.
    pub fn inttrig(&self, index: usize, trignum: u32) -> Result<()> {
        let subd = self.subdevice(index)?;
        if !self.transfer(index)?.is_running() {
            return Err(ComediError::invalid(format!(
                "no command running on subdevice {index}"
            )));
        }
        subd.ops.inttrig(trignum)
    }

    // ------------------------------------------------------------------
    // Single-shot instructions
    // ------------------------------------------------------------------

    /// Run a single-shot instruction.
    pub fn insn(&self, index: usize, insn: &mut Insn) -> Result<()> {
        let subd = self.subdevice(index)?;
        if matches!(insn.kind, InsnKind::Read | InsnKind::Write) {
            subd.check_chan_desc(index, insn.chan_desc)?;
        }
        match insn.kind {
            InsnKind::Read => subd.ops.insn_read(insn),
            InsnKind::Write => subd.ops.insn_write(insn),
            InsnKind::Bits => subd.ops.insn_bits(insn),
            InsnKind::Config => subd.ops.insn_config(insn),
        }
    }

    // ------------------------------------------------------------------
    // Consumer side
    // ------------------------------------------------------------------

    /// Copy acquired bytes out of an input subdevice.
    pub fn read(&self, index: usize, out: &mut [u8]) -> Result<usize> {
        let transfer = self.transfer(index)?;
        if transfer.kind() != TransferKind::Input {
            return Err(ComediError::invalid(format!("subdevice {index} is not readable")));
        }
        let n = transfer.read(out);
        if n == 0 && transfer.buffer().events().contains(BufEvents::ERROR) {
            return Err(ComediError::pipe(format!("acquisition error on subdevice {index}")));
        }
        Ok(n)
    }

    /// Copy bytes into an output subdevice.
    pub fn write(&self, index: usize, data: &[u8]) -> Result<usize> {
        let transfer = self.transfer(index)?;
        if transfer.kind() != TransferKind::Output {
            return Err(ComediError::invalid(format!("subdevice {index} is not writable")));
        }
        if transfer.buffer().events().contains(BufEvents::ERROR) {
            return Err(ComediError::pipe(format!("output error on subdevice {index}")));
        }
        Ok(transfer.write(data))
    }

    /// Wait until data (input) or space (output) is ready. Returns bytes ready.
    pub fn poll(&self, index: usize, timeout: Duration) -> Result<usize> {
        let transfer = self.transfer(index)?;
        let direction = match transfer.kind() {
            TransferKind::Input => crate::buffer::BufDirection::Get,
            TransferKind::Output => crate::buffer::BufDirection::Put,
        };
        Ok(transfer.buffer().wait_for(direction, 1, timeout))
    }

    /// Acknowledge `amount` bytes moved through shared memory. Returns the
    /// bytes ready afterwards.
    pub fn mark_bufrw(&self, index: usize, amount: usize) -> Result<usize> {
        let transfer = self.transfer(index)?;
        match transfer.kind() {
            TransferKind::Input => {
                transfer.buffer().prepare_get(amount)?;
                transfer.buffer().commit_get(amount)?;
            }
            TransferKind::Output => transfer.mark_written(amount)?,
        }
        Ok(transfer.user_count())
    }

    /// Take and clear pending buffer events.
    pub fn take_events(&self, index: usize) -> Result<BufEvents> {
        Ok(self.transfer(index)?.buffer().take_events())
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("board", &self.board_name)
            .field("driver", &self.driver_name)
            .field("subdevices", &self.subdevices)
            .field("irq", &self.irq)
            .finish()
    }
}
