//! Interrupt line registration.
//!
//! A device owns at most one interrupt registration. The driver installs a
//! handler at attach time with [`IrqSlot::request`]; the platform (or the
//! simulator) delivers interrupts through [`IrqSlot::fire`].

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::error::{ComediError, Result};

bitflags! {
    /// Registration flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct IrqFlags: u32 {
        /// Line may be shared with other devices
        const SHARED = 0x1;
        /// Edge-triggered rather than level
        const EDGE = 0x2;
    }
}

/// What a handler did with an interrupt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Interrupt was not for this device
    None,
    /// Interrupt was serviced
    Handled,
}

/// Interrupt handler. Runs in interrupt context: must not block.
pub type IrqHandler = Arc<dyn Fn() -> IrqReturn + Send + Sync>;

struct Registration {
    line: u32,
    flags: IrqFlags,
    cookie: String,
    handler: IrqHandler,
}

/// The interrupt registration of one device.
#[derive(Default)]
pub struct IrqSlot {
    reg: RwLock<Option<Registration>>,
}

impl IrqSlot {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` on `line`.
    pub fn request(
        &self,
        line: u32,
        handler: IrqHandler,
        flags: IrqFlags,
        cookie: impl Into<String>,
    ) -> Result<()> {
        let mut reg = self.reg.write();
        if let Some(existing) = reg.as_ref() {
            return Err(ComediError::invalid(format!(
                "irq {} already registered by {}",
                existing.line, existing.cookie
            )));
        }
        let cookie = cookie.into();
        debug!(line, ?flags, %cookie, "irq registered");
        *reg = Some(Registration {
            line,
            flags,
            cookie,
            handler,
        });
        Ok(())
    }

    /// Drop the registration. Freeing an unregistered slot is a no-op.
    pub fn free(&self) {
        if let Some(reg) = self.reg.write().take() {
            debug!(line = reg.line, "irq freed");
        }
    }

    /// Registered line.
    pub fn line(&self) -> Option<u32> {
        self.reg.read().as_ref().map(|r| r.line)
    }

    /// Registration flags.
    pub fn flags(&self) -> Option<IrqFlags> {
        self.reg.read().as_ref().map(|r| r.flags)
    }

    /// Deliver one interrupt to the handler.
    pub fn fire(&self) -> IrqReturn {
        let handler = self.reg.read().as_ref().map(|r| Arc::clone(&r.handler));
        match handler {
            Some(h) => {
                let ret = h();
                trace!(?ret, "irq delivered");
                ret
            }
            None => IrqReturn::None,
        }
    }
}

impl fmt::Debug for IrqSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IrqSlot")
            .field("line", &self.line())
            .field("flags", &self.flags())
            .finish()
    }
}
