// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Sharing a `Device` between thread mode and the USB interrupt.
//!
//! The application and the ISR both want `&mut Device`. Rather than a global
//! critical section, we mask just the USB interrupt line while the
//! application holds the device, which is all the exclusion we need on a
//! single core: nothing else touches it.
//!
//! Typical use:
//!
//! ```ignore
//! static USB: SharedDevice<'static, NvicLine<Interrupt>, Udphs<Clocks>, App> =
//!     SharedDevice::new(NvicLine::new(Interrupt::UDPHS));
//!
//! #[interrupt]
//! fn UDPHS() {
//!     USB.on_interrupt();
//! }
//!
//! // in main
//! USB.install(Device::new(...));
//! USB.lock(|usb| usb.write(1, &REPORT, None, 0));
//! ```

use core::cell::RefCell;

use cortex_m::interrupt::InterruptNumber;
use cortex_m::peripheral::NVIC;
use log::warn;

use crate::device::{Device, Handler};
use crate::peripheral::PeripheralOps;

/// An interrupt line that can be switched off and on again.
pub trait IrqLine {
    /// Masks the line. Returns whether it was unmasked beforehand.
    fn mask(&self) -> bool;
    fn unmask(&self);
}

/// An NVIC interrupt.
pub struct NvicLine<I>(I);

impl<I: InterruptNumber> NvicLine<I> {
    pub const fn new(irq: I) -> Self {
        Self(irq)
    }
}

impl<I: InterruptNumber> IrqLine for NvicLine<I> {
    fn mask(&self) -> bool {
        let was_enabled = NVIC::is_enabled(self.0);
        NVIC::mask(self.0);
        was_enabled
    }

    fn unmask(&self) {
        // Safety: we only unmask a line that `mask` found enabled, so this
        // can't break a mask-based critical section someone else set up.
        unsafe { NVIC::unmask(self.0) }
    }
}

/// A `Device` reachable from both thread mode and its interrupt handler.
pub struct SharedDevice<'d, L, P, H> {
    line: L,
    device: RefCell<Option<Device<'d, P, H>>>,
}

// Safety: all access to `device` from thread mode happens with the line
// masked, and the ISR is the only other accessor. On a single core the two
// can't overlap, and the `RefCell` catches it if they somehow do.
unsafe impl<L: Sync, P: Send, H: Send> Sync for SharedDevice<'_, L, P, H> {}

impl<'d, L: IrqLine, P: PeripheralOps, H: Handler<'d>> SharedDevice<'d, L, P, H> {
    pub const fn new(line: L) -> Self {
        Self {
            line,
            device: RefCell::new(None),
        }
    }

    /// Puts the device in place. Replaces (and drops) any earlier one.
    pub fn install(&self, device: Device<'d, P, H>) {
        self.lock_raw(|slot| *slot = Some(device));
    }

    /// Runs `body` with the device, with the USB interrupt held off. Returns
    /// `None` if no device has been installed.
    pub fn lock<R>(&self, body: impl FnOnce(&mut Device<'d, P, H>) -> R) -> Option<R> {
        self.lock_raw(|slot| slot.as_mut().map(body)).flatten()
    }

    fn lock_raw<R>(&self, body: impl FnOnce(&mut Option<Device<'d, P, H>>) -> R) -> Option<R> {
        let was_enabled = self.line.mask();
        let result = match self.device.try_borrow_mut() {
            Ok(mut slot) => Some(body(&mut slot)),
            Err(_) => {
                warn!("usb: device locked re-entrantly");
                None
            }
        };
        if was_enabled {
            self.line.unmask();
        }
        result
    }

    pub fn line(&self) -> &L {
        &self.line
    }

    /// Call from the USB interrupt handler.
    pub fn on_interrupt(&self) {
        match self.device.try_borrow_mut() {
            Ok(mut slot) => {
                if let Some(device) = slot.as_mut() {
                    device.interrupt_handler();
                }
            }
            Err(_) => warn!("usb: interrupt while device is in use"),
        }
    }
}
