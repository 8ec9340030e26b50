// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Turning controller interrupts into state changes.
//!
//! `interrupt_handler` is meant to be called from the USB ISR (or from a
//! polling loop, it doesn't care). Each pass through its loop handles exactly
//! one source, in a fixed priority order:
//!
//! 1. End of bus reset. This trumps everything, since it invalidates every
//!    other piece of state we have.
//! 2. Suspend, then resume.
//! 3. The lowest-numbered endpoint with something pending.
//! 4. The lowest-numbered finished DMA channel.
//! 5. Start-of-frame, which we only listen to while a `SET_ADDRESS` is
//!    waiting for its status stage.
//!
//! ...and goes back around until nothing is pending, or until it has handled
//! `Config::max_events_per_interrupt` events, at which point it gives up and
//! lets the interrupt fire again. That's better than wedging the CPU if the
//! hardware keeps a flag asserted that we failed to clear.

use log::{debug, trace, warn};

use crate::descriptor::Direction;
use crate::device::{Device, DeviceState, Handler};
use crate::endpoint::{Finished, Notify};
use crate::error::Status;
use crate::peripheral::{DeviceEvents, EndpointEvents, PeripheralOps};
use crate::setup::SetupPacket;

impl<'d, P: PeripheralOps, H: Handler<'d>> Device<'d, P, H> {
    /// Services whatever the controller is asking for.
    pub fn interrupt_handler(&mut self) {
        let limit = self.config.max_events_per_interrupt.max(1);
        for _ in 0..limit {
            let pending = self.engine.ops().pending();
            if pending.is_empty() {
                return;
            }

            if pending.device.contains(DeviceEvents::END_OF_RESET) {
                self.on_bus_reset();
            } else if pending.device.contains(DeviceEvents::SUSPEND) {
                self.on_suspend();
            } else if pending.device.contains(DeviceEvents::RESUME) {
                self.on_resume();
            } else if pending.endpoints != 0 {
                self.on_endpoint(pending.endpoints.trailing_zeros() as u8);
            } else if pending.dma != 0 {
                let ep = pending.dma.trailing_zeros() as u8;
                if let Some(f) = self.engine.on_dma_complete(ep) {
                    self.finished(f, false);
                }
            } else if pending.device.contains(DeviceEvents::START_OF_FRAME) {
                self.on_start_of_frame();
            } else {
                warn!("usb: unexpected events {:?}", pending.device);
                self.engine.ops_mut().clear(pending.device);
                return;
            }
        }

        if !self.engine.ops().pending().is_empty() {
            warn!("usb: still busy after {limit} events, deferring");
        }
    }

    fn on_bus_reset(&mut self) {
        let ops = self.engine.ops_mut();
        if self.state == DeviceState::Suspended {
            // A reset is also a way out of suspend, and the clocks have to be
            // running for anything below to stick.
            ops.resume();
            ops.disable_interrupts(DeviceEvents::RESUME);
        }
        ops.clear(DeviceEvents::END_OF_RESET);

        self.abort_all();
        let ops = self.engine.ops_mut();
        ops.set_configured(false);
        ops.set_address(0);
        self.configuration = 0;
        self.remote_wakeup = false;
        if let Some(settings) = self.alternate_settings.as_deref_mut() {
            settings.fill(0);
        }

        let ep0 = self.ep0_descriptor();
        match self.engine.configure(0, Some(&ep0)) {
            Ok(Some(f)) => self.deliver(f),
            Ok(None) => (),
            Err(e) => warn!("usb: can't configure ep0: {e}"),
        }

        self.state = DeviceState::Default;
        self.engine
            .ops_mut()
            .enable_interrupts(DeviceEvents::SUSPEND);
        debug!(
            "usb: bus reset, {} speed",
            if self.is_high_speed() { "high" } else { "full" }
        );
        self.handler.on_reset();
    }

    fn on_suspend(&mut self) {
        self.engine.ops_mut().clear(DeviceEvents::SUSPEND);
        // Before we've been powered up there's nothing to save, and a second
        // suspend while suspended means nothing.
        if self.state < DeviceState::Powered {
            return;
        }
        self.previous_state = self.state;
        self.state = DeviceState::Suspended;

        let ops = self.engine.ops_mut();
        ops.disable_interrupts(DeviceEvents::SUSPEND);
        ops.enable_interrupts(DeviceEvents::RESUME);
        ops.suspend();
        debug!("usb: suspended from {:?}", self.previous_state);
        self.handler.on_suspended();
    }

    fn on_resume(&mut self) {
        let suspended = self.state == DeviceState::Suspended;
        let ops = self.engine.ops_mut();
        if suspended {
            // Clocks back on first, or the flag won't clear.
            ops.resume();
        }
        ops.clear(DeviceEvents::RESUME);
        ops.disable_interrupts(DeviceEvents::RESUME);
        if !suspended {
            return;
        }
        // The controller keeps flagging suspend while we sleep. Those are
        // stale now.
        ops.clear(DeviceEvents::SUSPEND);
        ops.enable_interrupts(DeviceEvents::SUSPEND);

        self.state = self.previous_state;
        debug!("usb: resumed to {:?}", self.state);
        self.handler.on_resumed();
    }

    fn on_start_of_frame(&mut self) {
        self.engine.ops_mut().clear(DeviceEvents::START_OF_FRAME);
        let Some(address) = self.pending_address else {
            self.engine
                .ops_mut()
                .disable_interrupts(DeviceEvents::START_OF_FRAME);
            return;
        };
        self.address_frames = self.address_frames.saturating_add(1);
        if self.address_frames >= self.config.set_address_timeout_frames {
            // The host never collected the status stage, or we missed it.
            // Either way it's talking to the new address by now.
            warn!(
                "usb: SET_ADDRESS({address}) status stage timed out after {} frames",
                self.address_frames,
            );
            self.pending_address = None;
            self.apply_address(address);
        }
    }

    fn apply_address(&mut self, address: u8) {
        let ops = self.engine.ops_mut();
        ops.set_address(address);
        ops.disable_interrupts(DeviceEvents::START_OF_FRAME);
        self.state = if address == 0 {
            DeviceState::Default
        } else {
            DeviceState::Addressed
        };
        debug!("usb: address {address}");
    }

    fn on_endpoint(&mut self, ep: u8) {
        let events = self.engine.ops().endpoint_events(ep);
        trace!("ep{ep}: {events:?}");

        if events.contains(EndpointEvents::IN_COMPLETE) {
            if let Some(f) = self.engine.on_in_complete(ep) {
                self.finished(f, false);
            }
        }
        if events.contains(EndpointEvents::OUT_RECEIVED) {
            if let Some(f) = self.engine.on_out_received(ep) {
                self.finished(f, false);
            }
        }
        if events.contains(EndpointEvents::STALL_SENT) {
            self.engine.on_stall_sent(ep);
        }
        if events.contains(EndpointEvents::SETUP) {
            self.on_setup(ep);
        }
    }

    fn on_setup(&mut self, ep: u8) {
        // Take the packet out of the FIFO first. Cancelling a pending IN below
        // may flush the endpoint's FIFO, and the SETUP bytes with it.
        let setup = SetupPacket::from_bytes(self.engine.ops_mut().read_setup(ep));

        // A new SETUP means the host is done with the previous request, even
        // if we never saw it say so.
        if let Some(f) = self.engine.force_complete(ep) {
            self.finished(f, true);
        }

        let ops = self.engine.ops_mut();
        if ops.is_stalled(ep) {
            ops.clear_stall(ep);
        }
        // The direction has to be set while the SETUP flag is still up, or
        // the hardware may take the first data-stage token the wrong way.
        ops.set_control_direction(ep, setup.direction());
        ops.ack_setup(ep);

        if ep != 0 {
            warn!("ep{ep}: SETUP on a control endpoint we don't run requests on");
            if let Some(f) = self.engine.stall_control(ep) {
                self.deliver(f);
            }
            return;
        }
        self.dispatch(&setup);
    }

    /// Routes a finished transfer. Endpoint 0 transfers may carry actions that
    /// wait on their status stage.
    fn finished(&mut self, f: Finished<'d>, forced: bool) {
        if f.completion.endpoint == 0 {
            self.control_finished(f, forced);
        } else {
            self.deliver(f);
        }
    }

    fn control_finished(&mut self, f: Finished<'d>, forced: bool) {
        let status = f.completion.status;
        let direction = f.completion.direction;

        if status != Status::Success {
            self.clear_pending_actions();
            self.deliver(f);
            return;
        }

        match direction {
            Direction::In => {
                if let Some(address) = self.pending_address.take() {
                    self.apply_address(address);
                } else if let Some(mode) = self.pending_test_mode.take() {
                    self.deliver(f);
                    debug!("usb: entering test mode {mode:?}");
                    self.engine.ops_mut().enter_test_mode(mode);
                    return;
                }
            }
            Direction::Out if !forced => {
                // End of a control write's data stage. Send the status stage
                // for it.
                if let Err(e) = self.engine.write(0, &[], Notify::Silent, 0) {
                    warn!("ep0: can't send status stage: {e}");
                }
            }
            Direction::Out => (),
        }
        self.deliver(f);
    }
}
