// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device-level state, and the API the rest of the firmware talks to.
//!
//! A `Device` owns the peripheral (through the transfer engine), the
//! descriptor set, and the application's `Handler`. The methods here are the
//! ones the application calls; the request dispatcher and the interrupt
//! front-end add more `impl` blocks in their own modules.
//!
//! Nothing here masks interrupts. If the device is shared with an interrupt
//! handler, wrap it in a [`SharedDevice`](crate::shared::SharedDevice), which
//! does.

use log::{debug, warn};

use crate::config::Config;
use crate::descriptor::{DescriptorSet, EndpointDescriptor, SpeedDescriptors};
use crate::endpoint::{Callback, Completion, Engine, EndpointState, Finished, Notify, Progress};
use crate::error::{Error, Status};
use crate::peripheral::{DeviceEvents, PeripheralOps};
use crate::setup::{SetupPacket, TestMode};

/// USB chapter 9 device states, in order of how far through enumeration they
/// are.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    Suspended,
    Attached,
    Powered,
    Default,
    Addressed,
    Configured,
}

/// The pieces of endpoint 0 a class or vendor request handler gets to use.
pub trait ControlPipe<'d> {
    /// Sends the data stage of a control read. Lengths beyond what the host
    /// asked for are trimmed.
    fn write(
        &mut self,
        data: &'d [u8],
        callback: Option<Callback<'d>>,
        arg: usize,
    ) -> Result<(), Error>;
    /// Receives the data stage of a control write. The status stage is sent
    /// automatically once the buffer fills or the host sends a short packet.
    fn read(
        &mut self,
        data: &'d mut [u8],
        callback: Option<Callback<'d>>,
        arg: usize,
    ) -> Result<(), Error>;
    /// Completes a request that has no data stage.
    fn acknowledge(&mut self) -> Result<(), Error>;
    fn stall(&mut self) -> Result<(), Error>;
}

/// Application hooks. Every method has a do-nothing default. All of them run
/// in interrupt context.
pub trait Handler<'d> {
    /// The host reset the bus. Every transfer has been aborted.
    fn on_reset(&mut self) {}
    fn on_suspended(&mut self) {}
    fn on_resumed(&mut self) {}
    /// `SET_CONFIGURATION` succeeded. Zero means unconfigured.
    fn on_configuration_changed(&mut self, _configuration: u8) {}
    /// `SET_INTERFACE` selected a different alternate setting.
    fn on_interface_setting_changed(&mut self, _interface: u8, _setting: u8) {}
    /// A request the stack doesn't handle itself: class and vendor requests,
    /// requests to interfaces, class descriptors, and so on. Return `true` if
    /// you dealt with it (including by stalling it yourself); `false` gets it
    /// STALLed.
    fn on_unrecognized_request(
        &mut self,
        _setup: &SetupPacket,
        _pipe: &mut dyn ControlPipe<'d>,
    ) -> bool {
        false
    }
    /// A transfer started without a callback function finished.
    fn on_transfer_complete(&mut self, _completion: Completion<'d>) {}
}

/// For devices that only need the standard requests.
impl Handler<'_> for () {}

/// A USB device built on peripheral `P`.
pub struct Device<'d, P, H> {
    pub(crate) engine: Engine<'d, P>,
    pub(crate) handler: H,
    pub(crate) descriptors: DescriptorSet<'d>,
    /// One active alternate setting per interface, if the application wants
    /// alternate settings supported.
    pub(crate) alternate_settings: Option<&'d mut [u8]>,
    pub(crate) config: Config,

    pub(crate) state: DeviceState,
    /// Where to go back to on resume.
    pub(crate) previous_state: DeviceState,
    pub(crate) configuration: u8,
    pub(crate) remote_wakeup: bool,

    /// Set by `SET_ADDRESS`, applied after its status stage.
    pub(crate) pending_address: Option<u8>,
    /// Start-of-frame intervals seen while `pending_address` was set.
    pub(crate) address_frames: u16,
    /// Set by `SET_FEATURE(TEST_MODE)`, entered after its status stage.
    pub(crate) pending_test_mode: Option<TestMode>,
}

impl<'d, P: PeripheralOps, H: Handler<'d>> Device<'d, P, H> {
    pub fn new(
        peripheral: P,
        descriptors: DescriptorSet<'d>,
        handler: H,
        alternate_settings: Option<&'d mut [u8]>,
        config: Config,
    ) -> Self {
        if let Err(e) = descriptors.validate() {
            warn!("descriptor set: {e}");
        }
        Self {
            engine: Engine::new(peripheral),
            handler,
            descriptors,
            alternate_settings,
            config,
            state: DeviceState::Attached,
            previous_state: DeviceState::Attached,
            configuration: 0,
            remote_wakeup: false,
            pending_address: None,
            address_frames: 0,
            pending_test_mode: None,
        }
    }

    /// Powers up the controller and arms the bus-level interrupts. The host
    /// can't see us until `connect`.
    pub fn init(&mut self) {
        let ops = self.engine.ops_mut();
        ops.init();
        ops.enable_interrupts(DeviceEvents::END_OF_RESET | DeviceEvents::SUSPEND);
        self.state = DeviceState::Powered;
        debug!("usb: powered");
    }

    /// Turns on the pull-up.
    pub fn connect(&mut self) {
        self.engine.ops_mut().attach();
        debug!("usb: connected");
    }

    /// Turns off the pull-up and tears everything down, as if the cable had
    /// been pulled.
    pub fn disconnect(&mut self) {
        self.engine.ops_mut().detach();
        self.abort_all();
        self.engine.ops_mut().set_configured(false);
        self.engine.ops_mut().set_address(0);
        self.configuration = 0;
        self.remote_wakeup = false;
        if self.state != DeviceState::Attached {
            self.state = DeviceState::Powered;
        }
        debug!("usb: disconnected");
    }

    /// Configures the endpoint named by `descriptor`, or endpoint 0 with the
    /// packet size from the device descriptor if there isn't one.
    pub fn configure_endpoint(
        &mut self,
        descriptor: Option<&EndpointDescriptor>,
    ) -> Result<(), Error> {
        let finished = match descriptor {
            Some(d) => self.engine.configure(d.number(), Some(d))?,
            None => {
                let ep0 = self.ep0_descriptor();
                self.engine.configure(0, Some(&ep0))?
            }
        };
        if let Some(f) = finished {
            self.deliver(f);
        }
        Ok(())
    }

    /// Starts sending `data` on `ep`. The completion goes to `callback` if
    /// there is one, and to the handler's `on_transfer_complete` if not.
    pub fn write(
        &mut self,
        ep: u8,
        data: &'d [u8],
        callback: Option<Callback<'d>>,
        arg: usize,
    ) -> Result<(), Error> {
        self.engine.write(ep, data, Notify::from(callback), arg)
    }

    /// Starts receiving into `data` on `ep`. The transfer ends when `data` is
    /// full or the host sends a short packet.
    pub fn read(
        &mut self,
        ep: u8,
        data: &'d mut [u8],
        callback: Option<Callback<'d>>,
        arg: usize,
    ) -> Result<(), Error> {
        self.engine.read(ep, data, Notify::from(callback), arg)
    }

    pub fn stall(&mut self, ep: u8) -> Result<(), Error> {
        self.engine.stall(ep)
    }

    pub fn halt(&mut self, ep: u8) -> Result<(), Error> {
        if let Some(f) = self.engine.halt(ep)? {
            self.deliver(f);
        }
        Ok(())
    }

    pub fn unhalt(&mut self, ep: u8) -> Result<(), Error> {
        self.engine.unhalt(ep)
    }

    pub fn is_halted(&self, ep: u8) -> bool {
        self.engine.is_halted(ep)
    }

    /// Signals resume to the host. Only allowed while suspended, and only if
    /// the host enabled it.
    pub fn remote_wakeup(&mut self) -> Result<(), Error> {
        if self.state != DeviceState::Suspended || !self.remote_wakeup {
            return Err(Error::InvalidState);
        }
        let ops = self.engine.ops_mut();
        ops.resume();
        ops.remote_wakeup();
        debug!("usb: remote wakeup");
        Ok(())
    }

    pub fn current_state(&self) -> DeviceState {
        self.state
    }

    pub fn is_high_speed(&self) -> bool {
        self.engine.ops().is_high_speed()
    }

    /// Active configuration value, 0 if unconfigured.
    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    pub fn remote_wakeup_enabled(&self) -> bool {
        self.remote_wakeup
    }

    pub fn endpoint_state(&self, ep: u8) -> EndpointState {
        self.engine.state(ep)
    }

    /// Packet size the endpoint was configured with.
    pub fn max_packet_size(&self, ep: u8) -> Option<u16> {
        self.engine.max_packet(ep)
    }

    pub fn transfer_progress(&self, ep: u8) -> Option<Progress> {
        self.engine.progress(ep)
    }

    pub fn alternate_setting(&self, interface: u8) -> Option<u8> {
        self.alternate_settings
            .as_deref()
            .and_then(|s| s.get(usize::from(interface)).copied())
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn peripheral(&self) -> &P {
        self.engine.ops()
    }

    pub fn peripheral_mut(&mut self) -> &mut P {
        self.engine.ops_mut()
    }

    /// Descriptors for the speed we're running at.
    pub(crate) fn speed_descriptors(&self) -> SpeedDescriptors<'d> {
        self.descriptors.for_speed(self.is_high_speed())
    }

    pub(crate) fn ep0_descriptor(&self) -> EndpointDescriptor {
        EndpointDescriptor::control(u16::from(self.speed_descriptors().device.max_packet_size0))
    }

    /// Disables every endpoint, delivering `Aborted` for anything in flight.
    pub(crate) fn abort_all(&mut self) {
        for ep in 0..self.engine.count() as u8 {
            if let Some(f) = self.engine.disable(ep, Status::Aborted) {
                self.deliver(f);
            }
        }
        self.clear_pending_actions();
    }

    pub(crate) fn clear_pending_actions(&mut self) {
        if self.pending_address.take().is_some() {
            self.engine.ops_mut().disable_interrupts(DeviceEvents::START_OF_FRAME);
        }
        self.pending_test_mode = None;
    }

    /// Hands a finished transfer's completion to whoever asked for it.
    pub(crate) fn deliver(&mut self, finished: Finished<'d>) {
        match finished.notify {
            Notify::Silent => (),
            Notify::Handler => self.handler.on_transfer_complete(finished.completion),
            Notify::Callback(cb) => cb(finished.completion),
        }
    }
}
