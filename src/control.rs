// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Standard request handling on endpoint 0.
//!
//! Every request handler here returns `Result<(), Error>`, and any `Err`,
//! whatever the variant, gets the request STALLed. That's the USB way of
//! saying "no": it's not an error in the device and nothing needs cleaning up
//! beyond the STALL itself.
//!
//! Requests we don't recognize as standard go to the application's
//! `Handler::on_unrecognized_request`, and get STALLed if it declines too.

use log::{debug, trace, warn};
use num_traits::FromPrimitive;
use zerocopy::AsBytes;

use crate::descriptor::{self, configuration_header, configuration_total_length, DescriptorType};
use crate::device::{ControlPipe, Device, DeviceState, Handler};
use crate::endpoint::{Callback, Engine, Notify};
use crate::error::{Error, Status};
use crate::peripheral::{DeviceEvents, PeripheralOps};
use crate::setup::{Feature, Recipient, Request, SetupPacket};

/// Endpoint 0, as lent to a request handler for the duration of one request.
struct Pipe<'a, 'd, P> {
    engine: &'a mut Engine<'d, P>,
    /// `wLength` from the SETUP packet.
    length: usize,
}

impl<'a, 'd, P: PeripheralOps> ControlPipe<'d> for Pipe<'a, 'd, P> {
    fn write(
        &mut self,
        data: &'d [u8],
        callback: Option<Callback<'d>>,
        arg: usize,
    ) -> Result<(), Error> {
        let n = data.len().min(self.length);
        self.engine
            .write_reply(0, &data[..n], Notify::from(callback), arg, self.length)
    }

    fn read(
        &mut self,
        data: &'d mut [u8],
        callback: Option<Callback<'d>>,
        arg: usize,
    ) -> Result<(), Error> {
        let n = data.len().min(self.length);
        self.engine.read(0, &mut data[..n], Notify::from(callback), arg)
    }

    fn acknowledge(&mut self) -> Result<(), Error> {
        self.engine.write(0, &[], Notify::Silent, 0)
    }

    fn stall(&mut self) -> Result<(), Error> {
        self.engine.stall(0)
    }
}

/// The configuration blob trimmed to its declared total length.
fn whole_configuration(bytes: &[u8]) -> &[u8] {
    &bytes[..configuration_total_length(bytes).min(bytes.len())]
}

impl<'d, P: PeripheralOps, H: Handler<'d>> Device<'d, P, H> {
    /// Acts on a freshly received SETUP packet.
    pub(crate) fn dispatch(&mut self, setup: &SetupPacket) {
        debug!(
            "setup: type {:02x} req {:02x} value {:04x} index {:04x} len {}",
            setup.request_type,
            setup.request,
            setup.value(),
            setup.index(),
            setup.length(),
        );

        let result = match setup.request() {
            Some(Request::GetStatus) => self.get_status(setup),
            Some(Request::ClearFeature) => self.change_feature(setup, false),
            Some(Request::SetFeature) => self.change_feature(setup, true),
            Some(Request::SetAddress) => self.set_address(setup),
            Some(Request::GetDescriptor) => self.get_descriptor(setup),
            Some(Request::GetConfiguration) => self.get_configuration(setup),
            Some(Request::SetConfiguration) => self.set_configuration(setup),
            Some(Request::GetInterface) => self.get_interface(setup),
            Some(Request::SetInterface) => self.set_interface(setup),
            Some(Request::SetDescriptor) | Some(Request::SynchFrame) | None => self.forward(setup),
        };

        if let Err(e) = result {
            debug!("setup: stalled ({e})");
            if let Some(f) = self.engine.stall_control(0) {
                self.deliver(f);
            }
        }
    }

    fn forward(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        let mut pipe = Pipe {
            engine: &mut self.engine,
            length: usize::from(setup.length()),
        };
        if self.handler.on_unrecognized_request(setup, &mut pipe) {
            Ok(())
        } else {
            Err(Error::Stalled)
        }
    }

    /// Status stage of a request with no data stage.
    fn acknowledge(&mut self) -> Result<(), Error> {
        self.engine.write(0, &[], Notify::Silent, 0)
    }

    /// Data stage of a request answered with one or two bytes.
    fn reply(&mut self, bytes: [u8; 2], len: usize, setup: &SetupPacket) -> Result<(), Error> {
        self.engine
            .write_inline(0, bytes, len.min(usize::from(setup.length())))
    }

    fn self_powered(&self) -> bool {
        configuration_header(self.speed_descriptors().configuration)
            .map(|c| c.is_self_powered())
            .unwrap_or(false)
    }

    fn get_status(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        let status = match setup.recipient() {
            Some(Recipient::Device) => {
                let mut status = 0;
                if self.self_powered() {
                    status |= 1 << 0;
                }
                if self.remote_wakeup {
                    status |= 1 << 1;
                }
                status
            }
            Some(Recipient::Endpoint) => {
                let ep = setup.endpoint_number();
                if usize::from(ep) >= self.engine.count() {
                    return Err(Error::InvalidEndpoint);
                }
                u8::from(self.engine.is_halted(ep))
            }
            _ => return Err(Error::Stalled),
        };
        self.reply([status, 0], 2, setup)
    }

    fn change_feature(&mut self, setup: &SetupPacket, set: bool) -> Result<(), Error> {
        match (setup.feature(), setup.recipient()) {
            (Some(Feature::EndpointHalt), Some(Recipient::Endpoint)) => {
                let ep = setup.endpoint_number();
                if set {
                    if let Some(f) = self.engine.halt(ep)? {
                        self.deliver(f);
                    }
                } else {
                    self.engine.unhalt(ep)?;
                }
                self.acknowledge()
            }
            (Some(Feature::DeviceRemoteWakeup), Some(Recipient::Device)) => {
                self.remote_wakeup = set;
                debug!("usb: remote wakeup {}", if set { "enabled" } else { "disabled" });
                self.acknowledge()
            }
            (Some(Feature::TestMode), Some(Recipient::Device)) if set => {
                if !self.is_high_speed() || setup.index() & 0xFF != 0 {
                    return Err(Error::Stalled);
                }
                let mode = setup.test_selector().ok_or(Error::Stalled)?;
                self.acknowledge()?;
                // Entered once the status stage is done.
                self.pending_test_mode = Some(mode);
                Ok(())
            }
            _ => Err(Error::Stalled),
        }
    }

    fn set_address(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        // Behavior here is unspecified for a configured device; refuse.
        if self.state == DeviceState::Configured {
            return Err(Error::InvalidState);
        }
        let address = (setup.value() & 0x7F) as u8;
        // The host expects the status stage from our _old_ address, so the
        // new one takes effect later, in the interrupt front-end.
        self.acknowledge()?;
        self.pending_address = Some(address);
        self.address_frames = 0;
        self.engine
            .ops_mut()
            .enable_interrupts(DeviceEvents::START_OF_FRAME);
        Ok(())
    }

    fn get_descriptor(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        // Class descriptors (HID reports and such) are asked for with an
        // interface recipient.
        if setup.recipient() != Some(Recipient::Device) {
            return self.forward(setup);
        }

        let speed = self.speed_descriptors();
        let index = setup.descriptor_index();
        let data: &'d [u8] = match DescriptorType::from_u8(setup.descriptor_type()) {
            Some(DescriptorType::Device) => speed.device.as_bytes(),
            Some(DescriptorType::Configuration) => {
                if index != 0 {
                    return Err(Error::Stalled);
                }
                whole_configuration(speed.configuration)
            }
            Some(DescriptorType::DeviceQualifier) => {
                speed.qualifier.ok_or(Error::Stalled)?.as_bytes()
            }
            Some(DescriptorType::OtherSpeedConfiguration) => {
                if index != 0 {
                    return Err(Error::Stalled);
                }
                whole_configuration(speed.other_speed_configuration.ok_or(Error::Stalled)?)
            }
            Some(DescriptorType::String) => self.descriptors.string(index).ok_or(Error::Stalled)?,
            _ => return self.forward(setup),
        };

        let len = data.len().min(usize::from(setup.length()));
        trace!("descriptor {:02x}/{index}: {len} of {} bytes", setup.descriptor_type(), data.len());
        self.engine
            .write_reply(0, &data[..len], Notify::Silent, 0, usize::from(setup.length()))
    }

    fn get_configuration(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        self.reply([self.configuration, 0], 1, setup)
    }

    fn set_configuration(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        if !matches!(self.state, DeviceState::Addressed | DeviceState::Configured) {
            return Err(Error::InvalidState);
        }
        // The configuration value is the low byte. Anything in the high byte
        // names a configuration we can't have.
        let value = u8::try_from(setup.value()).map_err(|_| Error::Stalled)?;
        let configuration = self.speed_descriptors().configuration;
        let header = configuration_header(configuration).ok_or(Error::Stalled)?;
        if value != 0 && value != header.configuration_value {
            return Err(Error::Stalled);
        }

        // Whatever was running belongs to the old configuration.
        for ep in 1..self.engine.count() as u8 {
            if let Some(f) = self.engine.disable(ep, Status::Aborted) {
                self.deliver(f);
            }
        }
        if let Some(settings) = self.alternate_settings.as_deref_mut() {
            settings.fill(0);
        }

        self.configuration = value;
        if value == 0 {
            self.state = DeviceState::Addressed;
            self.engine.ops_mut().set_configured(false);
        } else {
            self.configure_interfaces(configuration, None);
            self.state = DeviceState::Configured;
            self.engine.ops_mut().set_configured(true);
        }
        debug!("usb: configuration {value}");

        self.acknowledge()?;
        self.handler.on_configuration_changed(value);
        Ok(())
    }

    /// Configures the endpoints of each interface's selected alternate
    /// setting, or only those of interface `only`.
    fn configure_interfaces(&mut self, configuration: &'d [u8], only: Option<u8>) {
        let mut current = None;
        for d in descriptor::sub_descriptors(configuration) {
            if let Some(i) = d.interface() {
                current = Some((i.interface_number, i.alternate_setting));
                continue;
            }
            let (Some(e), Some((interface, alternate))) = (d.endpoint(), current) else {
                continue;
            };
            if only.map_or(false, |o| o != interface)
                || alternate != self.alternate_setting(interface).unwrap_or(0)
            {
                continue;
            }
            match self.engine.configure(e.number(), Some(e)) {
                Ok(Some(f)) => self.deliver(f),
                Ok(None) => (),
                Err(err) => warn!("interface {interface}: endpoint {:02x}: {err}", e.endpoint_address),
            }
        }
    }

    /// Disables every endpoint any alternate setting of `interface` uses.
    fn release_interface(&mut self, configuration: &'d [u8], interface: u8) {
        let mut current = None;
        for d in descriptor::sub_descriptors(configuration) {
            if let Some(i) = d.interface() {
                current = Some(i.interface_number);
            } else if let (Some(e), Some(n)) = (d.endpoint(), current) {
                if n == interface && e.number() != 0 {
                    if let Some(f) = self.engine.disable(e.number(), Status::Aborted) {
                        self.deliver(f);
                    }
                }
            }
        }
    }

    fn get_interface(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        let setting = self
            .alternate_setting(setup.interface_number())
            .ok_or(Error::Stalled)?;
        if self.state != DeviceState::Configured {
            return Err(Error::InvalidState);
        }
        self.reply([setting, 0], 1, setup)
    }

    fn set_interface(&mut self, setup: &SetupPacket) -> Result<(), Error> {
        let interface = setup.interface_number();
        let setting = u8::try_from(setup.value()).map_err(|_| Error::Stalled)?;
        let current = self.alternate_setting(interface).ok_or(Error::Stalled)?;
        if self.state != DeviceState::Configured {
            return Err(Error::InvalidState);
        }
        let configuration = self.speed_descriptors().configuration;
        let declared = descriptor::sub_descriptors(configuration)
            .filter_map(|d| d.interface())
            .any(|i| i.interface_number == interface && i.alternate_setting == setting);
        if !declared {
            return Err(Error::Stalled);
        }

        if current == setting {
            return self.acknowledge();
        }

        self.release_interface(configuration, interface);
        if let Some(slot) = self
            .alternate_settings
            .as_deref_mut()
            .and_then(|s| s.get_mut(usize::from(interface)))
        {
            *slot = setting;
        }
        self.configure_interfaces(configuration, Some(interface));
        debug!("usb: interface {interface} setting {setting}");

        self.acknowledge()?;
        self.handler.on_interface_setting_changed(interface, setting);
        Ok(())
    }
}
