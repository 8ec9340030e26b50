// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A software USB controller, plus just enough of a host to drive it.
//!
//! `SimPeripheral` implements `PeripheralOps` with plain data structures, and
//! adds "host side" methods (`setup`, `host_in`, `host_out`, `bus_reset`...)
//! that raise the same flags real hardware would. A test pokes the host side,
//! calls `interrupt_handler`, and looks at what happened.
//!
//! The sim is strict where it's cheap to be: loading more packets than an
//! endpoint has banks, or committing a bank that was never loaded, panics.

#![allow(dead_code)]

use std::collections::VecDeque;

use samusb_device::descriptor::{
    DescriptorType, DeviceDescriptor, DeviceQualifierDescriptor, Direction, SpeedDescriptors,
};
use samusb_device::peripheral::{
    Capabilities, DeviceEvents, EndpointConfig, EndpointEvents, Pending, PeripheralOps,
};
use samusb_device::setup::{RequestKind, TestMode};
use samusb_device::{
    Completion, Config, ControlPipe, DescriptorSet, Device, Handler, SetupPacket,
};
use zerocopy::U16;

pub fn start_log() {
    let _ = env_logger::Builder::new()
        .filter(None, log::LevelFilter::Trace)
        .is_test(true)
        .try_init();
}

pub const EP0_SIZE: usize = 64;

#[derive(Debug)]
pub struct SimDma {
    pub direction: Direction,
    pub addr: *mut u8,
    pub len: usize,
    pub moved: usize,
    pub done: bool,
}

#[derive(Debug)]
pub struct SimEndpoint {
    pub caps: Capabilities,
    pub config: Option<EndpointConfig>,
    pub listening: EndpointEvents,
    pub flags: EndpointEvents,
    pub stalled: bool,
    pub setup: Option<[u8; 8]>,
    pub control_direction: Option<Direction>,
    /// Written into a bank but not handed to the hardware.
    pub loaded: VecDeque<Vec<u8>>,
    /// Handed to the hardware, waiting for an IN token.
    pub committed: VecDeque<Vec<u8>>,
    /// Received from the host, not yet released.
    pub out_banks: VecDeque<Vec<u8>>,
    pub dma: Option<SimDma>,
    pub resets: usize,
}

impl SimEndpoint {
    fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            config: None,
            listening: EndpointEvents::empty(),
            flags: EndpointEvents::empty(),
            stalled: false,
            setup: None,
            control_direction: None,
            loaded: VecDeque::new(),
            committed: VecDeque::new(),
            out_banks: VecDeque::new(),
            dma: None,
            resets: 0,
        }
    }

    fn max_packet(&self) -> usize {
        self.config
            .map(|c| usize::from(c.max_packet))
            .unwrap_or(EP0_SIZE)
    }
}

/// What the host got back for an IN token.
#[derive(Debug, PartialEq, Eq)]
pub enum HostIn {
    Data(Vec<u8>),
    Nak,
    Stall,
}

/// What the host got back for an OUT packet.
#[derive(Debug, PartialEq, Eq)]
pub enum HostOut {
    Ack,
    Nak,
    Stall,
}

#[derive(Debug)]
pub struct SimPeripheral {
    pub endpoints: Vec<SimEndpoint>,
    pub high_speed: bool,
    pub enabled: DeviceEvents,
    pub asserted: DeviceEvents,
    pub initialized: bool,
    pub attached: bool,
    pub address: u8,
    pub configured: bool,
    pub suspended: bool,
    pub wakeups: usize,
}

impl SimPeripheral {
    /// Endpoint 0 is 64 bytes single-banked, 1-3 are double-banked FIFO
    /// endpoints, and 4-5 have DMA.
    pub fn new() -> Self {
        let mut endpoints = vec![SimEndpoint::new(Capabilities {
            max_packet: 64,
            banks: 1,
            dma: false,
        })];
        for ep in 1..6 {
            endpoints.push(SimEndpoint::new(Capabilities {
                max_packet: 512,
                banks: 2,
                dma: ep >= 4,
            }));
        }
        Self {
            endpoints,
            high_speed: false,
            enabled: DeviceEvents::empty(),
            asserted: DeviceEvents::empty(),
            initialized: false,
            attached: false,
            address: 0,
            configured: false,
            suspended: false,
            wakeups: 0,
        }
    }

    fn ep(&mut self, ep: u8) -> &mut SimEndpoint {
        &mut self.endpoints[usize::from(ep)]
    }

    // Host side.

    pub fn bus_reset(&mut self) {
        self.asserted |= DeviceEvents::END_OF_RESET;
    }

    pub fn bus_suspend(&mut self) {
        self.asserted |= DeviceEvents::SUSPEND;
    }

    pub fn bus_resume(&mut self) {
        self.asserted |= DeviceEvents::RESUME;
    }

    pub fn start_of_frame(&mut self) {
        self.asserted |= DeviceEvents::START_OF_FRAME;
    }

    pub fn setup(&mut self, ep: u8, packet: [u8; 8]) {
        let e = self.ep(ep);
        e.setup = Some(packet);
        e.flags |= EndpointEvents::SETUP;
    }

    pub fn host_in(&mut self, ep: u8) -> HostIn {
        let e = self.ep(ep);
        if e.stalled {
            e.flags |= EndpointEvents::STALL_SENT;
            return HostIn::Stall;
        }
        let mps = e.max_packet();
        if let Some(dma) = e.dma.as_mut().filter(|d| d.direction == Direction::In && !d.done) {
            let n = (dma.len - dma.moved).min(mps);
            // Safety: the stack promised the buffer stays put until
            // dma_finish.
            let packet =
                unsafe { std::slice::from_raw_parts(dma.addr.add(dma.moved), n) }.to_vec();
            dma.moved += n;
            if dma.moved == dma.len {
                dma.done = true;
            }
            return HostIn::Data(packet);
        }
        match e.committed.pop_front() {
            Some(packet) => {
                e.flags |= EndpointEvents::IN_COMPLETE;
                HostIn::Data(packet)
            }
            None => HostIn::Nak,
        }
    }

    pub fn host_out(&mut self, ep: u8, data: &[u8]) -> HostOut {
        let e = self.ep(ep);
        if e.stalled {
            e.flags |= EndpointEvents::STALL_SENT;
            return HostOut::Stall;
        }
        let mps = e.max_packet();
        if let Some(dma) = e.dma.as_mut().filter(|d| d.direction == Direction::Out && !d.done) {
            let n = (dma.len - dma.moved).min(data.len());
            // Safety: as in host_in.
            unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), dma.addr.add(dma.moved), n) };
            dma.moved += n;
            if data.len() < mps || dma.moved == dma.len {
                dma.done = true;
            }
            return HostOut::Ack;
        }
        if e.out_banks.len() >= usize::from(e.caps.banks) {
            return HostOut::Nak;
        }
        e.out_banks.push_back(data.to_vec());
        e.flags |= EndpointEvents::OUT_RECEIVED;
        HostOut::Ack
    }
}

impl PeripheralOps for SimPeripheral {
    fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    fn capabilities(&self, ep: u8) -> Capabilities {
        self.endpoints[usize::from(ep)].caps
    }

    fn init(&mut self) {
        self.initialized = true;
    }

    fn attach(&mut self) {
        self.attached = true;
    }

    fn detach(&mut self) {
        self.attached = false;
    }

    fn set_address(&mut self, address: u8) {
        self.address = address;
    }

    fn set_configured(&mut self, configured: bool) {
        self.configured = configured;
    }

    fn suspend(&mut self) {
        self.suspended = true;
    }

    fn resume(&mut self) {
        self.suspended = false;
    }

    fn remote_wakeup(&mut self) {
        self.wakeups += 1;
    }

    fn is_high_speed(&self) -> bool {
        self.high_speed
    }

    fn enter_test_mode(&mut self, mode: TestMode) -> ! {
        panic!("entered test mode {mode:?}");
    }

    fn enable_interrupts(&mut self, events: DeviceEvents) {
        self.enabled |= events;
    }

    fn disable_interrupts(&mut self, events: DeviceEvents) {
        self.enabled &= !events;
    }

    fn pending(&self) -> Pending {
        let mut endpoints = 0;
        let mut dma = 0;
        for (i, _) in self.endpoints.iter().enumerate() {
            if !self.endpoint_events(i as u8).is_empty() {
                endpoints |= 1 << i;
            }
            if self.endpoints[i].dma.as_ref().map_or(false, |d| d.done) {
                dma |= 1 << i;
            }
        }
        Pending {
            device: self.asserted & self.enabled,
            endpoints,
            dma,
        }
    }

    fn clear(&mut self, events: DeviceEvents) {
        self.asserted &= !events;
    }

    fn endpoint_reset(&mut self, ep: u8) {
        let e = self.ep(ep);
        e.loaded.clear();
        e.committed.clear();
        e.out_banks.clear();
        e.flags &= !(EndpointEvents::IN_COMPLETE | EndpointEvents::OUT_RECEIVED);
        e.resets += 1;
    }

    // Neither of these touches the stall bit. It lives in the status
    // register, which reconfiguring leaves as it was.
    fn endpoint_configure(&mut self, ep: u8, config: &EndpointConfig) {
        self.ep(ep).config = Some(*config);
    }

    fn endpoint_disable(&mut self, ep: u8) {
        let e = self.ep(ep);
        e.config = None;
        e.listening = EndpointEvents::empty();
        e.loaded.clear();
        e.committed.clear();
        e.out_banks.clear();
    }

    fn endpoint_listen(&mut self, ep: u8, events: EndpointEvents) {
        self.ep(ep).listening |= events;
    }

    fn endpoint_unlisten(&mut self, ep: u8, events: EndpointEvents) {
        self.ep(ep).listening &= !events;
    }

    fn endpoint_events(&self, ep: u8) -> EndpointEvents {
        let e = &self.endpoints[usize::from(ep)];
        e.flags & e.listening
    }

    fn set_stall(&mut self, ep: u8) {
        self.ep(ep).stalled = true;
    }

    fn clear_stall(&mut self, ep: u8) {
        self.ep(ep).stalled = false;
    }

    fn is_stalled(&self, ep: u8) -> bool {
        self.endpoints[usize::from(ep)].stalled
    }

    fn ack_stall_sent(&mut self, ep: u8) {
        self.ep(ep).flags &= !EndpointEvents::STALL_SENT;
    }

    fn read_setup(&mut self, ep: u8) -> [u8; 8] {
        self.ep(ep).setup.expect("read_setup with no SETUP")
    }

    fn set_control_direction(&mut self, ep: u8, direction: Direction) {
        let e = self.ep(ep);
        assert!(
            e.flags.contains(EndpointEvents::SETUP),
            "direction set after SETUP was acknowledged"
        );
        e.control_direction = Some(direction);
    }

    fn ack_setup(&mut self, ep: u8) {
        let e = self.ep(ep);
        e.flags &= !EndpointEvents::SETUP;
        e.setup = None;
    }

    fn write_fifo(&mut self, ep: u8, data: &[u8]) {
        let e = self.ep(ep);
        assert!(data.len() <= e.max_packet(), "packet larger than endpoint");
        assert!(
            e.loaded.len() + e.committed.len() < usize::from(e.caps.banks),
            "ep{ep}: no free bank"
        );
        e.loaded.push_back(data.to_vec());
    }

    fn commit_in(&mut self, ep: u8) {
        let e = self.ep(ep);
        let packet = e.loaded.pop_front().expect("commit with nothing loaded");
        e.committed.push_back(packet);
    }

    fn ack_in_complete(&mut self, ep: u8) {
        self.ep(ep).flags &= !EndpointEvents::IN_COMPLETE;
    }

    fn cancel_in(&mut self, ep: u8) {
        let e = self.ep(ep);
        e.loaded.clear();
        e.committed.clear();
        e.flags &= !EndpointEvents::IN_COMPLETE;
        // Flushing the FIFO takes an unread SETUP packet with it, as an
        // endpoint reset does on the UDP.
        if let Some(setup) = e.setup.as_mut() {
            *setup = [0; 8];
        }
    }

    fn out_byte_count(&self, ep: u8) -> usize {
        self.endpoints[usize::from(ep)]
            .out_banks
            .front()
            .map_or(0, |b| b.len())
    }

    fn read_fifo(&mut self, ep: u8, buf: &mut [u8]) {
        let bank = self.ep(ep).out_banks.front().expect("read with no OUT bank");
        buf.copy_from_slice(&bank[..buf.len()]);
    }

    fn release_out(&mut self, ep: u8) {
        let e = self.ep(ep);
        e.out_banks.pop_front();
        if e.out_banks.is_empty() {
            e.flags &= !EndpointEvents::OUT_RECEIVED;
        }
    }

    unsafe fn dma_start(&mut self, ep: u8, direction: Direction, addr: *mut u8, len: usize) {
        self.ep(ep).dma = Some(SimDma {
            direction,
            addr,
            len,
            moved: 0,
            done: false,
        });
    }

    fn dma_finish(&mut self, ep: u8) -> usize {
        self.ep(ep).dma.take().map_or(0, |d| d.len - d.moved)
    }

    fn dma_stop(&mut self, ep: u8) {
        self.ep(ep).dma = None;
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Event {
    Reset,
    Suspended,
    Resumed,
    Configuration(u8),
    InterfaceSetting(u8, u8),
    Request(SetupPacket),
}

/// A handler that writes down everything that happens to it.
#[derive(Default)]
pub struct Recorder<'d> {
    pub events: Vec<Event>,
    pub completions: Vec<Completion<'d>>,
    /// Data stage for vendor IN requests.
    pub vendor_reply: &'d [u8],
    /// Where the data stage of the next vendor OUT request lands.
    pub vendor_sink: Option<&'d mut [u8]>,
}

impl<'d> Handler<'d> for Recorder<'d> {
    fn on_reset(&mut self) {
        self.events.push(Event::Reset);
    }

    fn on_suspended(&mut self) {
        self.events.push(Event::Suspended);
    }

    fn on_resumed(&mut self) {
        self.events.push(Event::Resumed);
    }

    fn on_configuration_changed(&mut self, configuration: u8) {
        self.events.push(Event::Configuration(configuration));
    }

    fn on_interface_setting_changed(&mut self, interface: u8, setting: u8) {
        self.events.push(Event::InterfaceSetting(interface, setting));
    }

    fn on_unrecognized_request(
        &mut self,
        setup: &SetupPacket,
        pipe: &mut dyn ControlPipe<'d>,
    ) -> bool {
        self.events.push(Event::Request(*setup));
        if setup.kind() != RequestKind::Vendor {
            return false;
        }
        match setup.direction() {
            Direction::In => pipe.write(self.vendor_reply, None, 1).is_ok(),
            Direction::Out if setup.length() == 0 => pipe.acknowledge().is_ok(),
            Direction::Out => match self.vendor_sink.take() {
                Some(buf) => pipe.read(buf, None, 2).is_ok(),
                None => false,
            },
        }
    }

    fn on_transfer_complete(&mut self, completion: Completion<'d>) {
        self.completions.push(completion);
    }
}

const fn le(v: u16) -> U16<byteorder::LittleEndian> {
    U16::from_bytes(v.to_le_bytes())
}

pub static DEVICE: DeviceDescriptor = DeviceDescriptor {
    length: 18,
    descriptor_type: DescriptorType::Device as u8,
    bcd_usb: le(0x0200),
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: EP0_SIZE as u8,
    vendor: le(0x03EB),
    product: le(0x6124),
    bcd_device: le(0x0100),
    manufacturer_s: 1,
    product_s: 1,
    serial_s: 0,
    num_configurations: 1,
};

pub static QUALIFIER: DeviceQualifierDescriptor = DeviceQualifierDescriptor {
    length: 10,
    descriptor_type: DescriptorType::DeviceQualifier as u8,
    bcd_usb: le(0x0200),
    device_class: 0,
    device_subclass: 0,
    device_protocol: 0,
    max_packet_size0: 64,
    num_configurations: 1,
    reserved: 0,
};

/// Three interfaces:
///
/// - 0: bulk OUT ep1 (32 bytes) and bulk IN ep2 (64 bytes).
/// - 1: nothing in setting 0, interrupt IN ep3 in setting 1.
/// - 2: 512-byte bulk IN ep4 and OUT ep5, both on DMA endpoints.
pub const CONFIG: [u8; 80] = [
    9, 2, 80, 0, 3, 1, 0, 0xA0, 50, //
    9, 4, 0, 0, 2, 0xFF, 0, 0, 0, //
    7, 5, 0x01, 2, 32, 0, 0, //
    7, 5, 0x82, 2, 64, 0, 0, //
    9, 4, 1, 0, 0, 0xFF, 0, 0, 0, //
    9, 4, 1, 1, 1, 0xFF, 0, 0, 0, //
    7, 5, 0x83, 3, 16, 0, 1, //
    9, 4, 2, 0, 2, 0xFF, 0, 0, 0, //
    7, 5, 0x84, 2, 0, 2, 0, //
    7, 5, 0x05, 2, 0, 2, 0, //
];

const fn other_speed() -> [u8; 80] {
    let mut c = CONFIG;
    c[1] = DescriptorType::OtherSpeedConfiguration as u8;
    c
}

pub static OTHER_SPEED: [u8; 80] = other_speed();

const fn self_powered() -> [u8; 80] {
    let mut c = CONFIG;
    c[7] = 0xC0;
    c
}

/// `CONFIG`, but claiming its own power supply.
pub static SELF_POWERED: [u8; 80] = self_powered();

pub static STRINGS: [&[u8]; 2] = [
    &[4, 3, 0x09, 0x04],
    &[8, 3, b'S', 0, b'i', 0, b'm', 0],
];

pub fn descriptors() -> DescriptorSet<'static> {
    DescriptorSet {
        full_speed: SpeedDescriptors {
            device: &DEVICE,
            configuration: &CONFIG,
            qualifier: Some(&QUALIFIER),
            other_speed_configuration: Some(&OTHER_SPEED),
        },
        high_speed: None,
        strings: &STRINGS,
    }
}

pub type SimDevice<'d> = Device<'d, SimPeripheral, Recorder<'d>>;

/// A device that's been powered, connected, and reset by the host, which
/// leaves it in `Default` state with endpoint 0 running.
pub fn device<'d>(alternate_settings: Option<&'d mut [u8]>) -> SimDevice<'d> {
    device_with(alternate_settings, Config::new())
}

pub fn device_with<'d>(alternate_settings: Option<&'d mut [u8]>, config: Config) -> SimDevice<'d> {
    device_from(descriptors(), alternate_settings, config)
}

pub fn device_from<'d>(
    descriptors: DescriptorSet<'d>,
    alternate_settings: Option<&'d mut [u8]>,
    config: Config,
) -> SimDevice<'d> {
    start_log();
    let mut dev = Device::new(
        SimPeripheral::new(),
        descriptors,
        Recorder::default(),
        alternate_settings,
        config,
    );
    dev.init();
    dev.connect();
    dev.peripheral_mut().bus_reset();
    dev.interrupt_handler();
    dev
}

/// Runs `SET_ADDRESS(5)` and `SET_CONFIGURATION(1)`.
pub fn enumerate<'d, H: Handler<'d>>(dev: &mut Device<'d, SimPeripheral, H>) {
    control_no_data(dev, set_address(5)).expect("SET_ADDRESS");
    control_no_data(dev, set_configuration(1)).expect("SET_CONFIGURATION");
}

/// A control request came back STALLed.
#[derive(Debug, PartialEq, Eq)]
pub struct Stalled;

/// Runs a control read and returns its data stage.
pub fn control_in<'d, H: Handler<'d>>(
    dev: &mut Device<'d, SimPeripheral, H>,
    setup: [u8; 8],
) -> Result<Vec<u8>, Stalled> {
    let want = usize::from(u16::from_le_bytes([setup[6], setup[7]]));
    dev.peripheral_mut().setup(0, setup);
    dev.interrupt_handler();

    let mut data = vec![];
    loop {
        match dev.peripheral_mut().host_in(0) {
            HostIn::Data(packet) => {
                dev.interrupt_handler();
                let short = packet.len() < EP0_SIZE;
                data.extend(packet);
                if short || data.len() >= want {
                    break;
                }
            }
            HostIn::Stall => {
                dev.interrupt_handler();
                return Err(Stalled);
            }
            HostIn::Nak => panic!("NAK during control read data stage"),
        }
    }

    assert_eq!(dev.peripheral_mut().host_out(0, &[]), HostOut::Ack);
    dev.interrupt_handler();
    Ok(data)
}

/// Runs a control request with no data stage.
pub fn control_no_data<'d, H: Handler<'d>>(
    dev: &mut Device<'d, SimPeripheral, H>,
    setup: [u8; 8],
) -> Result<(), Stalled> {
    dev.peripheral_mut().setup(0, setup);
    dev.interrupt_handler();
    status_in(dev)
}

/// Runs a control write.
pub fn control_out<'d, H: Handler<'d>>(
    dev: &mut Device<'d, SimPeripheral, H>,
    setup: [u8; 8],
    data: &[u8],
) -> Result<(), Stalled> {
    dev.peripheral_mut().setup(0, setup);
    dev.interrupt_handler();
    for chunk in data.chunks(EP0_SIZE) {
        match dev.peripheral_mut().host_out(0, chunk) {
            HostOut::Ack => dev.interrupt_handler(),
            HostOut::Stall => {
                dev.interrupt_handler();
                return Err(Stalled);
            }
            HostOut::Nak => panic!("NAK during control write data stage"),
        }
    }
    status_in(dev)
}

fn status_in<'d, H: Handler<'d>>(dev: &mut Device<'d, SimPeripheral, H>) -> Result<(), Stalled> {
    match dev.peripheral_mut().host_in(0) {
        HostIn::Data(packet) => {
            assert!(packet.is_empty(), "status stage carried data");
            dev.interrupt_handler();
            Ok(())
        }
        HostIn::Stall => {
            dev.interrupt_handler();
            Err(Stalled)
        }
        HostIn::Nak => panic!("NAK in status stage"),
    }
}

pub fn request(request_type: u8, request: u8, value: u16, index: u16, length: u16) -> [u8; 8] {
    let v = value.to_le_bytes();
    let i = index.to_le_bytes();
    let l = length.to_le_bytes();
    [request_type, request, v[0], v[1], i[0], i[1], l[0], l[1]]
}

pub fn get_descriptor(kind: DescriptorType, index: u8, length: u16) -> [u8; 8] {
    request(0x80, 0x06, (kind as u16) << 8 | u16::from(index), 0, length)
}

pub fn set_address(address: u16) -> [u8; 8] {
    request(0x00, 0x05, address, 0, 0)
}

pub fn set_configuration(value: u16) -> [u8; 8] {
    request(0x00, 0x09, value, 0, 0)
}

pub fn set_interface(interface: u16, setting: u16) -> [u8; 8] {
    request(0x01, 0x0B, setting, interface, 0)
}

pub fn get_interface(interface: u16) -> [u8; 8] {
    request(0x81, 0x0A, 0, interface, 1)
}

pub fn get_status(recipient: u8, index: u16) -> [u8; 8] {
    request(0x80 | recipient, 0x00, 0, index, 2)
}

pub fn clear_halt(ep: u16) -> [u8; 8] {
    request(0x02, 0x01, 0, ep, 0)
}

pub fn set_halt(ep: u16) -> [u8; 8] {
    request(0x02, 0x03, 0, ep, 0)
}
