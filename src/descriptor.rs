// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB descriptor layouts, and read-only views over descriptor bytes.
//!
//! The fixed-size standard descriptors are modeled as `repr(C)` structs that
//! are valid for any bit pattern, so we can point them at arbitrary bytes
//! using `zerocopy` rather than by casting pointers. Multi-byte fields are
//! little-endian on the wire regardless of what the CPU thinks, which the
//! `U16<LittleEndian>` type takes care of.
//!
//! A configuration descriptor is different: it's the head of a variable-length
//! blob containing interface, endpoint and class-specific descriptors packed
//! end to end. That blob is handled as a byte slice and walked with
//! [`Descriptor::next`], which checks each declared length against the bytes
//! actually available before advancing.

use core::fmt;

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned, U16};

/// Which way data moves, named from the host's side. The discriminants are
/// the endpoint address bit (and the `bmRequestType` bit 7) for each.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Direction {
    Out = 0,
    In = 0x80,
}

impl Direction {
    /// Produces the endpoint address for endpoint `num` in this direction.
    pub const fn endpoint(self, num: u8) -> u8 {
        num | self as u8
    }

    pub const fn of_endpoint_addr(addr: u8) -> Self {
        if addr & Self::In as u8 != 0 {
            Self::In
        } else {
            Self::Out
        }
    }
}

/// Bits 1:0 of `EndpointDescriptor::attributes`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum TransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// High byte of a `GET_DESCRIPTOR` wValue, and byte 1 of every descriptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum DescriptorType {
    Device = 0x01,
    Configuration = 0x02,
    String = 0x03,
    Interface = 0x04,
    Endpoint = 0x05,
    DeviceQualifier = 0x06,
    OtherSpeedConfiguration = 0x07,
    InterfacePower = 0x08,
    InterfaceAssociation = 0x0B,
}

/// Device descriptor. The host reads this (or its first eight bytes) before
/// anything else, to learn endpoint 0's packet size.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct DeviceDescriptor {
    /// 18.
    pub length: u8,
    /// `DescriptorType::Device`.
    pub descriptor_type: u8,
    /// BCD protocol release; `0x0200` here, since both controllers can run
    /// at high speed.
    pub bcd_usb: U16<LittleEndian>,
    /// Zero if each interface names its own class.
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Endpoint 0 packet size. The stack configures endpoint 0 from this
    /// after every bus reset.
    pub max_packet_size0: u8,
    pub vendor: U16<LittleEndian>,
    pub product: U16<LittleEndian>,
    /// BCD release of the device itself.
    pub bcd_device: U16<LittleEndian>,
    /// String indices, zero for none.
    pub manufacturer_s: u8,
    pub product_s: u8,
    pub serial_s: u8,
    /// We only ever serve one.
    pub num_configurations: u8,
}

/// Header of a configuration blob. Interface and endpoint descriptors follow
/// it, in order, up to `total_length`.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct ConfigurationDescriptor {
    /// 9.
    pub length: u8,
    /// `Configuration`, or `OtherSpeedConfiguration` for the copy describing
    /// the speed we aren't running at.
    pub descriptor_type: u8,
    /// Byte count of the whole blob, header included. `GET_DESCRIPTOR`
    /// replies are cut to this (and to wLength).
    pub total_length: U16<LittleEndian>,
    pub num_interfaces: u8,
    /// What `SET_CONFIGURATION` has to ask for to select this one, and what
    /// `GET_CONFIGURATION` reports afterwards.
    pub configuration_value: u8,
    pub configuration_s: u8,
    /// 0x80 is always set. 0x40 means self-powered, which `GET_STATUS`
    /// reports. 0x20 means the device may ask for remote wakeup.
    pub attributes: u8,
    /// Bus current draw, in 2 mA steps.
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    pub fn total_length(&self) -> usize {
        usize::from(self.total_length.get())
    }

    pub fn is_self_powered(&self) -> bool {
        self.attributes & 0x40 != 0
    }

    pub fn supports_remote_wakeup(&self) -> bool {
        self.attributes & 0x20 != 0
    }
}

/// One setting of one interface.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct InterfaceDescriptor {
    /// 9.
    pub length: u8,
    /// `DescriptorType::Interface`.
    pub descriptor_type: u8,
    /// Index into the device's alternate-setting table.
    pub interface_number: u8,
    /// Setting 0 is what a fresh configuration starts with. The endpoints
    /// listed after a descriptor only run while its setting is selected.
    pub alternate_setting: u8,
    /// How many endpoint descriptors follow before the next interface.
    pub num_endpoints: u8,
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
    pub interface_s: u8,
}

/// An endpoint used by the interface setting it follows.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct EndpointDescriptor {
    /// 7.
    pub length: u8,
    /// `DescriptorType::Endpoint`.
    pub descriptor_type: u8,
    /// Endpoint number in bits 3:0, 0x80 set for IN. See `number` and
    /// `direction`.
    pub endpoint_address: u8,
    /// Transfer type in bits 1:0; see `transfer_type`. We ignore the
    /// isochronous sync and usage bits.
    pub attributes: u8,
    /// Packet size in bits 10:0. Bits 12:11 are the high-bandwidth
    /// transaction count, which `max_packet_size()` strips.
    pub max_packet_size: U16<LittleEndian>,
    /// Only meaningful to the host, for interrupt and isochronous endpoints.
    pub interval: u8,
}

impl EndpointDescriptor {
    /// Synthesizes a descriptor for a control endpoint 0 with the given
    /// packet size. Endpoint 0 never appears in a configuration descriptor,
    /// but it's convenient to configure it the same way as everyone else.
    pub fn control(max_packet_size: u16) -> Self {
        Self {
            length: core::mem::size_of::<Self>() as u8,
            descriptor_type: DescriptorType::Endpoint as u8,
            endpoint_address: 0,
            attributes: TransferType::Control as u8,
            max_packet_size: U16::new(max_packet_size),
            interval: 0,
        }
    }

    pub fn number(&self) -> u8 {
        self.endpoint_address & 0xF
    }

    pub fn direction(&self) -> Direction {
        Direction::of_endpoint_addr(self.endpoint_address)
    }

    pub fn transfer_type(&self) -> TransferType {
        match self.attributes & 0b11 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }

    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size.get() & 0x7FF
    }
}

/// Sent by high-speed capable devices to describe what would change if the
/// device were operating at the other speed.
#[repr(C)]
#[derive(Copy, Clone, Debug, AsBytes, FromBytes, Unaligned)]
pub struct DeviceQualifierDescriptor {
    /// 10.
    pub length: u8,
    /// `DescriptorType::DeviceQualifier`.
    pub descriptor_type: u8,
    pub bcd_usb: U16<LittleEndian>,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    /// Endpoint 0 packet size at the other speed.
    pub max_packet_size0: u8,
    pub num_configurations: u8,
    pub reserved: u8,
}

/// A single descriptor somewhere inside a byte slice.
///
/// Holding one of these means the descriptor's declared length was at least
/// two (enough for the header) and fit inside the bytes it was found in.
#[derive(Copy, Clone, Debug)]
pub struct Descriptor<'a> {
    /// Exactly `length()` bytes.
    bytes: &'a [u8],
    /// Whatever follows, up to the bound the walk started with.
    rest: &'a [u8],
}

impl<'a> Descriptor<'a> {
    /// Interprets the start of `bytes` as a descriptor. Returns `None` if
    /// there's no complete header, the declared length is too small to hold
    /// one, or the declared length runs off the end of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        let length = usize::from(*bytes.first()?);
        if length < 2 || length > bytes.len() {
            return None;
        }
        let (bytes, rest) = bytes.split_at(length);
        Some(Self { bytes, rest })
    }

    pub fn length(&self) -> usize {
        self.bytes.len()
    }

    /// Raw type byte, including codes we don't have names for.
    pub fn descriptor_type(&self) -> u8 {
        self.bytes[1]
    }

    pub fn kind(&self) -> Option<DescriptorType> {
        DescriptorType::from_u8(self.descriptor_type())
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// The descriptor immediately after this one, if there is a valid one.
    pub fn next(&self) -> Option<Descriptor<'a>> {
        Descriptor::new(self.rest)
    }

    pub fn interface(&self) -> Option<&'a InterfaceDescriptor> {
        if self.kind() != Some(DescriptorType::Interface) {
            return None;
        }
        view(self.bytes)
    }

    pub fn endpoint(&self) -> Option<&'a EndpointDescriptor> {
        if self.kind() != Some(DescriptorType::Endpoint) {
            return None;
        }
        view(self.bytes)
    }
}

/// Points a fixed-layout descriptor struct at the front of `bytes`.
fn view<T: FromBytes + Unaligned>(bytes: &[u8]) -> Option<&T> {
    LayoutVerified::<_, T>::new_unaligned_from_prefix(bytes)
        .map(|(lv, _rest)| lv.into_ref())
}

/// Iterator over consecutive descriptors. Stops at the first one whose
/// declared length is zero, too short, or runs past the end.
#[derive(Clone, Debug)]
pub struct Walk<'a> {
    next: Option<Descriptor<'a>>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = Descriptor<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let d = self.next.take()?;
        self.next = d.next();
        Some(d)
    }
}

/// Walks every descriptor in `bytes`, starting with the first.
pub fn walk(bytes: &[u8]) -> Walk<'_> {
    Walk {
        next: Descriptor::new(bytes),
    }
}

/// Reads the header of a configuration (or other-speed configuration) blob.
pub fn configuration_header(configuration: &[u8]) -> Option<&ConfigurationDescriptor> {
    view(configuration)
}

/// Declared total length of a configuration blob, or 0 if it doesn't even
/// have a header.
pub fn configuration_total_length(configuration: &[u8]) -> usize {
    configuration_header(configuration)
        .map(ConfigurationDescriptor::total_length)
        .unwrap_or(0)
}

/// Walks the descriptors packed after a configuration header. The walk never
/// looks past `wTotalLength`, or past the end of the slice if that's shorter.
pub fn sub_descriptors(configuration: &[u8]) -> Walk<'_> {
    let bound = configuration_total_length(configuration).min(configuration.len());
    Walk {
        next: Descriptor::new(&configuration[..bound]).and_then(|header| header.next()),
    }
}

/// Number of descriptors collected into each output of
/// [`parse_configuration`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Parsed {
    pub interfaces: usize,
    pub endpoints: usize,
    pub others: usize,
}

/// Sorts the sub-descriptors of a configuration into interfaces, endpoints and
/// everything else (class-specific descriptors, associations, and so on).
///
/// Each output is filled from the front and terminated with a `None` after
/// the last entry, so the last slot of each array is reserved for the
/// terminator; descriptors that don't fit are skipped. Pass `None` for any
/// category you don't care about.
///
/// The walk stops early, without complaint, at a descriptor whose length is
/// zero or runs past the configuration's declared total length.
pub fn parse_configuration<'a>(
    configuration: &'a [u8],
    mut interfaces: Option<&mut [Option<&'a InterfaceDescriptor>]>,
    mut endpoints: Option<&mut [Option<&'a EndpointDescriptor>]>,
    mut others: Option<&mut [Option<Descriptor<'a>>]>,
) -> Parsed {
    let mut parsed = Parsed::default();

    for d in sub_descriptors(configuration) {
        if let Some(i) = d.interface() {
            collect(&mut interfaces, &mut parsed.interfaces, i);
        } else if let Some(e) = d.endpoint() {
            collect(&mut endpoints, &mut parsed.endpoints, e);
        } else {
            collect(&mut others, &mut parsed.others, d);
        }
    }

    terminate(&mut interfaces, parsed.interfaces);
    terminate(&mut endpoints, parsed.endpoints);
    terminate(&mut others, parsed.others);
    parsed
}

fn collect<T>(out: &mut Option<&mut [Option<T>]>, count: &mut usize, item: T) {
    if let Some(slots) = out {
        if *count + 1 < slots.len() {
            slots[*count] = Some(item);
            *count += 1;
        }
    }
}

fn terminate<T>(out: &mut Option<&mut [Option<T>]>, count: usize) {
    if let Some(slot) = out.as_deref_mut().and_then(|slots| slots.get_mut(count)) {
        *slot = None;
    }
}

/// The descriptors for one bus speed.
#[derive(Copy, Clone, Debug)]
pub struct SpeedDescriptors<'d> {
    pub device: &'d DeviceDescriptor,
    /// Configuration header followed by everything it contains, exactly as
    /// sent to the host.
    pub configuration: &'d [u8],
    /// Only high-speed capable devices have one of these.
    pub qualifier: Option<&'d DeviceQualifierDescriptor>,
    /// The configuration as it would look at the other speed.
    pub other_speed_configuration: Option<&'d [u8]>,
}

/// Everything the device can tell the host about itself. Built once by the
/// application and never changed.
#[derive(Copy, Clone, Debug)]
pub struct DescriptorSet<'d> {
    pub full_speed: SpeedDescriptors<'d>,
    /// Used while running at high speed. Devices that can't do high speed
    /// leave this `None`, and so do devices whose descriptors are the same at
    /// both speeds.
    pub high_speed: Option<SpeedDescriptors<'d>>,
    /// Complete string descriptors, header included. Index 0 is the language
    /// ID table.
    pub strings: &'d [&'d [u8]],
}

impl<'d> DescriptorSet<'d> {
    pub fn for_speed(&self, high_speed: bool) -> SpeedDescriptors<'d> {
        match self.high_speed {
            Some(hs) if high_speed => hs,
            _ => self.full_speed,
        }
    }

    /// String descriptor `index`, trimmed to its declared length.
    pub fn string(&self, index: u8) -> Option<&'d [u8]> {
        let bytes = self.strings.get(usize::from(index))?;
        Descriptor::new(bytes).map(|d| d.as_bytes())
    }

    /// Checks the header and length invariants of every descriptor in the
    /// set.
    pub fn validate(&self) -> Result<(), Malformed> {
        validate_speed(&self.full_speed)?;
        if let Some(hs) = &self.high_speed {
            validate_speed(hs)?;
        }
        for (i, s) in self.strings.iter().enumerate() {
            match Descriptor::new(s) {
                Some(d) if d.kind() == Some(DescriptorType::String) => (),
                _ => return Err(Malformed::String(i)),
            }
        }
        Ok(())
    }
}

fn validate_speed(speed: &SpeedDescriptors<'_>) -> Result<(), Malformed> {
    let dev = speed.device;
    if usize::from(dev.length) != core::mem::size_of::<DeviceDescriptor>()
        || dev.descriptor_type != DescriptorType::Device as u8
    {
        return Err(Malformed::Device);
    }
    validate_configuration(speed.configuration, DescriptorType::Configuration)?;
    if let Some(q) = speed.qualifier {
        if usize::from(q.length) != core::mem::size_of::<DeviceQualifierDescriptor>()
            || q.descriptor_type != DescriptorType::DeviceQualifier as u8
        {
            return Err(Malformed::Qualifier);
        }
    }
    if let Some(other) = speed.other_speed_configuration {
        validate_configuration(other, DescriptorType::OtherSpeedConfiguration)?;
    }
    Ok(())
}

fn validate_configuration(bytes: &[u8], kind: DescriptorType) -> Result<(), Malformed> {
    let header = configuration_header(bytes).ok_or(Malformed::Configuration)?;
    if usize::from(header.length) != core::mem::size_of::<ConfigurationDescriptor>()
        || header.descriptor_type != kind as u8
    {
        return Err(Malformed::Configuration);
    }
    let declared = header.total_length();
    if declared > bytes.len() {
        return Err(Malformed::TotalLength {
            declared,
            actual: bytes.len(),
        });
    }
    let actual: usize = walk(&bytes[..declared]).map(|d| d.length()).sum();
    if actual != declared {
        return Err(Malformed::TotalLength { declared, actual });
    }
    Ok(())
}

/// What [`DescriptorSet::validate`] found wrong.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Malformed {
    Device,
    Configuration,
    /// `wTotalLength` disagrees with the descriptors actually present.
    TotalLength { declared: usize, actual: usize },
    Qualifier,
    /// String descriptor at this index.
    String(usize),
}

impl fmt::Display for Malformed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Malformed::Device => write!(f, "bad device descriptor"),
            Malformed::Configuration => write!(f, "bad configuration header"),
            Malformed::TotalLength { declared, actual } => write!(
                f,
                "configuration declares {declared} bytes but contains {actual}"
            ),
            Malformed::Qualifier => write!(f, "bad device qualifier"),
            Malformed::String(i) => write!(f, "bad string descriptor {i}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // One interface, two bulk endpoints, plus a class-specific blob in the
    // middle to make sure it lands in "others".
    const CONFIG: [u8; 37] = [
        9, 2, 37, 0, 1, 1, 0, 0xC0, 50, //
        9, 4, 0, 0, 2, 0xFF, 0, 0, 0, //
        5, 0x24, 0, 0x10, 0x01, //
        7, 5, 0x81, 2, 64, 0, 0, //
        7, 5, 0x02, 2, 0, 2, 0, //
    ];

    static DEVICE: DeviceDescriptor = DeviceDescriptor {
        length: 18,
        descriptor_type: DescriptorType::Device as u8,
        bcd_usb: U16::from_bytes(u16::to_le_bytes(0x0200)),
        device_class: 0,
        device_subclass: 0,
        device_protocol: 0,
        max_packet_size0: 64,
        vendor: U16::from_bytes(u16::to_le_bytes(0x03EB)),
        product: U16::from_bytes(u16::to_le_bytes(0x6124)),
        bcd_device: U16::from_bytes(u16::to_le_bytes(0x0100)),
        manufacturer_s: 1,
        product_s: 0,
        serial_s: 0,
        num_configurations: 1,
    };

    #[test]
    fn endpoint_accessors() {
        let mut eps = [None; 4];
        let parsed = parse_configuration(&CONFIG, None, Some(&mut eps), None);
        assert_eq!(parsed.endpoints, 2);

        let ep1 = eps[0].unwrap();
        assert_eq!(ep1.number(), 1);
        assert_eq!(ep1.direction(), Direction::In);
        assert_eq!(ep1.transfer_type(), TransferType::Bulk);
        assert_eq!(ep1.max_packet_size(), 64);

        let ep2 = eps[1].unwrap();
        assert_eq!(ep2.number(), 2);
        assert_eq!(ep2.direction(), Direction::Out);
        assert_eq!(ep2.max_packet_size(), 512);

        assert!(eps[2].is_none());
    }

    #[test]
    fn parse_sorts_by_type() {
        let mut ifs = [None; 3];
        let mut eps = [None; 3];
        let mut others = [None; 3];
        let parsed = parse_configuration(
            &CONFIG,
            Some(&mut ifs),
            Some(&mut eps),
            Some(&mut others),
        );
        assert_eq!(parsed, Parsed { interfaces: 1, endpoints: 2, others: 1 });
        assert_eq!(ifs[0].unwrap().num_endpoints, 2);
        assert!(ifs[1].is_none());
        let other = others[0].unwrap();
        assert_eq!(other.descriptor_type(), 0x24);
        assert_eq!(other.length(), 5);
        assert!(other.kind().is_none());
    }

    #[test]
    fn parse_keeps_terminator_when_full() {
        let mut eps = [None; 2];
        let parsed = parse_configuration(&CONFIG, None, Some(&mut eps), None);
        assert_eq!(parsed.endpoints, 1);
        assert!(eps[0].is_some());
        assert!(eps[1].is_none());
    }

    #[test]
    fn parse_stops_at_zero_length() {
        let mut cfg = CONFIG;
        // Zero out the class-specific descriptor's length.
        cfg[18] = 0;
        let mut eps = [None; 4];
        let parsed = parse_configuration(&cfg, None, Some(&mut eps), None);
        assert_eq!(parsed.endpoints, 0);
    }

    #[test]
    fn header_and_total_length() {
        let header = configuration_header(&CONFIG).unwrap();
        assert_eq!(header.configuration_value, 1);
        assert!(header.is_self_powered());
        assert!(!header.supports_remote_wakeup());
        assert_eq!(configuration_total_length(&CONFIG), 37);
        assert_eq!(configuration_total_length(&CONFIG[..3]), 0);
    }

    #[test]
    fn descriptor_rejects_bad_headers() {
        assert!(Descriptor::new(&[]).is_none());
        assert!(Descriptor::new(&[1, 2]).is_none());
        assert!(Descriptor::new(&[4, 3, 9]).is_none());
        let d = Descriptor::new(&[4, 3, 9, 4, 0xAA]).unwrap();
        assert_eq!(d.length(), 4);
        assert_eq!(d.kind(), Some(DescriptorType::String));
        assert!(d.next().is_none());
    }

    #[test]
    fn validate_catches_total_length() {
        let strings: [&[u8]; 1] = [&[4, 3, 9, 4]];
        let mut set = DescriptorSet {
            full_speed: SpeedDescriptors {
                device: &DEVICE,
                configuration: &CONFIG,
                qualifier: None,
                other_speed_configuration: None,
            },
            high_speed: None,
            strings: &strings,
        };
        assert_eq!(set.validate(), Ok(()));

        let mut short = CONFIG;
        short[2] = 28;
        set.full_speed.configuration = &short;
        assert_eq!(
            set.validate(),
            Err(Malformed::TotalLength { declared: 28, actual: 23 })
        );
    }

    #[test]
    fn string_lookup_trims_to_declared_length() {
        let strings: [&[u8]; 2] = [&[4, 3, 9, 4], &[4, 3, b'A', 0, 0xFF]];
        let set = DescriptorSet {
            full_speed: SpeedDescriptors {
                device: &DEVICE,
                configuration: &CONFIG,
                qualifier: None,
                other_speed_configuration: None,
            },
            high_speed: None,
            strings: &strings,
        };
        assert_eq!(set.string(1), Some(&[4, 3, b'A', 0][..]));
        assert_eq!(set.string(2), None);
    }

    /// Builds a configuration blob out of sub-descriptors of the given
    /// lengths, then lies about the total length.
    fn blob(lengths: &[u8], declared: u16) -> Vec<u8> {
        let mut v = vec![9, 2, 0, 0, 1, 1, 0, 0x80, 50];
        v[2..4].copy_from_slice(&declared.to_le_bytes());
        for &len in lengths {
            let start = v.len();
            v.resize(start + usize::from(len), 0xA5);
            v[start] = len;
            v[start + 1] = 0x24;
        }
        v
    }

    proptest! {
        #[test]
        fn walk_never_passes_total_length(
            lengths in proptest::collection::vec(2..40u8, 0..12),
            cut in 0..400u16,
        ) {
            let full: usize = 9 + lengths.iter().map(|&l| usize::from(l)).sum::<usize>();
            let declared = cut.min(full as u16);
            let cfg = blob(&lengths, declared);
            let base = cfg.as_ptr() as usize;

            let mut others = [None; 16];
            let parsed = parse_configuration(&cfg, None, None, Some(&mut others));
            for d in others.iter().take(parsed.others).flatten() {
                let end = d.as_bytes().as_ptr() as usize - base + d.length();
                prop_assert!(end <= usize::from(declared));
            }
        }
    }
}
