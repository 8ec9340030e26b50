// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The 8-byte SETUP packet that starts every control transfer, and the
//! standard codes that can appear inside it.

use byteorder::LittleEndian;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use zerocopy::{AsBytes, FromBytes, Unaligned, U16};

use crate::descriptor::Direction;

/// The eight bytes that open every control transfer, as they sit in the
/// endpoint FIFO.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, AsBytes, FromBytes, Unaligned)]
pub struct SetupPacket {
    /// Packs three things: bit 7 is the data-phase direction (see
    /// `Direction`), bits 6:5 the request type (standard/class/vendor), and
    /// bits 4:0 the recipient.
    pub request_type: u8,
    /// Request. Standard setup requests are in the `Request` enum. Class and
    /// vendor requests reuse the same numbers to mean other things.
    pub request: u8,
    /// Request-specific. Several standard requests only define the low byte.
    pub value: U16<LittleEndian>,
    /// Another argument, often an interface or endpoint number.
    pub index: U16<LittleEndian>,
    /// Data stage length: exact for OUT, an upper bound for IN. Zero means
    /// there's no data stage.
    pub length: U16<LittleEndian>,
}

/// Who a request is for, from `request_type` bits 6:5.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// What a request is about, from `request_type` bits 4:0.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// The standard device requests from chapter 9.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Request {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    /// Takes effect only after the status stage.
    SetAddress = 0x05,
    /// Type in the high byte of wValue, index in the low byte.
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    /// Zero unconfigures.
    SetConfiguration = 0x09,
    GetInterface = 0x0A,
    SetInterface = 0x0B,
    SynchFrame = 0x0C,
}

/// Feature selectors for `SET_FEATURE` and `CLEAR_FEATURE`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum Feature {
    EndpointHalt = 0,
    DeviceRemoteWakeup = 1,
    TestMode = 2,
}

/// Compliance test selectors, carried in the high byte of `index` on a
/// `SET_FEATURE(TEST_MODE)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, FromPrimitive)]
pub enum TestMode {
    J = 1,
    K = 2,
    Se0Nak = 3,
    Packet = 4,
    ForceEnable = 5,
}

impl SetupPacket {
    /// Reinterprets the raw bytes as read out of the peripheral.
    pub fn from_bytes(raw: [u8; 8]) -> Self {
        Self {
            request_type: raw[0],
            request: raw[1],
            value: U16::from_bytes([raw[2], raw[3]]),
            index: U16::from_bytes([raw[4], raw[5]]),
            length: U16::from_bytes([raw[6], raw[7]]),
        }
    }

    pub fn direction(&self) -> Direction {
        Direction::of_endpoint_addr(self.request_type)
    }

    pub fn kind(&self) -> RequestKind {
        match (self.request_type >> 5) & 0b11 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        }
    }

    /// `None` for the reserved recipient codes.
    pub fn recipient(&self) -> Option<Recipient> {
        Recipient::from_u8(self.request_type & 0x1F)
    }

    /// The standard request this packet carries, if it is one. Class and
    /// vendor requests always come back `None`, whatever their code.
    pub fn request(&self) -> Option<Request> {
        if self.kind() != RequestKind::Standard {
            return None;
        }
        Request::from_u8(self.request)
    }

    pub fn value(&self) -> u16 {
        self.value.get()
    }

    pub fn index(&self) -> u16 {
        self.index.get()
    }

    pub fn length(&self) -> u16 {
        self.length.get()
    }

    /// For `GET_DESCRIPTOR`, the type lives in the high byte of `value`...
    pub fn descriptor_type(&self) -> u8 {
        (self.value() >> 8) as u8
    }

    /// ...and the index in the low byte.
    pub fn descriptor_index(&self) -> u8 {
        self.value() as u8
    }

    /// Endpoint number from `index`, for requests addressed to an endpoint.
    pub fn endpoint_number(&self) -> u8 {
        (self.index() & 0xF) as u8
    }

    /// Interface number from `index`, for requests addressed to an interface.
    pub fn interface_number(&self) -> u8 {
        self.index() as u8
    }

    pub fn feature(&self) -> Option<Feature> {
        Feature::from_u16(self.value())
    }

    pub fn test_selector(&self) -> Option<TestMode> {
        TestMode::from_u16(self.index() >> 8)
    }
}
