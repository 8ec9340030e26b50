// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB 2.0 device stack for Atmel's UDP and UDPHS controllers.
//!
//! This is the part of a USB device that every device needs and nobody wants
//! to write twice: enumeration, the standard requests on endpoint 0, and
//! moving bytes in and out of the other endpoints. What the device actually
//! _does_ (HID reports, CDC serial, a vendor protocol) lives in the
//! application, which plugs in through the [`Handler`] trait and by starting
//! transfers with [`Device::write`] and [`Device::read`].
//!
//! From the bottom up, the pieces are:
//!
//! - [`peripheral`]: the `PeripheralOps` trait, which is all the shared code
//!   knows about hardware. [`udp`] (full speed, FIFO) and [`udphs`] (high
//!   speed, DMA) implement it, each behind a Cargo feature of the same name.
//! - [`endpoint`]: a state machine per endpoint that carries a transfer from
//!   start to a single completion, a packet or DMA chunk at a time.
//! - The request dispatcher, which answers chapter 9 requests from the
//!   [`DescriptorSet`] and hands everything else to the application.
//! - The interrupt front-end, [`Device::interrupt_handler`], which turns
//!   controller events into calls on the layers above.
//!
//! Nothing allocates, and nothing blocks. Buffers passed to `write` and `read`
//! are borrowed for the life of the transfer and handed back in its
//! [`Completion`], so they can live anywhere the caller likes, as long as it
//! outlives the `Device`.
//!
//! If the application and the ISR both need the device, wrap it in a
//! [`shared::SharedDevice`].
//!
//! # Logging
//!
//! Everything noteworthy goes through the `log` facade: bus events and state
//! changes at `debug`, per-packet traffic at `trace`, and anything that
//! suggests a confused host or a broken descriptor at `warn`. Hook up whatever
//! logger suits the target, or none.

#![cfg_attr(not(test), no_std)]

pub mod config;
mod control;
pub mod descriptor;
pub mod device;
pub mod endpoint;
pub mod error;
mod interrupt;
pub mod peripheral;
pub mod setup;
pub mod shared;

#[cfg(feature = "udp")]
pub mod udp;
#[cfg(feature = "udphs")]
pub mod udphs;

pub use config::Config;
pub use descriptor::{DescriptorSet, SpeedDescriptors};
pub use device::{ControlPipe, Device, DeviceState, Handler};
pub use endpoint::{Buffer, Callback, Completion, EndpointState, Progress};
pub use error::{Error, Status};
pub use peripheral::PeripheralOps;
pub use setup::SetupPacket;
