// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The seam between the protocol logic and a particular USB controller.
//!
//! Everything above this trait (the transfer engine, the request dispatcher,
//! the interrupt front-end) is shared by both hardware variants. Everything
//! below it is a register-poking driver that knows nothing about descriptors
//! or requests.
//!
//! The operations are deliberately small. Each one corresponds to roughly one
//! register access on the controllers we support, so that the ordering
//! constraints the hardware imposes (set the direction bit _before_ releasing
//! the SETUP flag, commit a preloaded bank _before_ acknowledging the previous
//! completion, etc.) are visible in the shared code rather than hidden in each
//! driver.

use bitflags::bitflags;

use crate::descriptor::{Direction, TransferType};
use crate::setup::TestMode;

bitflags! {
    /// Device-level conditions.
    pub struct DeviceEvents: u8 {
        /// The host finished driving a bus reset.
        const END_OF_RESET = 1 << 0;
        /// Three milliseconds of bus idle.
        const SUSPEND = 1 << 1;
        /// Resume signaling, or any bus activity while suspended.
        const RESUME = 1 << 2;
        /// A start-of-frame token went by.
        const START_OF_FRAME = 1 << 3;
    }
}

bitflags! {
    /// Per-endpoint conditions.
    pub struct EndpointEvents: u8 {
        /// A SETUP packet is waiting to be read.
        const SETUP = 1 << 0;
        /// The host acknowledged the IN packet we committed.
        const IN_COMPLETE = 1 << 1;
        /// An OUT packet is sitting in a bank.
        const OUT_RECEIVED = 1 << 2;
        /// We answered the host with a STALL.
        const STALL_SENT = 1 << 3;
    }
}

/// What the hardware can do on a given endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Largest packet the endpoint's FIFO will hold.
    pub max_packet: u16,
    /// Number of FIFO banks.
    pub banks: u8,
    /// Whether a DMA channel is wired to this endpoint.
    pub dma: bool,
}

/// Everything a driver needs to bring up one endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub kind: TransferType,
    /// Ignored for control endpoints, which go both ways.
    pub direction: Direction,
    pub max_packet: u16,
    pub banks: u8,
    /// The endpoint's transfers will go through DMA rather than the FIFO
    /// window.
    pub dma: bool,
}

/// Snapshot of what's asking for attention. Only enabled sources show up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Pending {
    pub device: DeviceEvents,
    /// Bit `n` set means endpoint `n` has at least one listened event.
    pub endpoints: u32,
    /// Bit `n` set means the DMA channel for endpoint `n` finished.
    pub dma: u32,
}

impl Pending {
    pub const NONE: Self = Self {
        device: DeviceEvents::empty(),
        endpoints: 0,
        dma: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.device.is_empty() && self.endpoints == 0 && self.dma == 0
    }
}

/// Gates the clocks feeding the USB block. A suspended device may draw at
/// most 2.5 mA, so the drivers switch the clocks off while the bus is idle.
///
/// How that's done is board- and chip-specific (PLL, PMC peripheral clock
/// IDs, and so on), so it's supplied by the application.
pub trait UsbClocks {
    fn enable(&mut self);
    fn disable(&mut self);
}

/// For boards that leave the clocks alone.
impl UsbClocks for () {
    fn enable(&mut self) {}
    fn disable(&mut self) {}
}

/// Operations the shared USB logic needs from a controller.
///
/// Endpoint numbers are always less than `endpoint_count()`; the callers
/// check that before getting here.
pub trait PeripheralOps {
    /// Number of hardware endpoints, including endpoint 0.
    fn endpoint_count(&self) -> usize;
    fn capabilities(&self, ep: u8) -> Capabilities;

    /// Power up the controller with the pull-up off.
    fn init(&mut self);
    /// Connect the D+ pull-up, making us visible to the host.
    fn attach(&mut self);
    fn detach(&mut self);
    /// Start answering at `address`. Zero returns to the default address.
    fn set_address(&mut self, address: u8);
    fn set_configured(&mut self, configured: bool);
    /// Save power; called after the bus has gone idle.
    fn suspend(&mut self);
    fn resume(&mut self);
    /// Drive resume signaling toward the host.
    fn remote_wakeup(&mut self);
    fn is_high_speed(&self) -> bool;
    /// Put the transceiver into a compliance test state. These states can only
    /// be left by a power cycle.
    fn enter_test_mode(&mut self, mode: TestMode) -> !;

    fn enable_interrupts(&mut self, events: DeviceEvents);
    fn disable_interrupts(&mut self, events: DeviceEvents);
    fn pending(&self) -> Pending;
    /// Acknowledge device-level events.
    fn clear(&mut self, events: DeviceEvents);

    /// Flush the endpoint's banks and reset its data toggle.
    fn endpoint_reset(&mut self, ep: u8);
    fn endpoint_configure(&mut self, ep: u8, config: &EndpointConfig);
    fn endpoint_disable(&mut self, ep: u8);
    /// Start reporting `events` in `pending()`/`endpoint_events()`.
    fn endpoint_listen(&mut self, ep: u8, events: EndpointEvents);
    fn endpoint_unlisten(&mut self, ep: u8, events: EndpointEvents);
    /// Events that are both asserted and listened for.
    fn endpoint_events(&self, ep: u8) -> EndpointEvents;

    /// Answer every token on the endpoint with STALL until cleared.
    fn set_stall(&mut self, ep: u8);
    fn clear_stall(&mut self, ep: u8);
    fn is_stalled(&self, ep: u8) -> bool;
    fn ack_stall_sent(&mut self, ep: u8);

    fn read_setup(&mut self, ep: u8) -> [u8; 8];
    /// Select the data-stage direction of a control transfer. Must happen
    /// before `ack_setup`.
    fn set_control_direction(&mut self, ep: u8, direction: Direction);
    fn ack_setup(&mut self, ep: u8);

    /// Copy one packet into the endpoint's next free bank.
    fn write_fifo(&mut self, ep: u8, data: &[u8]);
    /// Hand the oldest loaded bank to the hardware for transmission.
    fn commit_in(&mut self, ep: u8);
    fn ack_in_complete(&mut self, ep: u8);
    /// Throw away anything loaded or committed but not yet sent. This may
    /// flush the whole FIFO, so read any pending SETUP packet first.
    fn cancel_in(&mut self, ep: u8);

    /// Size of the OUT packet in the current bank.
    fn out_byte_count(&self, ep: u8) -> usize;
    /// Copy `buf.len()` bytes out of the current bank.
    fn read_fifo(&mut self, ep: u8, buf: &mut [u8]);
    /// Give the current bank back to the hardware, discarding anything left
    /// in it.
    fn release_out(&mut self, ep: u8);

    /// Program the endpoint's DMA channel to move `len` bytes to or from
    /// `addr`, and enable its completion interrupt.
    ///
    /// # Safety
    ///
    /// `addr..addr + len` must stay valid (and, for OUT, writable and not
    /// otherwise accessed) until `dma_finish` or `dma_stop` is called.
    unsafe fn dma_start(&mut self, _ep: u8, _direction: Direction, _addr: *mut u8, _len: usize) {}
    /// Acknowledge a DMA completion. Returns the number of bytes the channel
    /// did _not_ move.
    fn dma_finish(&mut self, _ep: u8) -> usize {
        0
    }
    fn dma_stop(&mut self, _ep: u8) {}
}
