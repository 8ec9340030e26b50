// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the full-speed UDP controller (SAM3S, SAM4S, SAM7S).
//!
//! The UDP is a simple beast. Each endpoint has one control/status register
//! (CSR) and one FIFO data register (FDR) that you read or write a byte at a
//! time. Some endpoints have two banks ("ping-pong"), which is handled by the
//! hardware alternating between them behind the single FDR.
//!
//! The CSR is the tricky part. It mixes bits you set by writing 1, bits you
//! clear by writing 0, and bits that are set by the hardware and cleared by
//! software writing 0, all in one register. Worse, writes to it cross a clock
//! domain and take a few cycles to land. So every CSR update here goes through
//! `set_csr`/`clear_csr`, which write the "no effect" value to the bits we're
//! not touching, and then spin until the write is visible.
//!
//! There are no per-event interrupt enables in the CSR: the endpoint's bit in
//! IER/IDR gates all of them. We keep the set of events the stack asked for in
//! software, enable the endpoint's interrupt whenever that set is non-empty,
//! and filter the CSR through it when reporting.

use bitflags::bitflags;
use log::{trace, warn};
use vcell::VolatileCell;

use crate::descriptor::{Direction, TransferType};
use crate::peripheral::{
    Capabilities, DeviceEvents, EndpointConfig, EndpointEvents, Pending, PeripheralOps, UsbClocks,
};
use crate::setup::TestMode;

cfg_if::cfg_if! {
    if #[cfg(feature = "sam7s")] {
        const ENDPOINTS: usize = 4;
        const FIFO_SIZE: [u16; ENDPOINTS] = [8, 64, 64, 64];
        const BANKS: [u8; ENDPOINTS] = [1, 2, 2, 1];
    } else {
        const ENDPOINTS: usize = 8;
        const FIFO_SIZE: [u16; ENDPOINTS] = [64, 64, 64, 64, 512, 512, 64, 64];
        const BANKS: [u8; ENDPOINTS] = [1, 2, 2, 1, 2, 2, 2, 2];
    }
}

/// How long to wait for a CSR write to land before giving up on it.
const CSR_SYNC_SPINS: u32 = 1_000;

/// UDP register block.
#[repr(C)]
pub struct Registers {
    pub frm_num: VolatileCell<u32>,
    pub glb_stat: VolatileCell<u32>,
    pub faddr: VolatileCell<u32>,
    _reserved0: VolatileCell<u32>,
    pub ier: VolatileCell<u32>,
    pub idr: VolatileCell<u32>,
    pub imr: VolatileCell<u32>,
    pub isr: VolatileCell<u32>,
    pub icr: VolatileCell<u32>,
    _reserved1: VolatileCell<u32>,
    pub rst_ep: VolatileCell<u32>,
    _reserved2: VolatileCell<u32>,
    pub csr: [VolatileCell<u32>; 8],
    pub fdr: [VolatileCell<u32>; 8],
    _reserved3: VolatileCell<u32>,
    pub txvc: VolatileCell<u32>,
}

const _: () = assert!(core::mem::size_of::<Registers>() == 0x78);

bitflags! {
    /// Single-bit fields of an endpoint CSR.
    struct Csr: u32 {
        const TXCOMP = 1 << 0;
        const RX_DATA_BK0 = 1 << 1;
        const RXSETUP = 1 << 2;
        const STALLSENT = 1 << 3;
        const TXPKTRDY = 1 << 4;
        const FORCESTALL = 1 << 5;
        const RX_DATA_BK1 = 1 << 6;
        const DIR = 1 << 7;
        const DTGLE = 1 << 11;
        const EPEDS = 1 << 15;
    }
}

/// Bits that software clears by writing 0, and that a write of 1 leaves
/// alone.
const CSR_NO_EFFECT: Csr = Csr::from_bits_truncate(
    Csr::RX_DATA_BK0.bits()
        | Csr::RX_DATA_BK1.bits()
        | Csr::STALLSENT.bits()
        | Csr::RXSETUP.bits()
        | Csr::TXCOMP.bits(),
);

const CSR_EPTYPE_SHIFT: u32 = 8;
const CSR_EPTYPE_MASK: u32 = 0b111 << CSR_EPTYPE_SHIFT;
const CSR_RXBYTECNT_SHIFT: u32 = 16;
const CSR_RXBYTECNT_MASK: u32 = 0x7FF;

bitflags! {
    /// Device-level interrupt bits, shared by IER/IDR/IMR/ISR/ICR. Bits 0-7
    /// are the endpoints.
    struct Int: u32 {
        const RXSUSP = 1 << 8;
        const RXRSM = 1 << 9;
        const SOFINT = 1 << 11;
        const ENDBUSRES = 1 << 12;
        const WAKEUP = 1 << 13;
    }
}

const GLB_STAT_FADDEN: u32 = 1 << 0;
const GLB_STAT_CONFG: u32 = 1 << 1;
const GLB_STAT_ESR: u32 = 1 << 2;
const GLB_STAT_RMWUPE: u32 = 1 << 4;
const FADDR_FEN: u32 = 1 << 8;
const TXVC_TXVDIS: u32 = 1 << 8;
const TXVC_PUON: u32 = 1 << 9;

fn endpoint_type(kind: TransferType, direction: Direction) -> u32 {
    match (kind, direction) {
        (TransferType::Control, _) => 0,
        (TransferType::Isochronous, Direction::Out) => 1,
        (TransferType::Bulk, Direction::Out) => 2,
        (TransferType::Interrupt, Direction::Out) => 3,
        (TransferType::Isochronous, Direction::In) => 5,
        (TransferType::Bulk, Direction::In) => 6,
        (TransferType::Interrupt, Direction::In) => 7,
    }
}

fn device_bits(events: DeviceEvents) -> Int {
    let mut bits = Int::empty();
    if events.contains(DeviceEvents::END_OF_RESET) {
        bits |= Int::ENDBUSRES;
    }
    if events.contains(DeviceEvents::SUSPEND) {
        bits |= Int::RXSUSP;
    }
    if events.contains(DeviceEvents::RESUME) {
        bits |= Int::RXRSM | Int::WAKEUP;
    }
    if events.contains(DeviceEvents::START_OF_FRAME) {
        bits |= Int::SOFINT;
    }
    bits
}

fn device_events(bits: Int) -> DeviceEvents {
    let mut events = DeviceEvents::empty();
    if bits.contains(Int::ENDBUSRES) {
        events |= DeviceEvents::END_OF_RESET;
    }
    if bits.contains(Int::RXSUSP) {
        events |= DeviceEvents::SUSPEND;
    }
    if bits.intersects(Int::RXRSM | Int::WAKEUP) {
        events |= DeviceEvents::RESUME;
    }
    if bits.contains(Int::SOFINT) {
        events |= DeviceEvents::START_OF_FRAME;
    }
    events
}

/// A UDP controller and the clocks feeding it.
pub struct Udp<C> {
    regs: &'static Registers,
    clocks: C,
    /// Device events the stack has enabled. The UDP reports bus resets
    /// whether or not they're enabled, so we keep our own copy to filter by.
    enabled: DeviceEvents,
    listening: [EndpointEvents; ENDPOINTS],
    /// Bank the next OUT packet will be read from on ping-pong endpoints.
    rx_bank: [u8; ENDPOINTS],
}

// Safety: the driver is the only thing with a reference to the registers, so
// moving it moves all access with it.
unsafe impl<C: Send> Send for Udp<C> {}

impl<C: UsbClocks> Udp<C> {
    /// # Safety
    ///
    /// `regs` must point at the UDP register block, and nothing else may
    /// touch the controller while the driver exists.
    pub unsafe fn new(regs: *const Registers, clocks: C) -> Self {
        Self {
            regs: &*regs,
            clocks,
            enabled: DeviceEvents::empty(),
            listening: [EndpointEvents::empty(); ENDPOINTS],
            rx_bank: [0; ENDPOINTS],
        }
    }

    fn csr(&self, ep: u8) -> Csr {
        Csr::from_bits_truncate(self.regs.csr[usize::from(ep)].get())
    }

    fn set_csr(&self, ep: u8, bits: Csr) {
        let reg = &self.regs.csr[usize::from(ep)];
        reg.set(reg.get() | CSR_NO_EFFECT.bits() | bits.bits());
        self.sync_csr(ep, bits, bits);
    }

    fn clear_csr(&self, ep: u8, bits: Csr) {
        let reg = &self.regs.csr[usize::from(ep)];
        reg.set((reg.get() | CSR_NO_EFFECT.bits()) & !bits.bits());
        self.sync_csr(ep, bits, Csr::empty());
    }

    fn sync_csr(&self, ep: u8, bits: Csr, want: Csr) {
        for _ in 0..CSR_SYNC_SPINS {
            if self.csr(ep) & bits == want {
                return;
            }
        }
        warn!("udp: ep{ep} CSR {:?} didn't settle to {want:?}", bits);
    }

    fn update_endpoint_irq(&self, ep: u8) {
        if self.listening[usize::from(ep)].is_empty() {
            self.regs.idr.set(1 << ep);
        } else {
            self.regs.ier.set(1 << ep);
        }
    }

    /// CSR flag for the bank holding the oldest unread OUT packet.
    fn out_bank(&self, ep: u8) -> Csr {
        let csr = self.csr(ep);
        let bk0 = csr.contains(Csr::RX_DATA_BK0);
        let bk1 = csr.contains(Csr::RX_DATA_BK1);
        match (bk0, bk1) {
            (true, false) => Csr::RX_DATA_BK0,
            (false, true) => Csr::RX_DATA_BK1,
            _ if self.rx_bank[usize::from(ep)] == 1 => Csr::RX_DATA_BK1,
            _ => Csr::RX_DATA_BK0,
        }
    }
}

impl<C: UsbClocks> PeripheralOps for Udp<C> {
    fn endpoint_count(&self) -> usize {
        ENDPOINTS
    }

    fn capabilities(&self, ep: u8) -> Capabilities {
        let i = usize::from(ep);
        Capabilities {
            max_packet: FIFO_SIZE[i],
            banks: BANKS[i],
            dma: false,
        }
    }

    fn init(&mut self) {
        self.clocks.enable();
        self.regs.idr.set(!0);
        self.regs.icr.set(!0);
        self.regs.glb_stat.set(0);
        self.regs.faddr.set(FADDR_FEN);
        // Transceiver on, pull-up off.
        self.regs.txvc.set(0);
        self.enabled = DeviceEvents::empty();
    }

    fn attach(&mut self) {
        let txvc = self.regs.txvc.get();
        self.regs.txvc.set(txvc | TXVC_PUON);
    }

    fn detach(&mut self) {
        let txvc = self.regs.txvc.get();
        self.regs.txvc.set(txvc & !TXVC_PUON);
    }

    fn set_address(&mut self, address: u8) {
        self.regs.faddr.set(FADDR_FEN | u32::from(address & 0x7F));
        let glb = self.regs.glb_stat.get() & !GLB_STAT_FADDEN;
        self.regs
            .glb_stat
            .set(if address != 0 { glb | GLB_STAT_FADDEN } else { glb });
    }

    fn set_configured(&mut self, configured: bool) {
        let glb = self.regs.glb_stat.get() & !GLB_STAT_CONFG;
        self.regs
            .glb_stat
            .set(if configured { glb | GLB_STAT_CONFG } else { glb });
    }

    fn suspend(&mut self) {
        let txvc = self.regs.txvc.get();
        self.regs.txvc.set(txvc | TXVC_TXVDIS);
        self.clocks.disable();
    }

    fn resume(&mut self) {
        self.clocks.enable();
        let txvc = self.regs.txvc.get();
        self.regs.txvc.set(txvc & !TXVC_TXVDIS);
    }

    fn remote_wakeup(&mut self) {
        // ESR fires resume signaling on its rising edge.
        let glb = self.regs.glb_stat.get() | GLB_STAT_RMWUPE;
        self.regs.glb_stat.set(glb & !GLB_STAT_ESR);
        self.regs.glb_stat.set(glb | GLB_STAT_ESR);
    }

    fn is_high_speed(&self) -> bool {
        false
    }

    fn enter_test_mode(&mut self, mode: TestMode) -> ! {
        // Test modes only exist at high speed, which this controller can't
        // do. The request never gets this far, but the contract says we don't
        // come back.
        warn!("udp: no test mode support, parking ({mode:?})");
        loop {
            core::hint::spin_loop();
        }
    }

    fn enable_interrupts(&mut self, events: DeviceEvents) {
        self.enabled |= events;
        self.regs.ier.set(device_bits(events).bits());
    }

    fn disable_interrupts(&mut self, events: DeviceEvents) {
        self.enabled &= !events;
        self.regs.idr.set(device_bits(events).bits());
    }

    fn pending(&self) -> Pending {
        let isr = self.regs.isr.get();
        let device = device_events(Int::from_bits_truncate(isr)) & self.enabled;
        let mut endpoints = 0;
        for ep in 0..ENDPOINTS as u8 {
            if isr & (1 << ep) != 0 && !self.endpoint_events(ep).is_empty() {
                endpoints |= 1 << ep;
            }
        }
        Pending {
            device,
            endpoints,
            dma: 0,
        }
    }

    fn clear(&mut self, events: DeviceEvents) {
        self.regs.icr.set(device_bits(events).bits());
    }

    fn endpoint_reset(&mut self, ep: u8) {
        let rst = self.regs.rst_ep.get();
        self.regs.rst_ep.set(rst | 1 << ep);
        self.regs.rst_ep.set(rst & !(1 << ep));
        self.rx_bank[usize::from(ep)] = 0;
    }

    fn endpoint_configure(&mut self, ep: u8, config: &EndpointConfig) {
        let kind = endpoint_type(config.kind, config.direction) << CSR_EPTYPE_SHIFT;
        let reg = &self.regs.csr[usize::from(ep)];
        let csr = reg.get() & !CSR_EPTYPE_MASK;
        reg.set(csr | CSR_NO_EFFECT.bits() | Csr::EPEDS.bits() | kind);
        self.sync_csr(ep, Csr::EPEDS, Csr::EPEDS);
        trace!("udp: ep{ep} type {}", kind >> CSR_EPTYPE_SHIFT);
    }

    fn endpoint_disable(&mut self, ep: u8) {
        self.listening[usize::from(ep)] = EndpointEvents::empty();
        self.regs.idr.set(1 << ep);
        self.clear_csr(ep, Csr::EPEDS);
    }

    fn endpoint_listen(&mut self, ep: u8, events: EndpointEvents) {
        self.listening[usize::from(ep)] |= events;
        self.update_endpoint_irq(ep);
    }

    fn endpoint_unlisten(&mut self, ep: u8, events: EndpointEvents) {
        self.listening[usize::from(ep)] &= !events;
        self.update_endpoint_irq(ep);
    }

    fn endpoint_events(&self, ep: u8) -> EndpointEvents {
        let csr = self.csr(ep);
        let mut events = EndpointEvents::empty();
        if csr.contains(Csr::RXSETUP) {
            events |= EndpointEvents::SETUP;
        }
        if csr.contains(Csr::TXCOMP) {
            events |= EndpointEvents::IN_COMPLETE;
        }
        if csr.intersects(Csr::RX_DATA_BK0 | Csr::RX_DATA_BK1) {
            events |= EndpointEvents::OUT_RECEIVED;
        }
        if csr.contains(Csr::STALLSENT) {
            events |= EndpointEvents::STALL_SENT;
        }
        events & self.listening[usize::from(ep)]
    }

    fn set_stall(&mut self, ep: u8) {
        self.set_csr(ep, Csr::FORCESTALL);
    }

    fn clear_stall(&mut self, ep: u8) {
        self.clear_csr(ep, Csr::FORCESTALL);
    }

    fn is_stalled(&self, ep: u8) -> bool {
        self.csr(ep).contains(Csr::FORCESTALL)
    }

    fn ack_stall_sent(&mut self, ep: u8) {
        self.clear_csr(ep, Csr::STALLSENT);
    }

    fn read_setup(&mut self, ep: u8) -> [u8; 8] {
        let mut raw = [0; 8];
        for b in &mut raw {
            *b = self.regs.fdr[usize::from(ep)].get() as u8;
        }
        raw
    }

    fn set_control_direction(&mut self, ep: u8, direction: Direction) {
        match direction {
            Direction::In => self.set_csr(ep, Csr::DIR),
            Direction::Out => self.clear_csr(ep, Csr::DIR),
        }
    }

    fn ack_setup(&mut self, ep: u8) {
        self.clear_csr(ep, Csr::RXSETUP);
    }

    fn write_fifo(&mut self, ep: u8, data: &[u8]) {
        let fdr = &self.regs.fdr[usize::from(ep)];
        for &b in data {
            fdr.set(u32::from(b));
        }
    }

    fn commit_in(&mut self, ep: u8) {
        self.set_csr(ep, Csr::TXPKTRDY);
    }

    fn ack_in_complete(&mut self, ep: u8) {
        self.clear_csr(ep, Csr::TXCOMP);
    }

    fn cancel_in(&mut self, ep: u8) {
        self.clear_csr(ep, Csr::TXPKTRDY);
        // Flushes the second bank too, which clearing TXPKTRDY doesn't. A
        // single-bank endpoint has nothing more to flush, and on a control
        // endpoint the reset would take a waiting SETUP packet with it.
        if BANKS[usize::from(ep)] > 1 {
            let rst = self.regs.rst_ep.get();
            self.regs.rst_ep.set(rst | 1 << ep);
            self.regs.rst_ep.set(rst & !(1 << ep));
        }
        if self.csr(ep).contains(Csr::TXCOMP) {
            self.clear_csr(ep, Csr::TXCOMP);
        }
    }

    fn out_byte_count(&self, ep: u8) -> usize {
        let csr = self.regs.csr[usize::from(ep)].get();
        ((csr >> CSR_RXBYTECNT_SHIFT) & CSR_RXBYTECNT_MASK) as usize
    }

    fn read_fifo(&mut self, ep: u8, buf: &mut [u8]) {
        let fdr = &self.regs.fdr[usize::from(ep)];
        for b in buf {
            *b = fdr.get() as u8;
        }
    }

    fn release_out(&mut self, ep: u8) {
        let i = usize::from(ep);
        let bank = self.out_bank(ep);
        self.clear_csr(ep, bank);
        if BANKS[i] > 1 {
            self.rx_bank[i] = if bank == Csr::RX_DATA_BK0 { 1 } else { 0 };
        }
    }
}
