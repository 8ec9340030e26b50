// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driver for the high-speed UDPHS controller (SAM3U, SAM3X).
//!
//! Compared to the UDP this one is pleasant to program. Every per-endpoint
//! control bit has separate enable and disable registers, and every status
//! flag has separate set and clear registers, so there are no read-modify-
//! write races and no clock-domain settling to wait out.
//!
//! Endpoint data lives in a dual-ported RAM that's mapped as one 64 KiB
//! window per endpoint, separately from the registers. The hardware keeps
//! track of which bank a read or write lands in, so packets always start at
//! the beginning of the window.
//!
//! Most endpoints also have a DMA channel, which can move up to 64 KiB
//! between memory and the endpoint's banks without bothering us per packet.

use log::{debug, trace, warn};
use vcell::VolatileCell;

use crate::descriptor::{Direction, TransferType};
use crate::peripheral::{
    Capabilities, DeviceEvents, EndpointConfig, EndpointEvents, Pending, PeripheralOps, UsbClocks,
};
use crate::setup::TestMode;

const ENDPOINTS: usize = 7;
const FIFO_SIZE: [u16; ENDPOINTS] = [64, 512, 512, 64, 64, 1024, 1024];
const BANKS: [u8; ENDPOINTS] = [1, 2, 2, 3, 3, 3, 3];
const HAS_DMA: [bool; ENDPOINTS] = [false, true, true, true, true, true, true];

/// Distance between endpoint windows in the FIFO RAM.
const FIFO_WINDOW: usize = 0x1_0000;

/// How many times to look for a killed bank to go away.
const KILL_BANK_SPINS: u32 = 1_000;

#[repr(C)]
pub struct EndpointRegisters {
    pub cfg: VolatileCell<u32>,
    pub ctlenb: VolatileCell<u32>,
    pub ctldis: VolatileCell<u32>,
    pub ctl: VolatileCell<u32>,
    _reserved: VolatileCell<u32>,
    pub setsta: VolatileCell<u32>,
    pub clrsta: VolatileCell<u32>,
    pub sta: VolatileCell<u32>,
}

#[repr(C)]
pub struct DmaRegisters {
    pub nxtdsc: VolatileCell<u32>,
    pub address: VolatileCell<u32>,
    pub control: VolatileCell<u32>,
    pub status: VolatileCell<u32>,
}

/// UDPHS register block.
#[repr(C)]
pub struct Registers {
    pub ctrl: VolatileCell<u32>,
    pub fnum: VolatileCell<u32>,
    _reserved0: [VolatileCell<u32>; 2],
    pub ien: VolatileCell<u32>,
    pub intsta: VolatileCell<u32>,
    pub clrint: VolatileCell<u32>,
    pub eptrst: VolatileCell<u32>,
    _reserved1: [VolatileCell<u32>; 48],
    pub tst: VolatileCell<u32>,
    _reserved2: [VolatileCell<u32>; 7],
    pub ept: [EndpointRegisters; 16],
    pub dma: [DmaRegisters; 8],
}

const _: () = assert!(core::mem::size_of::<EndpointRegisters>() == 0x20);
const _: () = assert!(core::mem::size_of::<Registers>() == 0x380);

const CTRL_DEV_ADDR_MASK: u32 = 0x7F;
const CTRL_FADDR_EN: u32 = 1 << 7;
const CTRL_EN_UDPHS: u32 = 1 << 8;
const CTRL_DETACH: u32 = 1 << 9;
const CTRL_REWAKEUP: u32 = 1 << 10;
const CTRL_PULLD_DIS: u32 = 1 << 11;

// IEN / INTSTA / CLRINT
const INT_SPEED: u32 = 1 << 0;
const INT_DET_SUSPD: u32 = 1 << 1;
const INT_MICRO_SOF: u32 = 1 << 2;
const INT_SOF: u32 = 1 << 3;
const INT_ENDRESET: u32 = 1 << 4;
const INT_WAKE_UP: u32 = 1 << 5;
const INT_ENDOFRSM: u32 = 1 << 6;
const INT_UPSTR_RES: u32 = 1 << 7;
const INT_EPT_SHIFT: u32 = 8;
const INT_DMA_SHIFT: u32 = 24;

const TST_SPEED_CFG_MASK: u32 = 0b11;
const TST_SPEED_CFG_HIGH: u32 = 2;
const TST_J: u32 = 1 << 2;
const TST_K: u32 = 1 << 3;
const TST_PKT: u32 = 1 << 4;

const EPTCFG_SIZE_MASK: u32 = 0b111;
const EPTCFG_DIR_IN: u32 = 1 << 3;
const EPTCFG_TYPE_SHIFT: u32 = 4;
const EPTCFG_BK_SHIFT: u32 = 6;
const EPTCFG_NB_TRANS_1: u32 = 1 << 8;
const EPTCFG_MAPD: u32 = 1 << 31;

// EPTCTLENB / EPTCTLDIS / EPTCTL
const CTL_EPT_ENABL: u32 = 1 << 0;
const CTL_AUTO_VALID: u32 = 1 << 1;
const CTL_INTDIS_DMA: u32 = 1 << 3;

// Shared between EPTCTL*, EPTSETSTA, EPTCLRSTA, and EPTSTA, where they exist.
const STA_FRCESTALL: u32 = 1 << 5;
const STA_TOGGLESQ: u32 = 1 << 6;
const STA_RX_BK_RDY: u32 = 1 << 9;
const STA_KILL_BANK: u32 = 1 << 9;
const STA_TX_COMPLT: u32 = 1 << 10;
const STA_TX_PK_RDY: u32 = 1 << 11;
const STA_RX_SETUP: u32 = 1 << 12;
const STA_STALL_SNT: u32 = 1 << 13;
const STA_BYTE_COUNT_SHIFT: u32 = 20;
const STA_BYTE_COUNT_MASK: u32 = 0x7FF;

const DMA_CHANN_ENB: u32 = 1 << 0;
const DMA_END_TR_EN: u32 = 1 << 2;
const DMA_END_B_EN: u32 = 1 << 3;
const DMA_END_TR_IT: u32 = 1 << 4;
const DMA_END_BUFFIT: u32 = 1 << 5;
const DMA_LENGTH_SHIFT: u32 = 16;

/// The packet `TEST_MODE(Packet)` sends over and over, from USB 2.0 section
/// 7.1.20, minus the PID and CRC the hardware adds.
pub const TEST_PACKET: [u8; 53] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, //
    0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, //
    0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE, 0xEE, //
    0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, //
    0x7F, 0xBF, 0xDF, 0xEF, 0xF7, 0xFB, 0xFD, //
    0xFC, 0x7E, 0xBF, 0xDF, 0xEF, 0xF7, 0xFB, 0xFD, 0x7E,
];

/// Endpoint used to send `TEST_PACKET`.
const TEST_PACKET_EP: u8 = 2;

fn event_bits(events: EndpointEvents) -> u32 {
    let mut bits = 0;
    if events.contains(EndpointEvents::SETUP) {
        bits |= STA_RX_SETUP;
    }
    if events.contains(EndpointEvents::IN_COMPLETE) {
        bits |= STA_TX_COMPLT;
    }
    if events.contains(EndpointEvents::OUT_RECEIVED) {
        bits |= STA_RX_BK_RDY;
    }
    if events.contains(EndpointEvents::STALL_SENT) {
        bits |= STA_STALL_SNT;
    }
    bits
}

fn device_bits(events: DeviceEvents) -> u32 {
    let mut bits = 0;
    if events.contains(DeviceEvents::END_OF_RESET) {
        bits |= INT_ENDRESET;
    }
    if events.contains(DeviceEvents::SUSPEND) {
        bits |= INT_DET_SUSPD;
    }
    if events.contains(DeviceEvents::RESUME) {
        bits |= INT_WAKE_UP | INT_ENDOFRSM;
    }
    if events.contains(DeviceEvents::START_OF_FRAME) {
        bits |= INT_SOF;
    }
    bits
}

fn device_events(bits: u32) -> DeviceEvents {
    let mut events = DeviceEvents::empty();
    if bits & INT_ENDRESET != 0 {
        events |= DeviceEvents::END_OF_RESET;
    }
    if bits & INT_DET_SUSPD != 0 {
        events |= DeviceEvents::SUSPEND;
    }
    if bits & (INT_WAKE_UP | INT_ENDOFRSM) != 0 {
        events |= DeviceEvents::RESUME;
    }
    if bits & INT_SOF != 0 {
        events |= DeviceEvents::START_OF_FRAME;
    }
    events
}

/// EPTCFG size code: packets of `8 << code` bytes.
fn size_code(max_packet: u16) -> u32 {
    let size = u32::from(max_packet.clamp(8, 1024)).next_power_of_two();
    size.trailing_zeros() - 3
}

/// A UDPHS controller, its FIFO RAM, and the clocks feeding it.
pub struct Udphs<C> {
    regs: &'static Registers,
    fifo: *mut u8,
    clocks: C,
}

// Safety: the driver is the only thing with access to the registers and the
// FIFO RAM, so moving it moves all access with it.
unsafe impl<C: Send> Send for Udphs<C> {}

impl<C: UsbClocks> Udphs<C> {
    /// # Safety
    ///
    /// `regs` must point at the UDPHS register block and `fifo` at the start
    /// of its FIFO RAM, and nothing else may touch either while the driver
    /// exists.
    pub unsafe fn new(regs: *const Registers, fifo: *mut u8, clocks: C) -> Self {
        Self {
            regs: &*regs,
            fifo,
            clocks,
        }
    }

    fn ept(&self, ep: u8) -> &EndpointRegisters {
        &self.regs.ept[usize::from(ep)]
    }

    fn window(&self, ep: u8) -> *mut u8 {
        self.fifo.wrapping_add(usize::from(ep) * FIFO_WINDOW)
    }

    fn set_speed_config(&self, extra: u32) {
        let tst = self.regs.tst.get() & !TST_SPEED_CFG_MASK;
        self.regs.tst.set(tst | TST_SPEED_CFG_HIGH | extra);
    }

    fn send_test_packet(&mut self) {
        let ep = TEST_PACKET_EP;
        self.endpoint_configure(
            ep,
            &EndpointConfig {
                kind: TransferType::Bulk,
                direction: Direction::In,
                max_packet: 64,
                banks: 1,
                dma: false,
            },
        );
        self.write_fifo(ep, &TEST_PACKET);
        self.set_speed_config(TST_PKT);
        self.ept(ep).setsta.set(STA_TX_PK_RDY);
    }
}

impl<C: UsbClocks> PeripheralOps for Udphs<C> {
    fn endpoint_count(&self) -> usize {
        ENDPOINTS
    }

    fn capabilities(&self, ep: u8) -> Capabilities {
        let i = usize::from(ep);
        Capabilities {
            max_packet: FIFO_SIZE[i],
            banks: BANKS[i],
            dma: HAS_DMA[i],
        }
    }

    fn init(&mut self) {
        self.clocks.enable();
        self.regs.ctrl.set(CTRL_EN_UDPHS | CTRL_DETACH);
        self.regs.ien.set(0);
        self.regs.clrint.set(
            INT_DET_SUSPD
                | INT_MICRO_SOF
                | INT_SOF
                | INT_ENDRESET
                | INT_WAKE_UP
                | INT_ENDOFRSM
                | INT_UPSTR_RES,
        );
        // Normal operation, high speed allowed.
        self.regs.tst.set(0);
    }

    fn attach(&mut self) {
        let ctrl = self.regs.ctrl.get() & !CTRL_DETACH;
        self.regs.ctrl.set(ctrl | CTRL_PULLD_DIS);
    }

    fn detach(&mut self) {
        let ctrl = self.regs.ctrl.get() & !CTRL_PULLD_DIS;
        self.regs.ctrl.set(ctrl | CTRL_DETACH);
    }

    fn set_address(&mut self, address: u8) {
        let ctrl = self.regs.ctrl.get() & !(CTRL_DEV_ADDR_MASK | CTRL_FADDR_EN);
        let address = u32::from(address) & CTRL_DEV_ADDR_MASK;
        self.regs.ctrl.set(if address != 0 {
            ctrl | address | CTRL_FADDR_EN
        } else {
            ctrl
        });
    }

    fn set_configured(&mut self, _configured: bool) {
        // Nothing in the hardware cares.
    }

    fn suspend(&mut self) {
        self.clocks.disable();
    }

    fn resume(&mut self) {
        self.clocks.enable();
    }

    fn remote_wakeup(&mut self) {
        let ctrl = self.regs.ctrl.get();
        self.regs.ctrl.set(ctrl | CTRL_REWAKEUP);
    }

    fn is_high_speed(&self) -> bool {
        self.regs.intsta.get() & INT_SPEED != 0
    }

    fn enter_test_mode(&mut self, mode: TestMode) -> ! {
        debug!("udphs: test mode {mode:?}");
        match mode {
            TestMode::J => self.set_speed_config(TST_J),
            TestMode::K => self.set_speed_config(TST_K),
            TestMode::Se0Nak | TestMode::ForceEnable => self.set_speed_config(0),
            TestMode::Packet => self.send_test_packet(),
        }
        // Only a power cycle gets us out of here.
        loop {
            core::hint::spin_loop();
        }
    }

    fn enable_interrupts(&mut self, events: DeviceEvents) {
        let ien = self.regs.ien.get();
        self.regs.ien.set(ien | device_bits(events));
    }

    fn disable_interrupts(&mut self, events: DeviceEvents) {
        let ien = self.regs.ien.get();
        self.regs.ien.set(ien & !device_bits(events));
    }

    fn pending(&self) -> Pending {
        let active = self.regs.intsta.get() & self.regs.ien.get();
        let mut endpoints = 0;
        for ep in 0..ENDPOINTS as u8 {
            if active & (1 << (INT_EPT_SHIFT + u32::from(ep))) != 0
                && !self.endpoint_events(ep).is_empty()
            {
                endpoints |= 1 << ep;
            }
        }
        Pending {
            device: device_events(active),
            endpoints,
            dma: (active >> INT_DMA_SHIFT) & 0xFF,
        }
    }

    fn clear(&mut self, events: DeviceEvents) {
        self.regs.clrint.set(device_bits(events));
    }

    fn endpoint_reset(&mut self, ep: u8) {
        self.regs.eptrst.set(1 << ep);
        self.ept(ep).clrsta.set(STA_TOGGLESQ);
    }

    fn endpoint_configure(&mut self, ep: u8, config: &EndpointConfig) {
        let kind = config.kind as u32;
        let mut cfg = size_code(config.max_packet)
            | kind << EPTCFG_TYPE_SHIFT
            | u32::from(config.banks) << EPTCFG_BK_SHIFT;
        if config.kind != TransferType::Control && config.direction == Direction::In {
            cfg |= EPTCFG_DIR_IN;
        }
        if matches!(config.kind, TransferType::Isochronous | TransferType::Interrupt) {
            cfg |= EPTCFG_NB_TRANS_1;
        }
        let regs = self.ept(ep);
        regs.cfg.set(cfg);
        if regs.cfg.get() & EPTCFG_MAPD == 0 {
            warn!("udphs: ep{ep} config {cfg:#x} didn't map");
        }

        let mut ctl = CTL_EPT_ENABL;
        if config.dma {
            ctl |= CTL_AUTO_VALID | CTL_INTDIS_DMA;
        }
        regs.ctlenb.set(ctl);
        let ien = self.regs.ien.get();
        self.regs.ien.set(ien | 1 << (INT_EPT_SHIFT + u32::from(ep)));
        trace!(
            "udphs: ep{ep} size code {}",
            cfg & EPTCFG_SIZE_MASK
        );
    }

    fn endpoint_disable(&mut self, ep: u8) {
        self.ept(ep).ctldis.set(!0);
        let ien = self.regs.ien.get();
        self.regs.ien.set(ien & !(1 << (INT_EPT_SHIFT + u32::from(ep))));
    }

    fn endpoint_listen(&mut self, ep: u8, events: EndpointEvents) {
        self.ept(ep).ctlenb.set(event_bits(events));
    }

    fn endpoint_unlisten(&mut self, ep: u8, events: EndpointEvents) {
        self.ept(ep).ctldis.set(event_bits(events));
    }

    fn endpoint_events(&self, ep: u8) -> EndpointEvents {
        let regs = self.ept(ep);
        let active = regs.sta.get() & regs.ctl.get();
        let mut events = EndpointEvents::empty();
        if active & STA_RX_SETUP != 0 {
            events |= EndpointEvents::SETUP;
        }
        if active & STA_TX_COMPLT != 0 {
            events |= EndpointEvents::IN_COMPLETE;
        }
        if active & STA_RX_BK_RDY != 0 {
            events |= EndpointEvents::OUT_RECEIVED;
        }
        if active & STA_STALL_SNT != 0 {
            events |= EndpointEvents::STALL_SENT;
        }
        events
    }

    fn set_stall(&mut self, ep: u8) {
        self.ept(ep).setsta.set(STA_FRCESTALL);
    }

    fn clear_stall(&mut self, ep: u8) {
        self.ept(ep).clrsta.set(STA_FRCESTALL);
    }

    fn is_stalled(&self, ep: u8) -> bool {
        self.ept(ep).sta.get() & STA_FRCESTALL != 0
    }

    fn ack_stall_sent(&mut self, ep: u8) {
        self.ept(ep).clrsta.set(STA_STALL_SNT);
    }

    fn read_setup(&mut self, ep: u8) -> [u8; 8] {
        let mut raw = [0; 8];
        self.read_fifo(ep, &mut raw);
        raw
    }

    fn set_control_direction(&mut self, _ep: u8, _direction: Direction) {
        // The controller follows the SETUP packet's direction bit by itself.
    }

    fn ack_setup(&mut self, ep: u8) {
        self.ept(ep).clrsta.set(STA_RX_SETUP);
    }

    fn write_fifo(&mut self, ep: u8, data: &[u8]) {
        let window = self.window(ep);
        for (i, &b) in data.iter().enumerate() {
            // Safety: the window is FIFO_WINDOW bytes long and no packet is
            // larger than 1024.
            unsafe { core::ptr::write_volatile(window.add(i), b) }
        }
    }

    fn commit_in(&mut self, ep: u8) {
        self.ept(ep).setsta.set(STA_TX_PK_RDY);
    }

    fn ack_in_complete(&mut self, ep: u8) {
        self.ept(ep).clrsta.set(STA_TX_COMPLT);
    }

    fn cancel_in(&mut self, ep: u8) {
        let regs = self.ept(ep);
        // Each KILL_BANK throws away the most recently committed bank.
        for _ in 0..BANKS[usize::from(ep)] {
            if regs.sta.get() & STA_TX_PK_RDY == 0 {
                break;
            }
            regs.setsta.set(STA_KILL_BANK);
            let mut spins = 0;
            while regs.sta.get() & STA_KILL_BANK != 0 {
                spins += 1;
                if spins == KILL_BANK_SPINS {
                    warn!("udphs: ep{ep} bank won't die");
                    break;
                }
            }
        }
        regs.clrsta.set(STA_TX_COMPLT);
    }

    fn out_byte_count(&self, ep: u8) -> usize {
        ((self.ept(ep).sta.get() >> STA_BYTE_COUNT_SHIFT) & STA_BYTE_COUNT_MASK) as usize
    }

    fn read_fifo(&mut self, ep: u8, buf: &mut [u8]) {
        let window = self.window(ep);
        for (i, b) in buf.iter_mut().enumerate() {
            // Safety: as in write_fifo.
            *b = unsafe { core::ptr::read_volatile(window.add(i)) };
        }
    }

    fn release_out(&mut self, ep: u8) {
        self.ept(ep).clrsta.set(STA_RX_BK_RDY);
    }

    unsafe fn dma_start(&mut self, ep: u8, direction: Direction, addr: *mut u8, len: usize) {
        let ch = &self.regs.dma[usize::from(ep)];
        ch.control.set(0);
        ch.address.set(addr as usize as u32);
        // A length field of zero means 64 KiB.
        let mut control = ((len as u32) & 0xFFFF) << DMA_LENGTH_SHIFT
            | DMA_CHANN_ENB
            | DMA_END_B_EN
            | DMA_END_BUFFIT;
        if direction == Direction::Out {
            // Stop early on a short packet.
            control |= DMA_END_TR_EN | DMA_END_TR_IT;
        }
        ch.control.set(control);
        let ien = self.regs.ien.get();
        self.regs.ien.set(ien | 1 << (INT_DMA_SHIFT + u32::from(ep)));
        trace!("udphs: ep{ep} dma {direction:?} {len} bytes");
    }

    fn dma_finish(&mut self, ep: u8) -> usize {
        let ch = &self.regs.dma[usize::from(ep)];
        // Reading STATUS also acknowledges the interrupt.
        let status = ch.status.get();
        let ien = self.regs.ien.get();
        self.regs.ien.set(ien & !(1 << (INT_DMA_SHIFT + u32::from(ep))));
        (status >> DMA_LENGTH_SHIFT) as usize
    }

    fn dma_stop(&mut self, ep: u8) {
        let ch = &self.regs.dma[usize::from(ep)];
        ch.control.set(0);
        let _ = ch.status.get();
        let ien = self.regs.ien.get();
        self.regs.ien.set(ien & !(1 << (INT_DMA_SHIFT + u32::from(ep))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn udphs() -> (Udphs<()>, &'static Registers, *mut u8) {
        // Safety: all-zeroes is a valid bit pattern for a block of cells.
        let regs: &'static Registers = Box::leak(Box::new(unsafe { core::mem::zeroed() }));
        let fifo = vec![0u8; ENDPOINTS * FIFO_WINDOW].leak().as_mut_ptr();
        let udphs = unsafe { Udphs::new(regs, fifo, ()) };
        (udphs, regs, fifo)
    }

    #[test]
    fn size_codes() {
        assert_eq!(size_code(8), 0);
        assert_eq!(size_code(64), 3);
        assert_eq!(size_code(512), 6);
        assert_eq!(size_code(1024), 7);
        // Odd sizes round up to the next FIFO size.
        assert_eq!(size_code(100), 4);
    }

    #[test]
    fn test_packet_length() {
        assert_eq!(TEST_PACKET.len(), 53);
        assert_eq!(TEST_PACKET[52], 0x7E);
    }

    #[test]
    fn bulk_in_config() {
        let (mut udphs, regs, _) = udphs();
        udphs.endpoint_configure(
            1,
            &EndpointConfig {
                kind: TransferType::Bulk,
                direction: Direction::In,
                max_packet: 512,
                banks: 2,
                dma: true,
            },
        );
        let cfg = regs.ept[1].cfg.get();
        assert_eq!(cfg & EPTCFG_SIZE_MASK, 6);
        assert_ne!(cfg & EPTCFG_DIR_IN, 0);
        assert_eq!((cfg >> EPTCFG_TYPE_SHIFT) & 0b11, 2);
        assert_eq!((cfg >> EPTCFG_BK_SHIFT) & 0b11, 2);
        assert_eq!(
            regs.ept[1].ctlenb.get(),
            CTL_EPT_ENABL | CTL_AUTO_VALID | CTL_INTDIS_DMA
        );
        assert_ne!(regs.ien.get() & 1 << (INT_EPT_SHIFT + 1), 0);
    }

    #[test]
    fn fifo_windows() {
        let (mut udphs, _, fifo) = udphs();
        udphs.write_fifo(2, &[1, 2, 3]);
        let written = unsafe { core::slice::from_raw_parts(fifo.add(2 * FIFO_WINDOW), 3) };
        assert_eq!(written, &[1, 2, 3]);

        let setup = [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00];
        unsafe { core::ptr::copy_nonoverlapping(setup.as_ptr(), fifo, setup.len()) };
        assert_eq!(udphs.read_setup(0), [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x40, 0x00]);
    }

    #[test]
    fn pending_masks_by_ien() {
        let (mut udphs, regs, _) = udphs();
        regs.intsta.set(INT_ENDRESET | INT_SOF | 1 << (INT_DMA_SHIFT + 4));
        assert!(udphs.pending().is_empty());

        udphs.enable_interrupts(DeviceEvents::END_OF_RESET);
        assert_eq!(udphs.pending().device, DeviceEvents::END_OF_RESET);

        let mut buf = [0u8; 16];
        unsafe { udphs.dma_start(4, Direction::Out, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(udphs.pending().dma, 1 << 4);
        udphs.dma_stop(4);
        assert_eq!(udphs.pending().dma, 0);
    }

    #[test]
    fn dma_length_encoding() {
        let (mut udphs, regs, _) = udphs();
        let mut buf = vec![0u8; 0x1_0000];
        unsafe { udphs.dma_start(1, Direction::In, buf.as_mut_ptr(), buf.len()) };
        let control = regs.dma[1].control.get();
        assert_eq!(control >> DMA_LENGTH_SHIFT, 0);
        assert_eq!(control & DMA_END_TR_EN, 0);
        assert_ne!(control & DMA_CHANN_ENB, 0);

        regs.dma[1].status.set(0x20 << DMA_LENGTH_SHIFT);
        assert_eq!(udphs.dma_finish(1), 0x20);
    }

    #[test]
    fn endpoint_events_need_enable() {
        let (mut udphs, regs, _) = udphs();
        regs.ept[0].sta.set(STA_RX_SETUP | STA_TX_COMPLT | 8 << STA_BYTE_COUNT_SHIFT);
        assert!(udphs.endpoint_events(0).is_empty());
        // EPTCTL is read-only on the chip; stand in for what CTLENB would do.
        udphs.endpoint_listen(0, EndpointEvents::SETUP);
        regs.ept[0].ctl.set(regs.ept[0].ctlenb.get());
        assert_eq!(udphs.endpoint_events(0), EndpointEvents::SETUP);
        assert_eq!(udphs.out_byte_count(0), 8);
    }
}
