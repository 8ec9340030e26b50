// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-endpoint transfer state machine.
//!
//! Each hardware endpoint gets one `Endpoint` record in a fixed array. An
//! endpoint is `Idle` until someone starts a transfer on it, at which point it
//! carries a `Transfer` describing the caller's buffer and how far we've got
//! through it. Hardware events then push the transfer along a packet (or a
//! DMA chunk) at a time until it ends, and the end produces exactly one
//! `Completion` handing the buffer back.
//!
//! Byte accounting, which the tests lean on:
//!
//! - `remaining`: bytes not yet handed to the hardware.
//! - `buffered`: bytes handed to the hardware but not yet confirmed. On OUT
//!   endpoints this also absorbs any bytes the host sent past the end of the
//!   caller's buffer, which are dropped.
//! - `transferred`: bytes confirmed moved.
//!
//! For IN transfers the three always add up to the buffer length.

use core::mem;

use log::{debug, trace, warn};

use crate::descriptor::{Direction, EndpointDescriptor, TransferType};
use crate::error::{Error, Status};
use crate::peripheral::{EndpointConfig, EndpointEvents, PeripheralOps};

/// Endpoint records are kept for this many endpoints, whatever the hardware
/// has. Both supported controllers have fewer.
pub const MAX_ENDPOINTS: usize = 16;

/// Largest DMA chunk we'll program at once. Longer transfers are moved in
/// several chunks.
pub const MAX_DMA_CHUNK: usize = 0x1_0000;

/// Completion function for a transfer. Runs in interrupt context.
pub type Callback<'d> = fn(Completion<'d>);

/// Externally visible summary of an endpoint's state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointState {
    Disabled,
    Halted,
    Idle,
    Sending,
    Receiving,
}

/// The caller's buffer, on its way back to the caller.
#[derive(Debug)]
pub struct Buffer<'d>(Storage<'d>);

#[derive(Debug)]
enum Storage<'d> {
    In(&'d [u8]),
    Out(&'d mut [u8]),
    /// Short replies generated by the stack itself, copied in.
    Inline([u8; 2], usize),
}

impl<'d> Buffer<'d> {
    pub fn len(&self) -> usize {
        match &self.0 {
            Storage::In(b) => b.len(),
            Storage::Out(b) => b.len(),
            Storage::Inline(_, n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The data buffer of an IN transfer.
    pub fn into_in(self) -> Option<&'d [u8]> {
        match self.0 {
            Storage::In(b) => Some(b),
            _ => None,
        }
    }

    /// The receive buffer of an OUT transfer.
    pub fn into_out(self) -> Option<&'d mut [u8]> {
        match self.0 {
            Storage::Out(b) => Some(b),
            _ => None,
        }
    }

    fn source(&self, start: usize, len: usize) -> &[u8] {
        match &self.0 {
            Storage::In(b) => &b[start..start + len],
            Storage::Inline(b, _) => &b[start..start + len],
            Storage::Out(_) => &[],
        }
    }

    fn sink(&mut self, start: usize, len: usize) -> Option<&mut [u8]> {
        match &mut self.0 {
            Storage::Out(b) => Some(&mut b[start..start + len]),
            _ => None,
        }
    }

    fn dma_addr(&mut self, offset: usize) -> *mut u8 {
        match &mut self.0 {
            // The channel only reads through this pointer for IN.
            Storage::In(b) => b.as_ptr().wrapping_add(offset) as *mut u8,
            Storage::Out(b) => b.as_mut_ptr().wrapping_add(offset),
            Storage::Inline(..) => core::ptr::null_mut(),
        }
    }
}

/// Report delivered once per started transfer.
#[derive(Debug)]
pub struct Completion<'d> {
    pub endpoint: u8,
    pub direction: Direction,
    pub status: Status,
    pub transferred: usize,
    /// Bytes that didn't make it: never staged, staged but not confirmed, or
    /// (for OUT) sent by the host past the end of the buffer.
    pub remaining: usize,
    pub buffer: Buffer<'d>,
    /// Whatever was passed when the transfer was started.
    pub arg: usize,
}

/// Snapshot of an in-flight transfer's byte accounting.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub buffered: usize,
    pub transferred: usize,
    pub remaining: usize,
}

/// Where a completion goes.
#[derive(Copy, Clone, Debug)]
pub(crate) enum Notify<'d> {
    /// Transfers the stack starts for itself.
    Silent,
    Handler,
    Callback(Callback<'d>),
}

impl<'d> From<Option<Callback<'d>>> for Notify<'d> {
    fn from(cb: Option<Callback<'d>>) -> Self {
        match cb {
            Some(cb) => Notify::Callback(cb),
            None => Notify::Handler,
        }
    }
}

/// A transfer that has ended and needs its completion delivered.
#[derive(Debug)]
pub(crate) struct Finished<'d> {
    pub completion: Completion<'d>,
    pub notify: Notify<'d>,
}

#[derive(Debug)]
struct Transfer<'d> {
    buffer: Buffer<'d>,
    buffered: usize,
    transferred: usize,
    remaining: usize,
    /// Size of the IN packet the hardware is currently sending.
    committed: usize,
    /// Size of an IN packet sitting in the second bank, loaded but not yet
    /// committed.
    preloaded: Option<usize>,
    /// Size of the most recently loaded IN packet.
    last: usize,
    /// A control read that ends on a packet boundary short of what the host
    /// asked for gets a trailing zero-length packet.
    zlp: bool,
    dma: bool,
    notify: Notify<'d>,
    arg: usize,
}

impl<'d> Transfer<'d> {
    fn new(buffer: Buffer<'d>, notify: Notify<'d>, arg: usize) -> Self {
        Self {
            remaining: buffer.len(),
            buffer,
            buffered: 0,
            transferred: 0,
            committed: 0,
            preloaded: None,
            last: 0,
            zlp: false,
            dma: false,
            notify,
            arg,
        }
    }

    fn progress(&self) -> Progress {
        Progress {
            buffered: self.buffered,
            transferred: self.transferred,
            remaining: self.remaining,
        }
    }
}

#[derive(Debug)]
enum Activity<'d> {
    Disabled,
    Halted,
    Idle,
    Sending(Transfer<'d>),
    Receiving(Transfer<'d>),
}

#[derive(Debug)]
struct Endpoint<'d> {
    activity: Activity<'d>,
    max_packet: u16,
    banks: u8,
    kind: TransferType,
    direction: Direction,
    dma: bool,
}

impl Endpoint<'_> {
    fn disabled() -> Self {
        Self {
            activity: Activity::Disabled,
            max_packet: 0,
            banks: 1,
            kind: TransferType::Control,
            direction: Direction::Out,
            dma: false,
        }
    }

    fn is_control(&self) -> bool {
        self.kind == TransferType::Control
    }
}

/// The endpoint table, plus the peripheral it drives.
pub(crate) struct Engine<'d, P> {
    ops: P,
    endpoints: [Endpoint<'d>; MAX_ENDPOINTS],
}

impl<'d, P: PeripheralOps> Engine<'d, P> {
    pub fn new(ops: P) -> Self {
        Self {
            ops,
            endpoints: core::array::from_fn(|_| Endpoint::disabled()),
        }
    }

    pub fn ops(&self) -> &P {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut P {
        &mut self.ops
    }

    /// Number of endpoints we actually manage.
    pub fn count(&self) -> usize {
        self.ops.endpoint_count().min(MAX_ENDPOINTS)
    }

    fn index(&self, ep: u8) -> Result<usize, Error> {
        let i = usize::from(ep);
        if i < self.count() {
            Ok(i)
        } else {
            Err(Error::InvalidEndpoint)
        }
    }

    pub fn state(&self, ep: u8) -> EndpointState {
        match self.index(ep).map(|i| &self.endpoints[i].activity) {
            Ok(Activity::Halted) => EndpointState::Halted,
            Ok(Activity::Idle) => EndpointState::Idle,
            Ok(Activity::Sending(_)) => EndpointState::Sending,
            Ok(Activity::Receiving(_)) => EndpointState::Receiving,
            Ok(Activity::Disabled) | Err(_) => EndpointState::Disabled,
        }
    }

    pub fn max_packet(&self, ep: u8) -> Option<u16> {
        let i = self.index(ep).ok()?;
        match self.endpoints[i].activity {
            Activity::Disabled => None,
            _ => Some(self.endpoints[i].max_packet),
        }
    }

    pub fn progress(&self, ep: u8) -> Option<Progress> {
        let i = self.index(ep).ok()?;
        match &self.endpoints[i].activity {
            Activity::Sending(t) | Activity::Receiving(t) => Some(t.progress()),
            _ => None,
        }
    }

    pub fn is_halted(&self, ep: u8) -> bool {
        self.state(ep) == EndpointState::Halted
    }

    /// (Re)configures an endpoint from its descriptor, or as a default control
    /// endpoint if there isn't one. Anything in flight ends with
    /// `Status::Reset`.
    pub fn configure(
        &mut self,
        ep: u8,
        descriptor: Option<&EndpointDescriptor>,
    ) -> Result<Option<Finished<'d>>, Error> {
        let i = self.index(ep)?;
        let caps = self.ops.capabilities(ep);
        let (kind, direction, requested) = match descriptor {
            Some(d) => (d.transfer_type(), d.direction(), d.max_packet_size()),
            None => (TransferType::Control, Direction::Out, caps.max_packet),
        };
        if i == 0 && kind != TransferType::Control {
            return Err(Error::InvalidEndpoint);
        }
        if requested > caps.max_packet {
            warn!(
                "ep{ep}: descriptor wants {requested} byte packets, hardware has {}",
                caps.max_packet,
            );
        }
        let max_packet = match requested {
            0 => caps.max_packet,
            n => n.min(caps.max_packet),
        };

        let finished = self.end(i, Status::Reset);

        let config = EndpointConfig {
            kind,
            direction,
            max_packet,
            banks: caps.banks,
            dma: caps.dma && kind != TransferType::Control,
        };
        self.ops.endpoint_unlisten(ep, EndpointEvents::all());
        // A halt doesn't survive reconfiguration, and the stall bit lives in
        // registers that configuring leaves alone.
        self.ops.clear_stall(ep);
        self.ops.endpoint_reset(ep);
        self.ops.endpoint_configure(ep, &config);

        let endpoint = &mut self.endpoints[i];
        endpoint.kind = kind;
        endpoint.direction = direction;
        endpoint.max_packet = max_packet;
        endpoint.banks = config.banks;
        endpoint.dma = config.dma;
        endpoint.activity = Activity::Idle;

        if kind == TransferType::Control {
            self.ops.endpoint_listen(
                ep,
                EndpointEvents::SETUP | EndpointEvents::OUT_RECEIVED | EndpointEvents::STALL_SENT,
            );
        }
        debug!("ep{ep}: {kind:?} {direction:?}, {max_packet} bytes x{}", config.banks);
        Ok(finished)
    }

    /// Aborts anything in flight and turns the endpoint off.
    pub fn disable(&mut self, ep: u8, status: Status) -> Option<Finished<'d>> {
        let i = self.index(ep).ok()?;
        let finished = self.end(i, status);
        self.ops.endpoint_unlisten(ep, EndpointEvents::all());
        self.ops.clear_stall(ep);
        self.ops.endpoint_disable(ep);
        self.endpoints[i].activity = Activity::Disabled;
        finished
    }

    /// Starts an IN transfer of `data`.
    pub fn write(
        &mut self,
        ep: u8,
        data: &'d [u8],
        notify: Notify<'d>,
        arg: usize,
    ) -> Result<(), Error> {
        self.start(ep, Direction::In, Buffer(Storage::In(data)), notify, arg, None)
    }

    /// Starts the data stage of a control read, for a request that asked for
    /// `requested` bytes. Only a reply shorter than that ends with a
    /// zero-length packet when it falls on a packet boundary.
    pub fn write_reply(
        &mut self,
        ep: u8,
        data: &'d [u8],
        notify: Notify<'d>,
        arg: usize,
        requested: usize,
    ) -> Result<(), Error> {
        let buffer = Buffer(Storage::In(data));
        self.start(ep, Direction::In, buffer, notify, arg, Some(requested))
    }

    /// Starts an IN transfer of up to two bytes produced by the stack itself.
    pub fn write_inline(&mut self, ep: u8, bytes: [u8; 2], len: usize) -> Result<(), Error> {
        let buffer = Buffer(Storage::Inline(bytes, len.min(bytes.len())));
        self.start(ep, Direction::In, buffer, Notify::Silent, 0, None)
    }

    /// Starts an OUT transfer into `data`.
    pub fn read(
        &mut self,
        ep: u8,
        data: &'d mut [u8],
        notify: Notify<'d>,
        arg: usize,
    ) -> Result<(), Error> {
        self.start(ep, Direction::Out, Buffer(Storage::Out(data)), notify, arg, None)
    }

    fn start(
        &mut self,
        ep: u8,
        direction: Direction,
        buffer: Buffer<'d>,
        notify: Notify<'d>,
        arg: usize,
        requested: Option<usize>,
    ) -> Result<(), Error> {
        let i = self.index(ep)?;
        let Engine { ops, endpoints } = &mut *self;
        let endpoint = &mut endpoints[i];

        if !matches!(endpoint.activity, Activity::Idle) {
            return Err(Error::Locked);
        }
        let control = endpoint.is_control();
        if !control && endpoint.direction != direction {
            return Err(Error::InvalidEndpoint);
        }

        let mut t = Transfer::new(buffer, notify, arg);
        t.dma = endpoint.dma && t.remaining > 0;
        t.zlp = control && requested.map_or(true, |n| t.remaining < n);
        trace!("ep{ep}: start {direction:?} {} bytes{}", t.remaining, if t.dma { " (dma)" } else { "" });

        match direction {
            Direction::In => {
                if t.dma {
                    start_dma(ops, ep, direction, &mut t);
                } else {
                    let mps = usize::from(endpoint.max_packet);
                    t.committed = load_packet(ops, ep, mps, &mut t);
                    ops.commit_in(ep);
                    if endpoint.banks > 1 && needs_more(&t, mps) {
                        t.preloaded = Some(load_packet(ops, ep, mps, &mut t));
                    }
                    ops.endpoint_listen(ep, EndpointEvents::IN_COMPLETE);
                }
                endpoint.activity = Activity::Sending(t);
            }
            Direction::Out => {
                if t.dma {
                    start_dma(ops, ep, direction, &mut t);
                } else {
                    ops.endpoint_listen(ep, EndpointEvents::OUT_RECEIVED);
                }
                endpoint.activity = Activity::Receiving(t);
            }
        }
        Ok(())
    }

    /// Makes the endpoint answer the next token with STALL, once.
    pub fn stall(&mut self, ep: u8) -> Result<(), Error> {
        let i = self.index(ep)?;
        if !matches!(self.endpoints[i].activity, Activity::Idle) {
            return Err(Error::Locked);
        }
        self.ops.set_stall(ep);
        self.ops.endpoint_listen(ep, EndpointEvents::STALL_SENT);
        Ok(())
    }

    /// STALLs a control endpoint whatever it was doing. Used to refuse a
    /// request after a handler may already have started a data stage.
    pub fn stall_control(&mut self, ep: u8) -> Option<Finished<'d>> {
        let i = self.index(ep).ok()?;
        let finished = self.end(i, Status::Aborted);
        self.ops.set_stall(ep);
        self.ops.endpoint_listen(ep, EndpointEvents::STALL_SENT);
        finished
    }

    /// Halts a data endpoint until `unhalt`. Anything in flight is aborted.
    pub fn halt(&mut self, ep: u8) -> Result<Option<Finished<'d>>, Error> {
        let i = self.index(ep)?;
        let endpoint = &self.endpoints[i];
        match endpoint.activity {
            Activity::Disabled => return Err(Error::InvalidState),
            _ if endpoint.is_control() => return Err(Error::InvalidEndpoint),
            Activity::Halted => return Ok(None),
            _ => (),
        }

        let finished = self.end(i, Status::Aborted);
        self.ops.set_stall(ep);
        self.ops.endpoint_listen(ep, EndpointEvents::STALL_SENT);
        self.endpoints[i].activity = Activity::Halted;
        debug!("ep{ep}: halted");
        Ok(finished)
    }

    /// Clears a halt, resetting the data toggle. Does nothing to an endpoint
    /// that isn't halted.
    pub fn unhalt(&mut self, ep: u8) -> Result<(), Error> {
        let i = self.index(ep)?;
        if matches!(self.endpoints[i].activity, Activity::Halted) {
            self.ops.clear_stall(ep);
            self.ops.endpoint_reset(ep);
            self.ops.endpoint_unlisten(ep, EndpointEvents::STALL_SENT);
            self.endpoints[i].activity = Activity::Idle;
            debug!("ep{ep}: unhalted");
        }
        Ok(())
    }

    /// Ends whatever is open on a control endpoint as if it had succeeded.
    /// A SETUP can only arrive once the host has moved on, so whatever we
    /// were waiting for already happened as far as it's concerned.
    pub fn force_complete(&mut self, ep: u8) -> Option<Finished<'d>> {
        let i = self.index(ep).ok()?;
        if matches!(self.endpoints[i].activity, Activity::Sending(_)) {
            self.ops.cancel_in(ep);
        }
        self.end(i, Status::Success)
    }

    /// The host took the packet we committed.
    pub fn on_in_complete(&mut self, ep: u8) -> Option<Finished<'d>> {
        let i = self.index(ep).ok()?;
        let Engine { ops, endpoints } = &mut *self;
        let endpoint = &mut endpoints[i];
        let mps = usize::from(endpoint.max_packet);
        let banks = endpoint.banks;

        let t = match &mut endpoint.activity {
            Activity::Sending(t) if !t.dma => t,
            _ => {
                ops.ack_in_complete(ep);
                return None;
            }
        };

        let sent = t.committed;
        t.transferred += sent;
        t.buffered -= sent;
        trace!("ep{ep}: sent {sent}, {} to go", t.buffered + t.remaining);

        if let Some(next) = t.preloaded.take() {
            // Hand over the second bank before acknowledging, so the
            // hardware has something to send when the host comes back.
            ops.commit_in(ep);
            ops.ack_in_complete(ep);
            t.committed = next;
            if banks > 1 && needs_more(t, mps) {
                t.preloaded = Some(load_packet(ops, ep, mps, t));
            }
            return None;
        }

        ops.ack_in_complete(ep);
        if needs_more(t, mps) {
            t.committed = load_packet(ops, ep, mps, t);
            ops.commit_in(ep);
            return None;
        }

        self.end(i, Status::Success)
    }

    /// An OUT packet arrived.
    pub fn on_out_received(&mut self, ep: u8) -> Option<Finished<'d>> {
        let i = self.index(ep).ok()?;
        let Engine { ops, endpoints } = &mut *self;
        let endpoint = &mut endpoints[i];
        let mps = usize::from(endpoint.max_packet);
        let control = endpoint.is_control();

        match &mut endpoint.activity {
            Activity::Receiving(t) if !t.dma => {
                let count = ops.out_byte_count(ep);
                let take = count.min(t.remaining);
                if count > take {
                    // No room for the rest of this packet. It's dropped, but
                    // counted, so the completion shows there was more.
                    t.buffered += count - take;
                }
                let start = t.transferred;
                if let Some(dst) = t.buffer.sink(start, take) {
                    ops.read_fifo(ep, dst);
                }
                t.transferred += take;
                t.remaining -= take;
                ops.release_out(ep);
                trace!("ep{ep}: got {count}, {} to go", t.remaining);

                if t.remaining > 0 && count >= mps {
                    return None;
                }
            }
            Activity::Sending(_) if control => {
                // The host has moved on to the status stage of a control
                // read. Whatever we had queued is moot.
                let count = ops.out_byte_count(ep);
                if count != 0 {
                    warn!("ep{ep}: {count} byte OUT during control read");
                }
                ops.release_out(ep);
                ops.cancel_in(ep);
            }
            _ => {
                let count = ops.out_byte_count(ep);
                if control {
                    // Status stage of a control read that already finished,
                    // or garbage. Either way there's nowhere to put it.
                    if count != 0 {
                        warn!("ep{ep}: dropped {count} byte OUT");
                    }
                    ops.release_out(ep);
                } else if ops.is_stalled(ep) {
                    ops.release_out(ep);
                } else {
                    // Leave it in the bank; the host gets NAKs until someone
                    // calls read.
                    ops.endpoint_unlisten(ep, EndpointEvents::OUT_RECEIVED);
                }
                return None;
            }
        }

        self.end(i, Status::Success)
    }

    pub fn on_stall_sent(&mut self, ep: u8) {
        let Ok(i) = self.index(ep) else {
            return;
        };
        self.ops.ack_stall_sent(ep);
        let endpoint = &self.endpoints[i];
        if !matches!(endpoint.activity, Activity::Halted) {
            self.ops.clear_stall(ep);
            if !endpoint.is_control() {
                self.ops.endpoint_unlisten(ep, EndpointEvents::STALL_SENT);
            }
        }
    }

    /// The endpoint's DMA channel finished a chunk.
    pub fn on_dma_complete(&mut self, ep: u8) -> Option<Finished<'d>> {
        let i = self.index(ep).ok()?;
        let Engine { ops, endpoints } = &mut *self;

        let (direction, t) = match &mut endpoints[i].activity {
            Activity::Sending(t) if t.dma => (Direction::In, t),
            Activity::Receiving(t) if t.dma => (Direction::Out, t),
            _ => {
                ops.dma_finish(ep);
                return None;
            }
        };

        let left = ops.dma_finish(ep).min(t.buffered);
        t.transferred += t.buffered - left;
        t.remaining += left;
        t.buffered = 0;
        trace!("ep{ep}: dma chunk done, {left} short, {} to go", t.remaining);

        if left == 0 && t.remaining > 0 {
            start_dma(ops, ep, direction, t);
            return None;
        }

        self.end(i, Status::Success)
    }

    /// Takes the transfer off an endpoint, leaving it `Idle`.
    fn end(&mut self, i: usize, status: Status) -> Option<Finished<'d>> {
        let Engine { ops, endpoints } = &mut *self;
        let endpoint = &mut endpoints[i];
        let ep = i as u8;

        let (t, direction) = match mem::replace(&mut endpoint.activity, Activity::Idle) {
            Activity::Sending(t) => (t, Direction::In),
            Activity::Receiving(t) => (t, Direction::Out),
            other => {
                endpoint.activity = other;
                return None;
            }
        };

        if status != Status::Success {
            if t.dma {
                ops.dma_stop(ep);
            } else if direction == Direction::In {
                ops.cancel_in(ep);
            }
        }
        let events = if endpoint.is_control() {
            EndpointEvents::IN_COMPLETE
        } else {
            EndpointEvents::IN_COMPLETE | EndpointEvents::OUT_RECEIVED
        };
        ops.endpoint_unlisten(ep, events);

        debug!(
            "ep{ep}: {direction:?} transfer {status}, {} moved, {} left",
            t.transferred,
            t.remaining + t.buffered,
        );
        Some(Finished {
            completion: Completion {
                endpoint: ep,
                direction,
                status,
                transferred: t.transferred,
                remaining: t.remaining + t.buffered,
                buffer: t.buffer,
                arg: t.arg,
            },
            notify: t.notify,
        })
    }
}

/// Whether another IN packet has to follow the last one loaded. Control
/// reads end on a short packet or on the requested length, so one that ends
/// on a packet boundary short of that needs a trailing zero-length packet.
fn needs_more(t: &Transfer<'_>, mps: usize) -> bool {
    t.remaining > 0 || (t.zlp && t.last == mps)
}

/// Copies the next packet's worth of the transfer into the FIFO.
fn load_packet<P: PeripheralOps>(ops: &mut P, ep: u8, mps: usize, t: &mut Transfer<'_>) -> usize {
    let size = t.remaining.min(mps);
    let start = t.transferred + t.buffered;
    ops.write_fifo(ep, t.buffer.source(start, size));
    t.buffered += size;
    t.remaining -= size;
    t.last = size;
    size
}

fn start_dma<P: PeripheralOps>(ops: &mut P, ep: u8, direction: Direction, t: &mut Transfer<'_>) {
    let chunk = t.remaining.min(MAX_DMA_CHUNK);
    let addr = t.buffer.dma_addr(t.transferred);
    // Safety: the buffer is borrowed for the life of the transfer, and the
    // transfer holds it until `dma_finish` or `dma_stop`. Nothing touches the
    // bytes in between.
    unsafe {
        ops.dma_start(ep, direction, addr, chunk);
    }
    t.buffered = chunk;
    t.remaining -= chunk;
}
