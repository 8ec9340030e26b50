// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runtime knobs.
//!
//! Which hardware driver gets built is a compile-time decision (the `udp`,
//! `udphs` and `sam7s` Cargo features). The handful of things that are
//! reasonable to tune per board live here instead.

/// Tunables for a [`Device`](crate::device::Device).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// How many start-of-frame intervals to wait for the status stage of a
    /// `SET_ADDRESS` before applying the new address anyway.
    ///
    /// The host has to see our status ZLP at the _old_ address, so normally
    /// we apply the address when that ZLP completes. If the completion gets
    /// lost we'd otherwise sit at the old address forever.
    pub set_address_timeout_frames: u16,
    /// Upper bound on the number of events one call to the interrupt handler
    /// will process before returning. Anything left over re-triggers the
    /// interrupt.
    pub max_events_per_interrupt: u16,
}

impl Config {
    /// Defaults, usable in `const` and `static` contexts.
    pub const fn new() -> Self {
        Self {
            // The status stage of a no-data control transfer has 50 ms.
            set_address_timeout_frames: 50,
            max_events_per_interrupt: 32,
        }
    }

    pub const fn with_set_address_timeout(mut self, frames: u16) -> Self {
        self.set_address_timeout_frames = frames;
        self
    }

    pub const fn with_max_events_per_interrupt(mut self, events: u16) -> Self {
        self.max_events_per_interrupt = events;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
