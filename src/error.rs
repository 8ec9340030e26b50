// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Failure and completion codes.
//!
//! There are two different things here, and it's worth keeping them apart:
//!
//! - [`Error`] is what a _call_ can return. Every variant is recoverable; none
//!   of them means the peripheral is broken.
//! - [`Status`] is what a _transfer_ reports when it finishes. It only ever
//!   arrives through a completion, never as the return value of `write` or
//!   `read`.

use core::fmt;

/// Reasons a request into the stack can be refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The endpoint already has a transfer in flight (or is halted or
    /// disabled). Nothing was changed; try again later.
    Locked,
    /// The request was answered with a protocol STALL. This is how USB says
    /// "not supported," and is not a fault in the device.
    Stalled,
    /// Endpoint index out of range for this peripheral, or an endpoint whose
    /// type or direction doesn't fit the operation.
    InvalidEndpoint,
    /// The device isn't in a state where the operation makes sense.
    InvalidState,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Error::Locked => "endpoint busy",
            Error::Stalled => "request stalled",
            Error::InvalidEndpoint => "invalid endpoint",
            Error::InvalidState => "invalid device state",
        };
        f.write_str(s)
    }
}

/// How a transfer ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    /// All requested bytes moved, or the host ended the transfer early with a
    /// short packet.
    Success,
    /// Pre-empted by a halt, a bus reset, a disconnect or a configuration
    /// change.
    Aborted,
    /// Pre-empted because the endpoint was reconfigured.
    Reset,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Success => "success",
            Status::Aborted => "aborted",
            Status::Reset => "reset",
        };
        f.write_str(s)
    }
}
