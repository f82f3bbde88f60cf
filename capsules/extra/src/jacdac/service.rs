// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! The capability set every JACDAC service (built-in or application-
//! supplied) implements, and the seam the control service dispatches
//! through.
//!
//! The original driver models this as an abstract base class with many
//! virtuals; we model it the way this crate models every other hardware
//! capability (`kernel::hil::*`): a plain trait, with the built-in control,
//! RNG and configuration services as one implementation each and room for
//! an application to supply its own.

use super::device_manager::DeviceHandle;
use super::packet::{Packet, ServiceInfo};

/// A service's role with respect to the devices it talks about.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServiceMode {
    /// Consumes a specific remote device's service (tracks `device` as a
    /// handle to that remote).
    Client,
    /// Hosts this service locally for a single logical instance (tracks
    /// `device` as the handle to our own local device record).
    Host,
    /// Hosts this service locally but answers data from any remote
    /// advertising the same class, not just one bound device.
    BroadcastHost,
    /// Not an enumerable service: never assigned a dynamic service number
    /// during [`super::control::ControlService::enumerate`] and never
    /// listed in an outbound advertisement. Used by the control service
    /// itself (fixed at service number 0) and by the other control-layer
    /// services (RNG, configuration), each fixed at its own
    /// universally-agreed number.
    ControlLayer,
}

/// Service number not yet assigned (before enumeration completes).
pub const UNASSIGNED_SERVICE_NUMBER: u8 = 0xFF;

/// The capability set described in spec section 3: what the control service
/// needs from every service table entry to advertise it, route packets to
/// it, and notify it of device lifecycle events.
pub trait Service {
    /// The globally-agreed class identifier this service advertises under.
    fn service_class(&self) -> u32;

    fn mode(&self) -> ServiceMode;

    /// The 4-bit index this service was assigned at enumeration time, or
    /// [`UNASSIGNED_SERVICE_NUMBER`] before that.
    fn service_number(&self) -> u8;

    /// Called once by the control service during enumeration, in table
    /// order, to assign this service's dense index.
    fn set_service_number(&self, service_number: u8);

    /// The device this service is bound to: the local device record for
    /// `Host`/`BroadcastHost`/`ControlLayer`, a remote device for `Client`,
    /// or `None` before that binding exists.
    fn device(&self) -> Option<DeviceHandle>;
    fn set_device(&self, device: Option<DeviceHandle>);

    /// Fills up to 16 bytes of this service's advertisement payload into
    /// `buffer`, returning the number of bytes written. Called once per
    /// enumeration tick while proposing or re-advertising.
    fn add_advertisement_data(&self, buffer: &mut [u8]) -> u8 {
        let _ = buffer;
        0
    }

    /// Called for every `ServiceInfo` record in an inbound control packet
    /// whose class matches this service's, so `Client` services can bind to
    /// (or refresh) the remote device that advertised it. Most non-client
    /// services leave this a no-op.
    fn handle_advertisement(&self, device: DeviceHandle, info: &ServiceInfo) {
        let _ = (device, info);
    }

    /// `Client`-only: if set, restricts which advertising device this
    /// service will bind to, by the remote's identifier. `None` (the
    /// default) matches any identifier.
    fn required_device_identifier(&self) -> Option<[u8; 8]> {
        None
    }

    /// `Client`-only: if set, restricts which advertising device this
    /// service will bind to, by the remote's advertised name. `None` (the
    /// default) matches any name (or no name).
    fn required_device_name(&self) -> Option<&[u8]> {
        None
    }

    /// Delivers a data packet routed to this service. Returns `true` if the
    /// packet was handled (the control service stops at the first handler
    /// that returns `true`), `false` to let routing continue to the next
    /// candidate service.
    fn handle_packet(&self, packet: &Packet) -> bool;

    /// This service's host (local or bound remote) just became reachable:
    /// local enumeration completed, or (for `Client`) a matching remote was
    /// bound.
    fn host_connected(&self) {}

    /// This service's bound device was removed (local `disconnect()`, or a
    /// remote aged out). Implementations should clear any cached state keyed
    /// on the now-stale device handle; the control service clears
    /// `device()` itself via [`Service::set_device`].
    fn host_disconnected(&self) {}
}
