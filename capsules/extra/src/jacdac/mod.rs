// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! A JACDAC bus node: a single-wire, half-duplex, multi-drop protocol
//! stack, from line framing up through address enumeration and service
//! routing.
//!
//! The original driver keeps its device manager and control service behind
//! C++ function-local statics (singletons reached from anywhere). This
//! crate instead has a board construct one owned [`Jacdac`] value (typically
//! through `static_init!`, as with every other capsule in this crate) and
//! wire its own pin/UART/alarm/RNG capabilities into it; nothing here is
//! reached through global state.

pub mod control;
pub mod crc;
pub mod device_manager;
pub mod packet;
pub mod phy;
pub mod queue;
pub mod service;
pub mod services;

use kernel::hil::time::Alarm;
use kernel::ErrorCode;

use control::ControlService;
use packet::BaudCode;
use phy::LineDriver;

/// Owns one node's entire JACDAC stack: the line driver (`PA`'s alarm drives
/// its per-byte/pulse timers) and the control service (`CA`'s alarm drives
/// its half-second tick). The two are usually backed by independent virtual
/// alarms off the same underlying hardware timer, hence the separate type
/// parameters rather than one shared `A`.
pub struct Jacdac<'a, PA: Alarm<'a>, CA: Alarm<'a>> {
    pub line_driver: LineDriver<'a, PA>,
    pub control: ControlService<'a, CA>,
}

impl<'a, PA: Alarm<'a>, CA: Alarm<'a>> Jacdac<'a, PA, CA> {
    pub fn new(line_driver: LineDriver<'a, PA>, control: ControlService<'a, CA>) -> Self {
        Self { line_driver, control }
    }

    /// Wires both the line driver and control service up as clients of
    /// their own hardware/alarm, then starts the line listening and arms
    /// the control service's first tick. Does not itself begin enumeration;
    /// call [`ControlService::enumerate`] on `self.control` once any
    /// application-supplied services have been registered into its service
    /// table.
    pub fn register_and_start(&'static self) -> Result<(), ErrorCode> {
        self.line_driver.register();
        self.control.register();
        self.line_driver.start()?;
        self.control.start();
        Ok(())
    }

    pub fn set_maximum_baud(&self, baud: BaudCode) {
        self.line_driver.set_maximum_baud(baud);
        self.control.set_maximum_baud(baud);
    }
}
