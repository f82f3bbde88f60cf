// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Hardware-agnostic interface for GPIO pins: direction configuration,
//! level read/write, and edge-triggered interrupts.

use crate::ErrorCode;

/// Whether a pin currently drives the line or samples it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FloatingState {
    PullUp,
    PullDown,
    PullNone,
}

/// Which edge(s) a pin should fire its interrupt client on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterruptEdge {
    RisingEdge,
    FallingEdge,
    EitherEdge,
}

pub trait Configure {
    /// Makes the pin drive the line, returning the direction it was in.
    fn make_output(&self) -> Direction;
    /// Makes the pin sample the line, returning the direction it was in.
    fn make_input(&self) -> Direction;
    /// Disables the pin (high impedance), returning the direction it was in.
    fn disable(&self) -> Direction;
    fn set_floating_state(&self, state: FloatingState);
    fn floating_state(&self) -> FloatingState;
    fn is_input(&self) -> bool;
    fn is_output(&self) -> bool;
}

pub trait Input {
    fn read(&self) -> bool;
}

pub trait Output {
    /// Sets the pin high. Returns the previous state.
    fn set(&self) -> bool;
    /// Sets the pin low. Returns the previous state.
    fn clear(&self) -> bool;
    /// Toggles the pin. Returns the new state.
    fn toggle(&self) -> bool;
}

/// Callback handler for a pin interrupt.
pub trait Client {
    /// Called when the configured edge occurs. `identifier` lets a single
    /// client distinguish between several pins it has registered for.
    fn fired(&self, identifier: usize);
}

pub trait Interrupt<'a>: Input {
    fn set_client(&self, client: &'a dyn Client);
    fn enable_interrupts(&self, mode: InterruptEdge) -> Result<(), ErrorCode>;
    fn disable_interrupts(&self);
    fn is_pending(&self) -> bool;
}

/// A pin that can be configured, driven, sampled, and interrupted on: the
/// common capability a single-wire line driver needs from the pin that
/// shares TX and RX duties on one physical wire.
pub trait InterruptPin<'a>: Configure + Input + Output + Interrupt<'a> {}
impl<'a, P: Configure + Input + Output + Interrupt<'a>> InterruptPin<'a> for P {}
