// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Hardware-agnostic interface for true/pseudo random number generators.

use crate::ErrorCode;

/// Whether a [`Client`] wants more randomness delivered from the current
/// batch, or is done consuming it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Continue {
    More,
    Done,
}

/// An asynchronous source of random words.
pub trait Rng<'a> {
    /// Requests random data. The result is delivered to the registered
    /// [`Client`] via [`Client::randomness_available`], possibly across
    /// several callbacks.
    fn get(&self) -> Result<(), ErrorCode>;

    /// Cancels an outstanding `get()`.
    fn cancel(&self) -> Result<(), ErrorCode>;

    fn set_client(&'a self, client: &'a dyn Client);
}

pub trait Client {
    /// Delivers a batch of random words. Returning [`Continue::More`] asks
    /// the implementation to keep calling back with further randomness (if
    /// any remains in this batch or a subsequent `get()` is issued);
    /// [`Continue::Done`] ends the request.
    fn randomness_available(
        &self,
        randomness: &mut dyn Iterator<Item = u32>,
        error: Result<(), ErrorCode>,
    ) -> Continue;
}
