// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Hardware-agnostic interface for UART peripherals, supporting both
//! interrupt-driven byte-at-a-time operation and DMA-style buffer transfers.

use crate::ErrorCode;

/// The number of data bits a UART frame carries.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Width {
    Six,
    Seven,
    Eight,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StopBits {
    One,
    Two,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Line parameters for [`Configure::configure`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Parameters {
    pub baud_rate: u32,
    pub width: Width,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub hw_flow_control: bool,
}

/// Why a receive completed the way it did.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// No error occurred, the buffer was filled as requested.
    None,
    /// The requested operation was aborted before completion.
    Aborted,
    /// An overrun occurred: the hardware received a byte before the
    /// previous one was read out.
    OverrunError,
    /// The receiver detected a framing error, e.g. a missing stop bit.
    FramingError,
    /// A parity error was detected.
    ParityError,
    /// Some other error occurred.
    RepeatCallError,
}

pub trait Configure {
    /// Sets the line parameters for this UART. This may only be called
    /// while neither a transmission nor a reception is in progress.
    fn configure(&self, params: Parameters) -> Result<(), ErrorCode>;
}

pub trait Transmit<'a> {
    fn set_transmit_client(&self, client: &'a dyn TransmitClient);

    /// Transmits `tx_len` bytes from `tx_data`, starting at index 0. On
    /// success the buffer is returned to the caller via
    /// [`TransmitClient::transmitted_buffer`]; on immediate failure
    /// (e.g. `BUSY`) it is returned synchronously alongside the error.
    fn transmit_buffer(
        &self,
        tx_data: &'static mut [u8],
        tx_len: usize,
    ) -> Result<(), (ErrorCode, &'static mut [u8])>;

    /// Aborts an in-progress `transmit_buffer` call. A completion callback
    /// will still be issued, with `rcode` set to `Err(ErrorCode::CANCEL)`.
    fn transmit_abort(&self) -> Result<(), ErrorCode>;

    /// Transmits a single word without a backing buffer. Used for
    /// low-latency, one-byte-at-a-time protocols.
    fn transmit_word(&self, word: u32) -> Result<(), ErrorCode>;
}

pub trait TransmitClient {
    /// Called when `transmit_buffer` completes (successfully or not). The
    /// buffer is returned to the client so it can be reused.
    fn transmitted_buffer(
        &self,
        tx_buffer: &'static mut [u8],
        tx_len: usize,
        rcode: Result<(), ErrorCode>,
    );

    /// Called when `transmit_word` completes.
    fn transmitted_word(&self, rcode: Result<(), ErrorCode>) {
        let _ = rcode;
    }
}

pub trait Receive<'a> {
    fn set_receive_client(&self, client: &'a dyn ReceiveClient);

    /// Receives up to `rx_len` bytes into `rx_buffer`. Returns the buffer
    /// back to the caller synchronously on immediate failure.
    fn receive_buffer(
        &self,
        rx_buffer: &'static mut [u8],
        rx_len: usize,
    ) -> Result<(), (ErrorCode, &'static mut [u8])>;

    /// Aborts an in-progress `receive_buffer` call. A completion callback
    /// is still issued with whatever bytes were received before the abort.
    fn receive_abort(&self) -> Result<(), ErrorCode>;

    /// Receives a single word without a backing buffer.
    fn receive_word(&self) -> Result<(), ErrorCode>;
}

pub trait ReceiveClient {
    /// Called when `receive_buffer` completes (successfully, on abort, or
    /// on error). `rx_len` is the number of valid bytes at the front of
    /// `rx_buffer`.
    fn received_buffer(
        &self,
        rx_buffer: &'static mut [u8],
        rx_len: usize,
        rcode: Result<(), ErrorCode>,
        error: Error,
    );

    /// Called when `receive_word` completes.
    fn received_word(&self, _word: u32, _rcode: Result<(), ErrorCode>, _error: Error) {}
}

/// A full-duplex UART: a hardware peripheral or a virtualized device over
/// one. Implemented by anything that provides [`Configure`], [`Transmit`]
/// and [`Receive`] together.
pub trait Uart<'a>: Configure + Transmit<'a> + Receive<'a> {}
impl<'a, T: Configure + Transmit<'a> + Receive<'a>> Uart<'a> for T {}

/// An extension some UART peripherals provide on top of [`Receive`]: idle-line
/// framing, useful for protocols that don't know the incoming length ahead
/// of time.
pub trait ReceiveAdvanced<'a>: Configure + Receive<'a> {
    /// Receives until either `rx_len` bytes have arrived or the line has
    /// been idle for `interbyte_timeout_units` bit-times, whichever comes
    /// first. Used to frame variable-length packets without relying on
    /// a single fixed length.
    fn receive_automatic(
        &self,
        rx_buffer: &'static mut [u8],
        rx_len: usize,
        interbyte_timeout_units: u8,
    ) -> Result<(), (ErrorCode, &'static mut [u8])>;
}
