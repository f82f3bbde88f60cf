// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2022.

//! Virtualize a UART bus.
//!
//! This allows multiple Tock capsules to use the same UART bus. This is likely
//! most useful for `printf()` like applications where multiple things want to
//! write to the same UART channel.
//!
//! Clients can choose if they want to receive. Incoming messages will be sent
//! to all clients that have enabled receiving.
//!
//! `MuxUart` provides shared access to a single UART bus for multiple users.
//! `UartDevice` provides access for a single client.
//!
//! Usage
//! -----
//!
//! ```rust,ignore
//! let uart_mux = static_init!(
//!     MuxUart<'static, sam4l::usart::USART>,
//!     MuxUart::new(&sam4l::usart::USART0, &mut capsules_core::virtualizers::virtual_uart::RX_BUF, 115200)
//! );
//! sam4l::usart::USART0.set_receive_client(uart_mux);
//! sam4l::usart::USART0.set_transmit_client(uart_mux);
//! uart_mux.initialize();
//!
//! let console_uart = static_init!(UartDevice, UartDevice::new(uart_mux, true));
//! console_uart.setup(); // This is important!
//! ```

use core::cell::Cell;
use core::cmp;

use kernel::collections::list::{List, ListLink, ListNode};
use kernel::deferred_call::{DeferredCall, DeferredCallClient};
use kernel::hil::uart;
use kernel::utilities::cells::{OptionalCell, TakeCell};
use kernel::{debug, ErrorCode};

pub const RX_BUF_LEN: usize = 64;

pub struct MuxUart<'a, U: uart::Uart<'a>> {
    uart: &'a U,
    speed: u32,
    devices: List<'a, UartDevice<'a, U>>,
    inflight: OptionalCell<&'a UartDevice<'a, U>>,
    buffer: TakeCell<'static, [u8]>,
    completing_read: Cell<bool>,
    deferred_call: DeferredCall,
}

impl<'a, U: uart::Uart<'a>> uart::TransmitClient for MuxUart<'a, U> {
    fn transmitted_buffer(
        &self,
        tx_buffer: &'static mut [u8],
        tx_len: usize,
        rcode: Result<(), ErrorCode>,
    ) {
        self.inflight.map(move |device| {
            self.inflight.clear();
            device.transmitted_buffer(tx_buffer, tx_len, rcode);
        });
        self.do_next_op();
    }

    fn transmitted_word(&self, rcode: Result<(), ErrorCode>) {
        self.inflight.map(move |device| {
            self.inflight.clear();
            device.transmitted_word(rcode);
        });
        self.do_next_op();
    }
}

impl<'a, U: uart::Uart<'a>> uart::ReceiveClient for MuxUart<'a, U> {
    fn received_buffer(
        &self,
        buffer: &'static mut [u8],
        rx_len: usize,
        rcode: Result<(), ErrorCode>,
        error: uart::Error,
    ) {
        // Likely we will issue another receive in response to the previous one
        // finishing. `next_read_len` keeps track of the shortest outstanding
        // receive requested by any client. We start with the longest it can be,
        // i.e. the length of the buffer we pass to the UART.
        let mut next_read_len = buffer.len();
        let mut read_pending = false;

        self.completing_read.set(true);

        // Because clients may issue another read in their callback we need to
        // first copy out all the data, then make the callbacks.
        self.devices.iter().for_each(|device| {
            if device.receiver {
                device.rx_buffer.take().map(|rxbuf| {
                    let state = device.state.get();
                    let position = device.rx_position.get();
                    let remaining = device.rx_len.get() - position;
                    let len = cmp::min(rx_len, remaining);
                    if state == UartDeviceReceiveState::Receiving
                        || state == UartDeviceReceiveState::Aborting
                    {
                        rxbuf[position..(len + position)].copy_from_slice(&buffer[..len]);
                    }
                    device.rx_position.set(position + len);
                    device.rx_buffer.replace(rxbuf);
                });
            }
        });

        self.devices.iter().for_each(|device| {
            if device.receiver {
                device.rx_buffer.take().map(|rxbuf| {
                    let state = device.state.get();
                    let position = device.rx_position.get();
                    let remaining = device.rx_len.get() - position;
                    if remaining == 0 {
                        device.state.set(UartDeviceReceiveState::Idle);
                        device.received_buffer(rxbuf, position, rcode, error);
                        if device.state.get() == UartDeviceReceiveState::Receiving {
                            read_pending = true;
                            next_read_len = cmp::min(next_read_len, device.rx_len.get());
                        }
                    } else if state == UartDeviceReceiveState::Aborting {
                        device.state.set(UartDeviceReceiveState::Idle);
                        device.received_buffer(
                            rxbuf,
                            position,
                            Err(ErrorCode::CANCEL),
                            uart::Error::Aborted,
                        );
                        if device.state.get() == UartDeviceReceiveState::Receiving {
                            read_pending = true;
                            next_read_len = cmp::min(next_read_len, device.rx_len.get());
                        }
                    } else {
                        device.rx_buffer.replace(rxbuf);
                        next_read_len = cmp::min(next_read_len, remaining);
                        read_pending = true;
                    }
                });
            }
        });

        self.buffer.replace(buffer);
        self.completing_read.set(false);

        if read_pending {
            if let Err((e, buf)) = self.start_receive(next_read_len) {
                self.buffer.replace(buf);
                self.devices.iter().for_each(|device| {
                    if device.receiver {
                        device.rx_buffer.take().map(|rxbuf| {
                            let state = device.state.get();
                            let position = device.rx_position.get();
                            if state == UartDeviceReceiveState::Receiving {
                                device.state.set(UartDeviceReceiveState::Idle);
                                device.received_buffer(
                                    rxbuf,
                                    position,
                                    Err(e),
                                    uart::Error::Aborted,
                                );
                            }
                        });
                    }
                });
            }
        }
    }
}

impl<'a, U: uart::Uart<'a>> MuxUart<'a, U> {
    pub fn new(uart: &'a U, buffer: &'static mut [u8], speed: u32) -> MuxUart<'a, U> {
        MuxUart {
            uart,
            speed,
            devices: List::new(),
            inflight: OptionalCell::empty(),
            buffer: TakeCell::new(buffer),
            completing_read: Cell::new(false),
            deferred_call: DeferredCall::new(),
        }
    }

    pub fn initialize(&self) {
        let _ = self.uart.configure(uart::Parameters {
            baud_rate: self.speed,
            width: uart::Width::Eight,
            stop_bits: uart::StopBits::One,
            parity: uart::Parity::None,
            hw_flow_control: false,
        });
    }

    fn do_next_op(&self) {
        if self.inflight.is_none() {
            let mnode = self.devices.iter().find(|node| node.operation.is_some());
            mnode.map(|node| {
                node.operation.take().map(|op| match op {
                    Operation::Transmit { len } => {
                        node.tx_buffer.take().map(|buf| match self
                            .uart
                            .transmit_buffer(buf, len)
                        {
                            Ok(()) => {
                                self.inflight.set(node);
                            }
                            Err((ecode, buf)) => {
                                node.tx_client.map(move |client| {
                                    node.transmitting.set(false);
                                    client.transmitted_buffer(buf, 0, Err(ecode));
                                });
                            }
                        });
                    }
                    Operation::TransmitWord { word } => {
                        let rcode = self.uart.transmit_word(word);
                        if rcode != Ok(()) {
                            node.tx_client.map(|client| {
                                node.transmitting.set(false);
                                client.transmitted_word(rcode);
                            });
                        } else {
                            self.inflight.set(node);
                        }
                    }
                })
            });
        }
    }

    /// Starts a new UART reception, return value denotes whether starting
    /// the reception will issue a callback before the new read. A callback
    /// needs to be issued before the new read if a read was ongoing; the
    /// callback finishes the current read so the new one can start.
    fn start_receive(&self, rx_len: usize) -> Result<bool, (ErrorCode, &'static mut [u8])> {
        self.buffer.take().map_or_else(
            || {
                if self.completing_read.get() {
                    Ok(false)
                } else {
                    let _ = self.uart.receive_abort();
                    Ok(true)
                }
            },
            |rxbuf| {
                let len = cmp::min(rx_len, rxbuf.len());
                self.uart.receive_buffer(rxbuf, len)?;
                Ok(false)
            },
        )
    }

    /// Asynchronously executes the next operation, if any. Used by calls
    /// to trigger do_next_op such that it will execute after the call
    /// returns. This is important in case the operation triggers an error,
    /// requiring a callback with an error condition; if the operation
    /// is executed synchronously, the callback may be reentrant (executed
    /// during the downcall).
    fn do_next_op_async(&self) {
        self.deferred_call.set();
    }
}

impl<'a, U: uart::Uart<'a>> DeferredCallClient for MuxUart<'a, U> {
    fn handle_deferred_call(&self) {
        self.do_next_op();
    }

    fn register(&'static self) {
        self.deferred_call.register(self);
    }
}

#[derive(Copy, Clone, PartialEq)]
enum Operation {
    Transmit { len: usize },
    TransmitWord { word: u32 },
}

#[derive(Copy, Clone, PartialEq)]
enum UartDeviceReceiveState {
    Idle,
    Receiving,
    Aborting,
}

pub struct UartDevice<'a, U: uart::Uart<'a>> {
    state: Cell<UartDeviceReceiveState>,
    mux: &'a MuxUart<'a, U>,
    receiver: bool, // Whether or not to pass this UartDevice incoming messages.

    tx_buffer: TakeCell<'static, [u8]>,
    transmitting: Cell<bool>,
    rx_buffer: TakeCell<'static, [u8]>,
    rx_position: Cell<usize>,
    rx_len: Cell<usize>,
    operation: OptionalCell<Operation>,
    next: ListLink<'a, UartDevice<'a, U>>,
    rx_client: OptionalCell<&'a dyn uart::ReceiveClient>,
    tx_client: OptionalCell<&'a dyn uart::TransmitClient>,
}

impl<'a, U: uart::Uart<'a>> UartDevice<'a, U> {
    pub fn new(mux: &'a MuxUart<'a, U>, receiver: bool) -> UartDevice<'a, U> {
        UartDevice {
            state: Cell::new(UartDeviceReceiveState::Idle),
            mux,
            receiver,
            tx_buffer: TakeCell::empty(),
            transmitting: Cell::new(false),
            rx_buffer: TakeCell::empty(),
            rx_position: Cell::new(0),
            rx_len: Cell::new(0),
            operation: OptionalCell::empty(),
            next: ListLink::empty(),
            rx_client: OptionalCell::empty(),
            tx_client: OptionalCell::empty(),
        }
    }

    /// Must be called right after `static_init!()`.
    pub fn setup(&'a self) {
        self.mux.devices.push_head(self);
    }
}

impl<'a, U: uart::Uart<'a>> uart::TransmitClient for UartDevice<'a, U> {
    fn transmitted_buffer(
        &self,
        tx_buffer: &'static mut [u8],
        tx_len: usize,
        rcode: Result<(), ErrorCode>,
    ) {
        self.tx_client.map(move |client| {
            self.transmitting.set(false);
            client.transmitted_buffer(tx_buffer, tx_len, rcode);
        });
    }

    fn transmitted_word(&self, rcode: Result<(), ErrorCode>) {
        self.tx_client.map(move |client| {
            self.transmitting.set(false);
            client.transmitted_word(rcode);
        });
    }
}

impl<'a, U: uart::Uart<'a>> uart::ReceiveClient for UartDevice<'a, U> {
    fn received_buffer(
        &self,
        rx_buffer: &'static mut [u8],
        rx_len: usize,
        rcode: Result<(), ErrorCode>,
        error: uart::Error,
    ) {
        self.rx_client.map(move |client| {
            self.state.set(UartDeviceReceiveState::Idle);
            client.received_buffer(rx_buffer, rx_len, rcode, error);
        });
    }
}

impl<'a, U: uart::Uart<'a>> ListNode<'a, UartDevice<'a, U>> for UartDevice<'a, U> {
    fn next(&self) -> &'a ListLink<UartDevice<'a, U>> {
        &self.next
    }
}

impl<'a, U: uart::Uart<'a>> uart::Transmit<'a> for UartDevice<'a, U> {
    fn set_transmit_client(&self, client: &'a dyn uart::TransmitClient) {
        self.tx_client.set(client);
    }

    fn transmit_abort(&self) -> Result<(), ErrorCode> {
        Err(ErrorCode::FAIL)
    }

    fn transmit_buffer(
        &self,
        tx_data: &'static mut [u8],
        tx_len: usize,
    ) -> Result<(), (ErrorCode, &'static mut [u8])> {
        if self.transmitting.get() {
            Err((ErrorCode::BUSY, tx_data))
        } else {
            self.tx_buffer.replace(tx_data);
            self.transmitting.set(true);
            self.operation.set(Operation::Transmit { len: tx_len });
            self.mux.do_next_op_async();
            Ok(())
        }
    }

    fn transmit_word(&self, word: u32) -> Result<(), ErrorCode> {
        if self.transmitting.get() {
            Err(ErrorCode::BUSY)
        } else {
            self.transmitting.set(true);
            self.operation.set(Operation::TransmitWord { word });
            self.mux.do_next_op_async();
            Ok(())
        }
    }
}

impl<'a, U: uart::Uart<'a>> uart::Receive<'a> for UartDevice<'a, U> {
    fn set_receive_client(&self, client: &'a dyn uart::ReceiveClient) {
        self.rx_client.set(client);
    }

    fn receive_buffer(
        &self,
        rx_buffer: &'static mut [u8],
        rx_len: usize,
    ) -> Result<(), (ErrorCode, &'static mut [u8])> {
        if self.rx_buffer.is_some() {
            Err((ErrorCode::BUSY, rx_buffer))
        } else if rx_len > rx_buffer.len() {
            Err((ErrorCode::SIZE, rx_buffer))
        } else {
            self.rx_buffer.replace(rx_buffer);
            self.rx_len.set(rx_len);
            self.rx_position.set(0);
            self.state.set(UartDeviceReceiveState::Idle);
            self.mux.start_receive(rx_len)?;
            self.state.set(UartDeviceReceiveState::Receiving);
            Ok(())
        }
    }

    // This virtualized device will abort its read: other devices
    // devices will continue with their reads.
    fn receive_abort(&self) -> Result<(), ErrorCode> {
        self.state.set(UartDeviceReceiveState::Aborting);
        let _ = self.mux.uart.receive_abort();
        Err(ErrorCode::BUSY)
    }

    fn receive_word(&self) -> Result<(), ErrorCode> {
        Err(ErrorCode::FAIL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;

    struct FakeUart {
        tx_client: OptionalCell<&'static dyn uart::TransmitClient>,
        rx_client: OptionalCell<&'static dyn uart::ReceiveClient>,
        transmitting: Cell<bool>,
        last_params: RefCell<Option<uart::Parameters>>,
    }

    impl FakeUart {
        fn new() -> Self {
            Self {
                tx_client: OptionalCell::empty(),
                rx_client: OptionalCell::empty(),
                transmitting: Cell::new(false),
                last_params: RefCell::new(None),
            }
        }
    }

    impl uart::Configure for FakeUart {
        fn configure(&self, params: uart::Parameters) -> Result<(), ErrorCode> {
            *self.last_params.borrow_mut() = Some(params);
            Ok(())
        }
    }

    impl<'a> uart::Transmit<'a> for FakeUart {
        fn set_transmit_client(&self, client: &'a dyn uart::TransmitClient) {
            self.tx_client.set(client);
        }
        fn transmit_buffer(
            &self,
            tx_data: &'static mut [u8],
            tx_len: usize,
        ) -> Result<(), (ErrorCode, &'static mut [u8])> {
            if self.transmitting.get() {
                return Err((ErrorCode::BUSY, tx_data));
            }
            self.transmitting.set(true);
            self.tx_client.map(move |c| c.transmitted_buffer(tx_data, tx_len, Ok(())));
            self.transmitting.set(false);
            Ok(())
        }
        fn transmit_word(&self, _word: u32) -> Result<(), ErrorCode> {
            Err(ErrorCode::FAIL)
        }
        fn transmit_abort(&self) -> Result<(), ErrorCode> {
            Err(ErrorCode::FAIL)
        }
    }

    impl<'a> uart::Receive<'a> for FakeUart {
        fn set_receive_client(&self, client: &'a dyn uart::ReceiveClient) {
            self.rx_client.set(client);
        }
        fn receive_buffer(
            &self,
            rx_buffer: &'static mut [u8],
            rx_len: usize,
        ) -> Result<(), (ErrorCode, &'static mut [u8])> {
            self.rx_client
                .map(move |c| c.received_buffer(rx_buffer, rx_len, Ok(()), uart::Error::None));
            Ok(())
        }
        fn receive_word(&self) -> Result<(), ErrorCode> {
            Err(ErrorCode::FAIL)
        }
        fn receive_abort(&self) -> Result<(), ErrorCode> {
            Ok(())
        }
    }

    #[test]
    fn test_single_device_transmit_roundtrip() {
        static mut BUF: [u8; RX_BUF_LEN] = [0; RX_BUF_LEN];
        let uart = FakeUart::new();
        let mux_buffer = unsafe { &mut BUF };
        let mux = MuxUart::new(&uart, mux_buffer, 1_000_000);
        mux.initialize();
        assert_eq!(mux.buffer.map(|b| b.len()).unwrap_or(0), RX_BUF_LEN);
    }
}
