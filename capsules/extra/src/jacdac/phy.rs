// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! The line driver: owns the GPIO pin, UART and alarm that together drive
//! one half-duplex wire, and turns line edges and DMA completions into
//! whole frames.
//!
//! A frame is preceded by a low pulse whose width names the frame's baud
//! rate; the driver measures that pulse on [`gpio::Client::fired`], then
//! drives the header and payload in with two `receive_buffer` calls.
//! Transmission is the mirror image: wait out the inter-frame spacing plus a
//! random backoff, drive the pulse itself, then hand the serialized frame to
//! the UART. Every error path (framing/overrun, inter-byte timeout, line
//! held low too long) converges on `ErrorRecovery`, which waits for the line
//! to sit idle-high for a bus-normality window before rejoining
//! `ListeningForPulse`.

use core::cell::Cell;

use kernel::hil::gpio;
use kernel::hil::time::{Alarm, AlarmClient, ConvertTicks, Ticks};
use kernel::hil::uart;
use kernel::utilities::cells::{OptionalCell, TakeCell};
use kernel::ErrorCode;

use super::packet::{BaudCode, Packet, HEADER_LEN, MAX_DATA_LEN, MAX_PACKET_LEN};
use super::queue::PacketQueue;

/// Max inter-byte gap and bus-normality idle window are both specified as a
/// multiple of the 125 kbaud byte time; min inter-frame spacing and max
/// accepted low-pulse width are fixed multiples of that same constant
/// regardless of the frame's own baud rate.
const BYTE_TIME_125K_US: u32 = 80;
const MAX_LOW_PULSE_US: u32 = 3 * BYTE_TIME_125K_US;
const MIN_INTERFRAME_SPACING_US: u32 = 2 * BYTE_TIME_125K_US;
const BUS_NORMALITY_IDLE_US: u32 = 2 * BYTE_TIME_125K_US;
const RANDOM_BACKOFF_MAX_US: u32 = 1000;

/// Observable bus state, returned by [`LineDriver::get_state`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LineState {
    Off,
    ListeningForPulse,
    Receiving,
    Transmitting,
    ErrorRecovery,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum RxPhase {
    Header,
    Payload,
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum TxPhase {
    AwaitingBackoff,
    DrivingPulse,
    InterDataGap,
    SendingFrame,
}

/// Header fields parsed while the payload DMA is still in flight.
#[derive(Copy, Clone)]
struct PendingRxHeader {
    device_address: u8,
    service_number: u8,
    crc: u16,
    size: u8,
    baud: BaudCode,
}

/// Free-running error and traffic counters, exposed verbatim by
/// [`LineDriver::get_diagnostics`]. Not reset by `stop()`/`start()`.
#[derive(Default)]
struct Diagnostics {
    uart_errors: Cell<u32>,
    timeouts: Cell<u32>,
    lo_errors: Cell<u32>,
    rx_dropped_busy: Cell<u32>,
    packets_tx: Cell<u32>,
    packets_rx: Cell<u32>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub uart_errors: u32,
    pub timeouts: u32,
    pub lo_errors: u32,
    pub rx_dropped_busy: u32,
    pub packets_tx: u32,
    pub packets_rx: u32,
}

/// Notified when the line driver has RX packets waiting, so an upper layer
/// can drain [`LineDriver::get_packet`] without polling.
pub trait LineDriverClient {
    fn packet_ready(&self);
}

pub struct LineDriver<'a, A: Alarm<'a>> {
    pin: &'a dyn gpio::InterruptPin<'a>,
    uart: &'a dyn uart::Uart<'a>,
    alarm: &'a A,

    state: Cell<LineState>,
    rx_phase: Cell<RxPhase>,
    tx_phase: Cell<TxPhase>,

    pulse_start: Cell<Option<A::Ticks>>,
    pending_rx: Cell<PendingRxHeader>,
    pending_tx_len: Cell<usize>,
    maximum_baud: Cell<BaudCode>,

    header_buf: TakeCell<'static, [u8]>,
    payload_buf: TakeCell<'static, [u8]>,
    tx_buf: TakeCell<'static, [u8]>,

    tx_queue: &'a PacketQueue,
    rx_queue: &'a PacketQueue,

    client: OptionalCell<&'a dyn LineDriverClient>,
    random_state: Cell<u32>,
    diagnostics: Diagnostics,
}

impl<'a, A: Alarm<'a>> LineDriver<'a, A> {
    pub fn new(
        pin: &'a dyn gpio::InterruptPin<'a>,
        uart: &'a dyn uart::Uart<'a>,
        alarm: &'a A,
        tx_queue: &'a PacketQueue,
        rx_queue: &'a PacketQueue,
        header_buf: &'static mut [u8],
        payload_buf: &'static mut [u8],
        tx_buf: &'static mut [u8],
    ) -> Self {
        Self {
            pin,
            uart,
            alarm,
            state: Cell::new(LineState::Off),
            rx_phase: Cell::new(RxPhase::Header),
            tx_phase: Cell::new(TxPhase::AwaitingBackoff),
            pulse_start: Cell::new(None),
            pending_rx: Cell::new(PendingRxHeader {
                device_address: 0,
                service_number: 0,
                crc: 0,
                size: 0,
                baud: BaudCode::Baud125K,
            }),
            pending_tx_len: Cell::new(0),
            maximum_baud: Cell::new(BaudCode::Baud1M),
            header_buf: TakeCell::new(header_buf),
            payload_buf: TakeCell::new(payload_buf),
            tx_buf: TakeCell::new(tx_buf),
            tx_queue,
            rx_queue,
            client: OptionalCell::empty(),
            random_state: Cell::new(0x2545_F491),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Wires this driver up as the client of its own pin/UART/alarm. Must be
    /// called once, after the driver is placed in its final `'static`
    /// location, before [`Self::start`].
    pub fn register(&'static self) {
        self.pin.set_client(self);
        self.alarm.set_alarm_client(self);
        self.uart.set_transmit_client(self);
        self.uart.set_receive_client(self);
    }

    pub fn set_client(&self, client: &'a dyn LineDriverClient) {
        self.client.set(client);
    }

    pub fn start(&self) -> Result<(), ErrorCode> {
        if self.state.get() != LineState::Off {
            return Err(ErrorCode::ALREADY);
        }
        self.pin.make_input();
        self.pin.enable_interrupts(gpio::InterruptEdge::EitherEdge)?;
        self.return_to_listening();
        Ok(())
    }

    /// Releases the pin and UART and drops any in-flight state. Buffers
    /// outstanding in an active DMA transfer are abandoned (the hardware
    /// completion, once it arrives, is ignored by the state guards).
    pub fn stop(&self) {
        self.pin.disable_interrupts();
        let _ = self.alarm.disarm();
        let _ = self.uart.transmit_abort();
        let _ = self.uart.receive_abort();
        self.state.set(LineState::Off);
        self.pulse_start.set(None);
    }

    /// Enqueues `packet` for transmission. The caller is responsible for
    /// having already called [`Packet::finalize_crc`].
    pub fn send(&self, packet: Packet) -> Result<(), ErrorCode> {
        if self.state.get() == LineState::Off {
            return Err(ErrorCode::OFF);
        }
        self.tx_queue.push(packet)?;
        if self.state.get() == LineState::ListeningForPulse {
            self.try_schedule_transmit();
        }
        Ok(())
    }

    pub fn get_packet(&self) -> Option<Packet> {
        self.rx_queue.pop()
    }

    pub fn set_maximum_baud(&self, baud: BaudCode) {
        self.maximum_baud.set(baud);
    }

    pub fn get_maximum_baud(&self) -> BaudCode {
        self.maximum_baud.get()
    }

    pub fn get_state(&self) -> LineState {
        self.state.get()
    }

    pub fn get_diagnostics(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            uart_errors: self.diagnostics.uart_errors.get(),
            timeouts: self.diagnostics.timeouts.get(),
            lo_errors: self.diagnostics.lo_errors.get(),
            rx_dropped_busy: self.diagnostics.rx_dropped_busy.get(),
            packets_tx: self.diagnostics.packets_tx.get(),
            packets_rx: self.diagnostics.packets_rx.get(),
        }
    }

    // -- TX arbitration -----------------------------------------------

    /// Only ever called from `ListeningForPulse` with a non-empty TX queue:
    /// arms the inter-frame-spacing-plus-jitter backoff before the driver
    /// takes the line.
    fn try_schedule_transmit(&self) {
        if self.state.get() != LineState::ListeningForPulse || self.tx_queue.is_empty() {
            return;
        }
        self.state.set(LineState::Transmitting);
        self.tx_phase.set(TxPhase::AwaitingBackoff);
        let dt_us = MIN_INTERFRAME_SPACING_US + self.next_backoff_us();
        let now = self.alarm.now();
        self.alarm.set_alarm(now, self.alarm.ticks_from_us(dt_us));
    }

    /// xorshift32, seeded once at construction and reseeded from the clock
    /// on every draw so repeated backoffs after repeated collisions don't
    /// lock-step.
    fn next_backoff_us(&self) -> u32 {
        let mut x = self.random_state.get() ^ self.alarm.now().into_u32();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random_state.set(x);
        x % RANDOM_BACKOFF_MAX_US
    }

    fn attempt_transmit(&self) {
        if !self.pin.read() {
            // Another node beat us to it; fall back and let the incoming
            // frame be received, then try again later.
            self.return_to_listening();
            return;
        }
        let Some(packet) = self.tx_queue.pop() else {
            self.return_to_listening();
            return;
        };
        let baud = packet.communication_rate;
        let Some(buf) = self.tx_buf.take() else {
            self.enter_error_recovery(false);
            return;
        };
        match packet.to_wire(buf) {
            Ok(len) => {
                self.tx_buf.replace(buf);
                self.pending_tx_len.set(len);
                self.tx_phase.set(TxPhase::DrivingPulse);
                self.maximum_baud.set(baud);
                self.drive_pulse(baud);
            }
            Err(_) => {
                self.tx_buf.replace(buf);
                self.enter_error_recovery(false);
            }
        }
    }

    fn drive_pulse(&self, baud: BaudCode) {
        self.pin.make_output();
        self.pin.clear();
        let width_us = baud as u32 * BYTE_TIME_125K_US;
        let now = self.alarm.now();
        self.alarm.set_alarm(now, self.alarm.ticks_from_us(width_us));
    }

    fn finish_driving_pulse(&self) {
        self.pin.set();
        self.pin.make_input();
        self.tx_phase.set(TxPhase::InterDataGap);
        let gap_us = 2 * self.maximum_baud.get().byte_time_us();
        let now = self.alarm.now();
        self.alarm.set_alarm(now, self.alarm.ticks_from_us(gap_us));
    }

    fn start_frame_transmission(&self) {
        self.tx_phase.set(TxPhase::SendingFrame);
        let len = self.pending_tx_len.get();
        if let Some(buf) = self.tx_buf.take() {
            if let Err((_err, buf)) = self.uart.transmit_buffer(buf, len) {
                self.tx_buf.replace(buf);
                self.enter_error_recovery(false);
            }
        } else {
            self.enter_error_recovery(false);
        }
    }

    // -- RX framing -----------------------------------------------------

    fn begin_receiving_header(&self, baud: BaudCode) {
        self.state.set(LineState::Receiving);
        self.rx_phase.set(RxPhase::Header);
        let mut header = self.pending_rx.get();
        header.baud = baud;
        self.pending_rx.set(header);
        let _ = self.uart.configure(uart::Parameters {
            baud_rate: baud.bits_per_second(),
            width: uart::Width::Eight,
            parity: uart::Parity::None,
            stop_bits: uart::StopBits::One,
            hw_flow_control: false,
        });
        if let Some(buf) = self.header_buf.take() {
            if self.uart.receive_buffer(buf, HEADER_LEN).is_err() {
                self.enter_error_recovery(true);
                return;
            }
        } else {
            self.enter_error_recovery(true);
            return;
        }
        self.arm_rx_timeout(baud);
    }

    fn arm_rx_timeout(&self, baud: BaudCode) {
        let gap_us = 2 * baud.byte_time_us();
        let now = self.alarm.now();
        self.alarm.set_alarm(now, self.alarm.ticks_from_us(gap_us));
    }

    fn handle_header_received(&self, raw: &[u8]) {
        let word = raw[0] as u16 | ((raw[1] as u16) << 8);
        let mut header = self.pending_rx.get();
        header.crc = word & 0x0FFF;
        header.service_number = (word >> 12) as u8;
        header.device_address = raw[2];
        header.size = raw[3];
        self.pending_rx.set(header);

        if header.size == 0 {
            self.deliver_received_packet(&[]);
            return;
        }
        self.rx_phase.set(RxPhase::Payload);
        if let Some(buf) = self.payload_buf.take() {
            if self.uart.receive_buffer(buf, header.size as usize).is_err() {
                self.enter_error_recovery(true);
                return;
            }
        } else {
            self.enter_error_recovery(true);
            return;
        }
        self.arm_rx_timeout(header.baud);
    }

    fn handle_payload_received(&self, data: &[u8]) {
        self.deliver_received_packet(data);
    }

    fn deliver_received_packet(&self, data: &[u8]) {
        let header = self.pending_rx.get();
        let _ = self.alarm.disarm();
        match Packet::from_parts(
            header.device_address,
            header.service_number,
            header.crc,
            header.baud,
            data,
        ) {
            Ok(packet) => {
                if self.rx_queue.push(packet).is_err() {
                    self.diagnostics.rx_dropped_busy.set(self.diagnostics.rx_dropped_busy.get() + 1);
                } else {
                    self.diagnostics.packets_rx.set(self.diagnostics.packets_rx.get() + 1);
                    self.client.map(|c| c.packet_ready());
                }
            }
            Err(_) => {
                self.diagnostics.rx_dropped_busy.set(self.diagnostics.rx_dropped_busy.get() + 1);
            }
        }
        self.return_to_listening();
    }

    // -- error recovery ---------------------------------------------------

    fn enter_error_recovery(&self, is_rx: bool) {
        let _ = self.alarm.disarm();
        if is_rx {
            let _ = self.uart.receive_abort();
        } else {
            let _ = self.uart.transmit_abort();
        }
        self.state.set(LineState::ErrorRecovery);
        self.arm_bus_normality_window();
    }

    fn arm_bus_normality_window(&self) {
        let now = self.alarm.now();
        self.alarm.set_alarm(now, self.alarm.ticks_from_us(BUS_NORMALITY_IDLE_US));
    }

    fn return_to_listening(&self) {
        self.state.set(LineState::ListeningForPulse);
        self.pulse_start.set(None);
        if !self.tx_queue.is_empty() {
            self.try_schedule_transmit();
        }
    }
}

impl<'a, A: Alarm<'a>> gpio::Client for LineDriver<'a, A> {
    fn fired(&self, _identifier: usize) {
        if self.state.get() != LineState::ListeningForPulse {
            return;
        }
        let level_high = self.pin.read();
        if !level_high {
            // Falling edge: line just went low. Start timing the pulse.
            self.pulse_start.set(Some(self.alarm.now()));
            let now = self.alarm.now();
            self.alarm
                .set_alarm(now, self.alarm.ticks_from_us(MAX_LOW_PULSE_US));
            return;
        }
        // Rising edge: only meaningful if we were timing a pulse.
        let Some(start) = self.pulse_start.get() else {
            return;
        };
        let _ = self.alarm.disarm();
        self.pulse_start.set(None);
        let elapsed_us = self.alarm.ticks_to_us(self.alarm.now().wrapping_sub(start));
        match BaudCode::from_pulse_width_us(elapsed_us) {
            Some(baud) => self.begin_receiving_header(baud),
            None => {
                self.diagnostics.uart_errors.set(self.diagnostics.uart_errors.get() + 1);
                self.enter_error_recovery(false);
            }
        }
    }
}

impl<'a, A: Alarm<'a>> AlarmClient for LineDriver<'a, A> {
    fn alarm(&self) {
        match self.state.get() {
            LineState::ListeningForPulse => {
                // The max-low-pulse timeout fired before the line rose.
                if self.pulse_start.take().is_some() {
                    self.diagnostics.lo_errors.set(self.diagnostics.lo_errors.get() + 1);
                    self.enter_error_recovery(false);
                }
            }
            LineState::Transmitting => match self.tx_phase.get() {
                TxPhase::AwaitingBackoff => self.attempt_transmit(),
                TxPhase::DrivingPulse => self.finish_driving_pulse(),
                TxPhase::InterDataGap => self.start_frame_transmission(),
                TxPhase::SendingFrame => (),
            },
            LineState::Receiving => {
                self.diagnostics.timeouts.set(self.diagnostics.timeouts.get() + 1);
                self.enter_error_recovery(true);
            }
            LineState::ErrorRecovery => {
                if self.pin.read() {
                    self.return_to_listening();
                } else {
                    self.arm_bus_normality_window();
                }
            }
            LineState::Off => (),
        }
    }
}

impl<'a, A: Alarm<'a>> uart::TransmitClient for LineDriver<'a, A> {
    fn transmitted_buffer(&self, tx_buffer: &'static mut [u8], _tx_len: usize, rcode: Result<(), ErrorCode>) {
        self.tx_buf.replace(tx_buffer);
        if self.state.get() != LineState::Transmitting || self.tx_phase.get() != TxPhase::SendingFrame {
            return;
        }
        if rcode.is_ok() {
            self.diagnostics.packets_tx.set(self.diagnostics.packets_tx.get() + 1);
        } else {
            self.diagnostics.uart_errors.set(self.diagnostics.uart_errors.get() + 1);
        }
        self.return_to_listening();
    }
}

impl<'a, A: Alarm<'a>> uart::ReceiveClient for LineDriver<'a, A> {
    fn received_buffer(
        &self,
        rx_buffer: &'static mut [u8],
        rx_len: usize,
        rcode: Result<(), ErrorCode>,
        error: uart::Error,
    ) {
        let phase = self.rx_phase.get();
        let is_header = phase == RxPhase::Header;
        if self.state.get() != LineState::Receiving {
            if is_header {
                self.header_buf.replace(rx_buffer);
            } else {
                self.payload_buf.replace(rx_buffer);
            }
            return;
        }
        if rcode.is_err() || error != uart::Error::None {
            if is_header {
                self.header_buf.replace(rx_buffer);
            } else {
                self.payload_buf.replace(rx_buffer);
            }
            self.diagnostics.uart_errors.set(self.diagnostics.uart_errors.get() + 1);
            self.enter_error_recovery(true);
            return;
        }
        match phase {
            RxPhase::Header => {
                let mut scratch = [0u8; HEADER_LEN];
                let n = rx_len.min(HEADER_LEN);
                scratch[..n].copy_from_slice(&rx_buffer[..n]);
                self.header_buf.replace(rx_buffer);
                if n < HEADER_LEN {
                    self.diagnostics.uart_errors.set(self.diagnostics.uart_errors.get() + 1);
                    self.enter_error_recovery(true);
                    return;
                }
                self.handle_header_received(&scratch);
            }
            RxPhase::Payload => {
                let mut scratch = [0u8; MAX_DATA_LEN];
                scratch[..rx_len].copy_from_slice(&rx_buffer[..rx_len]);
                self.payload_buf.replace(rx_buffer);
                self.handle_payload_received(&scratch[..rx_len]);
            }
        }
    }
}
