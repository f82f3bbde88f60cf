// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Control-layer RNG service (service class 1, fixed service number 2):
//! answers a request with a random word, backed by a `kernel::hil::rng::Rng`
//! capability rather than a bespoke PRNG.

use core::cell::Cell;

use kernel::hil::rng::{Client, Continue, Rng};
use kernel::ErrorCode;

use super::super::control::PacketTransport;
use super::super::device_manager::DeviceHandle;
use super::super::packet::{BaudCode, Packet, CONTROL_ADDRESS};
use super::super::service::{Service, ServiceMode};

pub const SERVICE_CLASS_RNG: u32 = 1;
/// `JD_CONTROL_RNG_SERVICE_NUMBER`: fixed, not reassigned by enumeration.
pub const SERVICE_NUMBER: u8 = 2;
/// `JDRNGServicePacket::request_type` values; the wire struct is two
/// 4-byte words (`request_type`, `random`), not a 1-byte request code.
pub const REQUEST: u32 = 1;
pub const RESPONSE: u32 = 2;

pub struct RngService<'a> {
    service_number: Cell<u8>,
    device: Cell<Option<DeviceHandle>>,
    own_identifier: [u8; 8],
    rng: &'a dyn Rng<'a>,
    transport: &'a dyn PacketTransport,
    maximum_baud: Cell<BaudCode>,
    pending_source_address: Cell<Option<u8>>,
}

impl<'a> RngService<'a> {
    pub fn new(own_identifier: [u8; 8], rng: &'a dyn Rng<'a>, transport: &'a dyn PacketTransport) -> Self {
        Self {
            service_number: Cell::new(SERVICE_NUMBER),
            device: Cell::new(None),
            own_identifier,
            rng,
            transport,
            maximum_baud: Cell::new(BaudCode::Baud1M),
            pending_source_address: Cell::new(None),
        }
    }

    pub fn register(&'a self) {
        self.rng.set_client(self);
    }

    pub fn set_maximum_baud(&self, baud: BaudCode) {
        self.maximum_baud.set(baud);
    }

    fn send_response(&self, device_address: u8, word: u32) {
        let mut data = [0u8; 8];
        data[0..4].copy_from_slice(&RESPONSE.to_le_bytes());
        data[4..8].copy_from_slice(&word.to_le_bytes());
        let mut packet = Packet::new(device_address, self.service_number.get(), self.maximum_baud.get());
        if packet.set_data(&data).is_err() {
            return;
        }
        packet.finalize_crc(Some(&self.own_identifier));
        let _ = self.transport.send(packet);
    }
}

impl<'a> Service for RngService<'a> {
    fn service_class(&self) -> u32 {
        SERVICE_CLASS_RNG
    }

    fn mode(&self) -> ServiceMode {
        ServiceMode::ControlLayer
    }

    fn service_number(&self) -> u8 {
        self.service_number.get()
    }

    fn set_service_number(&self, service_number: u8) {
        self.service_number.set(service_number);
    }

    fn device(&self) -> Option<DeviceHandle> {
        self.device.get()
    }

    fn set_device(&self, device: Option<DeviceHandle>) {
        self.device.set(device);
    }

    fn handle_packet(&self, packet: &Packet) -> bool {
        let data = packet.data();
        if data.len() < 4 {
            return false;
        }
        let request_type = u32::from_le_bytes(data[0..4].try_into().unwrap());
        if request_type != REQUEST {
            return false;
        }
        self.pending_source_address.set(Some(packet.device_address));
        if self.rng.get().is_err() {
            self.pending_source_address.set(None);
        }
        true
    }
}

impl<'a> Client for RngService<'a> {
    fn randomness_available(
        &self,
        randomness: &mut dyn Iterator<Item = u32>,
        error: Result<(), ErrorCode>,
    ) -> Continue {
        if let Some(device_address) = self.pending_source_address.take() {
            if error.is_ok() {
                if let Some(word) = randomness.next() {
                    self.send_response(device_address, word);
                }
            }
        }
        Continue::Done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::RefCell;
    use std::collections::VecDeque;

    struct FakeRng<'a> {
        client: Cell<Option<&'a dyn Client>>,
        next_word: Cell<u32>,
    }

    impl<'a> FakeRng<'a> {
        fn new(word: u32) -> Self {
            Self {
                client: Cell::new(None),
                next_word: Cell::new(word),
            }
        }
    }

    impl<'a> Rng<'a> for FakeRng<'a> {
        fn get(&self) -> Result<(), ErrorCode> {
            let word = self.next_word.get();
            if let Some(client) = self.client.get() {
                client.randomness_available(&mut core::iter::once(word), Ok(()));
            }
            Ok(())
        }

        fn cancel(&self) -> Result<(), ErrorCode> {
            Ok(())
        }

        fn set_client(&'a self, client: &'a dyn Client) {
            self.client.set(Some(client));
        }
    }

    struct FakeTransport {
        outbox: RefCell<VecDeque<Packet>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                outbox: RefCell::new(VecDeque::new()),
            }
        }
    }

    impl PacketTransport for FakeTransport {
        fn send(&self, packet: Packet) -> Result<(), ErrorCode> {
            self.outbox.borrow_mut().push_back(packet);
            Ok(())
        }
        fn get_packet(&self) -> Option<Packet> {
            None
        }
    }

    #[test]
    fn request_yields_response_word_to_requester() {
        let rng = FakeRng::new(0xDEAD_BEEF);
        let transport = FakeTransport::new();
        let service = RngService::new([1; 8], &rng, &transport);
        service.register();
        assert_eq!(service.service_number(), SERVICE_NUMBER);

        let mut request = Packet::new(CONTROL_ADDRESS, SERVICE_NUMBER, BaudCode::Baud1M);
        request.set_data(&REQUEST.to_le_bytes()).unwrap();
        assert!(service.handle_packet(&request));

        let response = transport.outbox.borrow_mut().pop_front().expect("response sent");
        assert_eq!(response.device_address, CONTROL_ADDRESS);
        assert_eq!(response.service_number, SERVICE_NUMBER);
        let request_type = u32::from_le_bytes(response.data()[0..4].try_into().unwrap());
        assert_eq!(request_type, RESPONSE);
        let word = u32::from_le_bytes(response.data()[4..8].try_into().unwrap());
        assert_eq!(word, 0xDEAD_BEEF);
    }

    #[test]
    fn non_request_type_is_not_handled() {
        let rng = FakeRng::new(1);
        let transport = FakeTransport::new();
        let service = RngService::new([1; 8], &rng, &transport);

        let mut packet = Packet::new(CONTROL_ADDRESS, SERVICE_NUMBER, BaudCode::Baud1M);
        packet.set_data(&0xFFu32.to_le_bytes()).unwrap();
        assert!(!service.handle_packet(&packet));
    }

    #[test]
    fn truncated_payload_is_not_handled() {
        let rng = FakeRng::new(1);
        let transport = FakeTransport::new();
        let service = RngService::new([1; 8], &rng, &transport);

        let mut packet = Packet::new(CONTROL_ADDRESS, SERVICE_NUMBER, BaudCode::Baud1M);
        packet.set_data(&[1, 0, 0]).unwrap();
        assert!(!service.handle_packet(&packet));
    }
}
