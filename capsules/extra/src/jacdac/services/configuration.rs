// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Control-layer configuration service (service class 2, fixed service
//! number 1): applies a requested device rename or identify action.
//! Delegates the actual mutation back to whatever implements
//! [`ConfigurationClient`], so this module never needs to name the control
//! service's `Alarm` type parameter.

use core::cell::Cell;

use super::super::device_manager::DeviceHandle;
use super::super::packet::Packet;
use super::super::service::{Service, ServiceMode};

pub const SERVICE_CLASS_CONFIGURATION: u32 = 2;
/// `JD_CONTROL_CONFIGURATION_SERVICE_NUMBER`: fixed, not reassigned by
/// enumeration.
pub const SERVICE_NUMBER: u8 = 1;
pub const REQUEST_NAME: u8 = 1;
pub const REQUEST_INDICATE: u8 = 2;

/// The seam the control service implements so this service can apply a
/// rename or trigger an identify action without this module depending on
/// the control service's own generic parameters.
pub trait ConfigurationClient {
    fn rename(&self, name: &[u8]) -> Result<(), kernel::ErrorCode>;

    /// Default no-op: identify has no generic action at the control-service
    /// level (it is normally a blinking LED or similar), so a board wires
    /// this up itself if it wants one.
    fn identify(&self) {}

    /// This node's own bus address, so a broadcast configuration packet
    /// (sent to the control address with an embedded target
    /// `device_address`) can be self-filtered against it.
    fn own_device_address(&self) -> u8;
}

pub struct ConfigurationService<'a> {
    service_number: Cell<u8>,
    device: Cell<Option<DeviceHandle>>,
    client: &'a dyn ConfigurationClient,
    identify_requests: Cell<u32>,
}

impl<'a> ConfigurationService<'a> {
    pub fn new(client: &'a dyn ConfigurationClient) -> Self {
        Self {
            service_number: Cell::new(SERVICE_NUMBER),
            device: Cell::new(None),
            client,
            identify_requests: Cell::new(0),
        }
    }

    pub fn identify_request_count(&self) -> u32 {
        self.identify_requests.get()
    }
}

impl<'a> Service for ConfigurationService<'a> {
    fn service_class(&self) -> u32 {
        SERVICE_CLASS_CONFIGURATION
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

    /// Payload is `(device_address, request_type, data)`, matching
    /// `JDConfigurationPacket`'s field order: the packet is broadcast to the
    /// control address, and every node's configuration service self-filters
    /// on whether the embedded `device_address` names it.
    fn handle_packet(&self, packet: &Packet) -> bool {
        let data = packet.data();
        if data.len() < 2 {
            return false;
        }
        let target_address = data[0];
        if target_address != self.client.own_device_address() {
            return false;
        }
        let request_type = data[1];
        let payload = &data[2..];
        match request_type {
            REQUEST_NAME => {
                let _ = self.client.rename(payload);
                true
            }
            REQUEST_INDICATE => {
                self.identify_requests.set(self.identify_requests.get() + 1);
                self.client.identify();
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::super::packet::{BaudCode, CONTROL_ADDRESS};
    use core::cell::RefCell;
    use kernel::ErrorCode;

    struct FakeClient {
        address: u8,
        renamed: RefCell<Option<[u8; 8]>>,
        identify_calls: Cell<u32>,
    }

    impl FakeClient {
        fn new(address: u8) -> Self {
            Self {
                address,
                renamed: RefCell::new(None),
                identify_calls: Cell::new(0),
            }
        }
    }

    impl ConfigurationClient for FakeClient {
        fn rename(&self, name: &[u8]) -> Result<(), ErrorCode> {
            let mut buf = [0u8; 8];
            let n = name.len().min(8);
            buf[..n].copy_from_slice(&name[..n]);
            *self.renamed.borrow_mut() = Some(buf);
            Ok(())
        }

        fn identify(&self) {
            self.identify_calls.set(self.identify_calls.get() + 1);
        }

        fn own_device_address(&self) -> u8 {
            self.address
        }
    }

    #[test]
    fn name_request_delegates_to_client_rename() {
        let client = FakeClient::new(5);
        let service = ConfigurationService::new(&client);
        assert_eq!(service.service_number(), SERVICE_NUMBER);

        let mut packet = Packet::new(CONTROL_ADDRESS, SERVICE_NUMBER, BaudCode::Baud1M);
        let mut data = vec![5, REQUEST_NAME];
        data.extend_from_slice(b"desk-lamp");
        packet.set_data(&data).unwrap();

        assert!(service.handle_packet(&packet));
        let renamed = client.renamed.borrow();
        assert_eq!(&renamed.unwrap()[..8], b"desk-lam");
    }

    #[test]
    fn indicate_request_calls_identify_and_counts_it() {
        let client = FakeClient::new(5);
        let service = ConfigurationService::new(&client);

        let mut packet = Packet::new(CONTROL_ADDRESS, SERVICE_NUMBER, BaudCode::Baud1M);
        packet.set_data(&[5, REQUEST_INDICATE]).unwrap();

        assert!(service.handle_packet(&packet));
        assert!(service.handle_packet(&packet));
        assert_eq!(client.identify_calls.get(), 2);
        assert_eq!(service.identify_request_count(), 2);
    }

    #[test]
    fn unknown_request_type_is_not_handled() {
        let client = FakeClient::new(5);
        let service = ConfigurationService::new(&client);

        let mut packet = Packet::new(CONTROL_ADDRESS, SERVICE_NUMBER, BaudCode::Baud1M);
        packet.set_data(&[5, 0xAA]).unwrap();
        assert!(!service.handle_packet(&packet));
    }

    #[test]
    fn request_for_other_device_is_not_handled() {
        let client = FakeClient::new(5);
        let service = ConfigurationService::new(&client);

        let mut packet = Packet::new(CONTROL_ADDRESS, SERVICE_NUMBER, BaudCode::Baud1M);
        packet.set_data(&[9, REQUEST_INDICATE]).unwrap();
        assert!(!service.handle_packet(&packet));
        assert_eq!(client.identify_calls.get(), 0);
    }
}
