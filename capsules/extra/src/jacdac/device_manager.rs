// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Tracks remote devices by their 64-bit identifier and ages them out by a
//! rolling liveness counter.
//!
//! The original implementation keeps a pointer-linked list of devices, with
//! services holding raw pointers back into it. We replace that with a fixed
//! arena (`[Option<RemoteDevice>; MAX_DEVICES]`) indexed by a stable
//! [`DeviceHandle`]; services hold a handle rather than a pointer, so a
//! device's removal can never leave a dangling reference, only a handle
//! that no longer resolves.

use kernel::utilities::registers::LocalRegisterCopy;

use super::packet::{BaudCode, ControlPacket, DeviceFlags};

/// `JD_DEVICE_MAX_HOST_SERVICES` in the original driver.
pub const MAX_HOST_SERVICES: usize = 16;
/// `broadcast_servicemap` is nibble-packed, two entries per byte.
pub const BROADCAST_MAP_LEN: usize = MAX_HOST_SERVICES / 2;
pub const MAX_NAME_LEN: usize = 32;
/// Six ticks (~3s at the half-second tick period) without a sighting.
pub const DISCONNECT_THRESHOLD: u8 = 6;
/// Arena capacity. Not spec-mandated (the original list is unbounded); a
/// fixed bound is required in a `no_std`, no-alloc crate. Chosen generously
/// for a single-wire bus where dozens of nodes would already saturate
/// bandwidth long before this limit mattered.
pub const MAX_DEVICES: usize = 16;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct DeviceHandle(usize);

#[derive(Clone, Copy)]
pub struct RemoteDevice {
    pub unique_device_identifier: [u8; 8],
    pub device_address: u8,
    pub communication_rate: BaudCode,
    pub device_flags: LocalRegisterCopy<u8, DeviceFlags::Register>,
    pub rolling_counter: u8,
    pub servicemap_bitmsk: u16,
    pub broadcast_servicemap: [u8; BROADCAST_MAP_LEN],
    name: [u8; MAX_NAME_LEN],
    name_len: u8,
}

impl RemoteDevice {
    fn new(
        unique_device_identifier: [u8; 8],
        device_address: u8,
        communication_rate: BaudCode,
        device_flags: LocalRegisterCopy<u8, DeviceFlags::Register>,
    ) -> Self {
        Self {
            unique_device_identifier,
            device_address,
            communication_rate,
            device_flags,
            rolling_counter: 0,
            servicemap_bitmsk: 0,
            broadcast_servicemap: [0; BROADCAST_MAP_LEN],
            name: [0; MAX_NAME_LEN],
            name_len: 0,
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }

    fn set_name(&mut self, name: &[u8]) {
        let n = name.len().min(MAX_NAME_LEN);
        self.name[..n].copy_from_slice(&name[..n]);
        self.name_len = n as u8;
    }

    /// Whether this device's broadcast-advertised `remote_service_number` is
    /// already memoised to a local broadcast-host service.
    pub fn has_broadcast_mapping(&self, remote_service_number: u8) -> bool {
        self.servicemap_bitmsk & (1 << remote_service_number) != 0
    }

    /// The local broadcast-host service number mapped to
    /// `remote_service_number`, if [`has_broadcast_mapping`] is true.
    pub fn broadcast_local_service_number(&self, remote_service_number: u8) -> u8 {
        let nibble = self.broadcast_servicemap[remote_service_number as usize / 2];
        if remote_service_number % 2 == 0 {
            nibble & 0xF
        } else {
            (nibble >> 4) & 0xF
        }
    }

    pub fn set_broadcast_mapping(&mut self, remote_service_number: u8, local_service_number: u8) {
        self.servicemap_bitmsk |= 1 << remote_service_number;
        let idx = remote_service_number as usize / 2;
        let nibble = local_service_number & 0xF;
        self.broadcast_servicemap[idx] = if remote_service_number % 2 == 0 {
            (self.broadcast_servicemap[idx] & 0xF0) | nibble
        } else {
            (self.broadcast_servicemap[idx] & 0x0F) | (nibble << 4)
        };
    }
}

pub struct DeviceManager {
    devices: core::cell::RefCell<[Option<RemoteDevice>; MAX_DEVICES]>,
}

impl DeviceManager {
    pub const fn new() -> Self {
        Self {
            devices: core::cell::RefCell::new([None; MAX_DEVICES]),
        }
    }

    /// Inserts or refreshes the device named by `control`'s identifier.
    /// Idempotent: an existing record is updated in place ([`Self::update`])
    /// rather than duplicated. Returns `None` if the identifier is new and
    /// the arena is full.
    pub fn add(&self, control: &ControlPacket, communication_rate: BaudCode) -> Option<DeviceHandle> {
        if let Some(handle) = self.lookup_by_identifier(&control.unique_device_identifier) {
            self.update(handle, control, communication_rate);
            return Some(handle);
        }
        let mut devices = self.devices.borrow_mut();
        let index = devices.iter().position(|slot| slot.is_none())?;
        let mut device = RemoteDevice::new(
            control.unique_device_identifier,
            control.device_address,
            communication_rate,
            control.flags,
        );
        if let Some(name) = control.name() {
            device.set_name(name);
        }
        devices[index] = Some(device);
        Some(DeviceHandle(index))
    }

    /// Refreshes an existing device's fields and resets its rolling counter.
    /// The name is only rewritten when it actually differs, to avoid
    /// needless copying on every advertisement.
    pub fn update(&self, handle: DeviceHandle, control: &ControlPacket, communication_rate: BaudCode) {
        if let Some(device) = self.devices.borrow_mut()[handle.0].as_mut() {
            device.device_address = control.device_address;
            device.communication_rate = communication_rate;
            device.device_flags = control.flags;
            device.rolling_counter = 0;
            if let Some(name) = control.name() {
                if name != device.name() {
                    device.set_name(name);
                }
            }
        }
    }

    /// Allocates the arena slot for this node's own device record (used by
    /// the control service at enumeration time, never for a remote).
    /// Returns `None` if the arena is full.
    pub fn add_local(
        &self,
        unique_device_identifier: [u8; 8],
        device_address: u8,
        communication_rate: BaudCode,
    ) -> Option<DeviceHandle> {
        let mut devices = self.devices.borrow_mut();
        let index = devices.iter().position(|slot| slot.is_none())?;
        devices[index] = Some(RemoteDevice::new(
            unique_device_identifier,
            device_address,
            communication_rate,
            LocalRegisterCopy::new(0),
        ));
        Some(DeviceHandle(index))
    }

    pub fn lookup_by_address(&self, device_address: u8) -> Option<DeviceHandle> {
        self.devices
            .borrow()
            .iter()
            .position(|slot| matches!(slot, Some(d) if d.device_address == device_address))
            .map(DeviceHandle)
    }

    pub fn lookup_by_identifier(&self, unique_device_identifier: &[u8; 8]) -> Option<DeviceHandle> {
        self.devices
            .borrow()
            .iter()
            .position(|slot| matches!(slot, Some(d) if &d.unique_device_identifier == unique_device_identifier))
            .map(DeviceHandle)
    }

    pub fn get(&self, handle: DeviceHandle) -> Option<RemoteDevice> {
        self.devices.borrow()[handle.0]
    }

    pub fn update_with<F: FnOnce(&mut RemoteDevice)>(&self, handle: DeviceHandle, f: F) {
        if let Some(device) = self.devices.borrow_mut()[handle.0].as_mut() {
            f(device);
        }
    }

    pub fn remove(&self, handle: DeviceHandle) {
        self.devices.borrow_mut()[handle.0] = None;
    }

    /// Advances every tracked device's rolling counter by one tick, removing
    /// (and reporting via `expired_out`) any that crossed
    /// [`DISCONNECT_THRESHOLD`] without being refreshed. Returns the number
    /// of handles written to `expired_out`.
    pub fn age_tick(&self, expired_out: &mut [DeviceHandle; MAX_DEVICES]) -> usize {
        let mut count = 0;
        let mut devices = self.devices.borrow_mut();
        for (index, slot) in devices.iter_mut().enumerate() {
            if let Some(device) = slot {
                device.rolling_counter = device.rolling_counter.saturating_add(1);
                if device.rolling_counter > DISCONNECT_THRESHOLD {
                    expired_out[count] = DeviceHandle(index);
                    count += 1;
                    *slot = None;
                }
            }
        }
        count
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control_packet_bytes(identifier: [u8; 8], address: u8, flags: u8) -> [u8; 10] {
        let mut buf = [0u8; 10];
        buf[0..8].copy_from_slice(&identifier);
        buf[8] = address;
        buf[9] = flags;
        buf
    }

    #[test]
    fn add_is_idempotent_on_identifier() {
        let mgr = DeviceManager::new();
        let id = [1u8; 8];
        let bytes = control_packet_bytes(id, 7, 0);
        let control = ControlPacket::decode(&bytes).unwrap();

        let first = mgr.add(&control, BaudCode::Baud125K).unwrap();
        let second = mgr.add(&control, BaudCode::Baud125K).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rolling_counter_resets_on_update() {
        let mgr = DeviceManager::new();
        let id = [2u8; 8];
        let bytes = control_packet_bytes(id, 9, 0);
        let control = ControlPacket::decode(&bytes).unwrap();
        let handle = mgr.add(&control, BaudCode::Baud125K).unwrap();

        let mut expired = [DeviceHandle::default(); MAX_DEVICES];
        for _ in 0..3 {
            mgr.age_tick(&mut expired);
        }
        assert_eq!(mgr.get(handle).unwrap().rolling_counter, 3);

        mgr.update(handle, &control, BaudCode::Baud125K);
        assert_eq!(mgr.get(handle).unwrap().rolling_counter, 0);
    }

    #[test]
    fn device_ages_out_after_disconnect_threshold() {
        let mgr = DeviceManager::new();
        let id = [3u8; 8];
        let bytes = control_packet_bytes(id, 11, 0);
        let control = ControlPacket::decode(&bytes).unwrap();
        let handle = mgr.add(&control, BaudCode::Baud125K).unwrap();

        let mut expired = [DeviceHandle::default(); MAX_DEVICES];
        for _ in 0..DISCONNECT_THRESHOLD {
            let n = mgr.age_tick(&mut expired);
            assert_eq!(n, 0);
        }
        let n = mgr.age_tick(&mut expired);
        assert_eq!(n, 1);
        assert_eq!(expired[0], handle);
        assert!(mgr.get(handle).is_none());
    }

    #[test]
    fn broadcast_mapping_round_trips_through_nibble_packing() {
        let mut device = RemoteDevice::new([0; 8], 1, BaudCode::Baud125K, LocalRegisterCopy::new(0));
        device.set_broadcast_mapping(3, 5);
        assert!(device.has_broadcast_mapping(3));
        assert_eq!(device.broadcast_local_service_number(3), 5);
        assert!(!device.has_broadcast_mapping(2));

        device.set_broadcast_mapping(4, 9);
        assert_eq!(device.broadcast_local_service_number(3), 5);
        assert_eq!(device.broadcast_local_service_number(4), 9);
    }
}
