// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! The control service: drives local address enumeration, resolves address
//! collisions against other nodes on the bus, and routes inbound packets to
//! the services that own them.
//!
//! Runs entirely from a half-second tick (see [`ControlService::tick`]),
//! driven by its own alarm so it stays independent of the line driver's
//! per-byte timers. The line driver is reached only through
//! [`PacketTransport`], which keeps this module from needing to name the
//! line driver's `Alarm` type parameter.

use core::cell::{Cell, RefCell};

use kernel::hil::time::{Alarm, AlarmClient, ConvertTicks, Ticks};
use kernel::utilities::registers::LocalRegisterCopy;
use kernel::ErrorCode;

use super::device_manager::{DeviceHandle, DeviceManager, MAX_DEVICES, MAX_NAME_LEN};
use super::packet::{
    encode_control_packet, BaudCode, ControlPacket, DeviceFlags, Packet, CONTROL_ADDRESS,
    CONTROL_SERVICE_NUMBER,
};
use super::phy::LineDriver;
use super::service::{Service, ServiceMode};
use super::services::configuration::ConfigurationClient;

/// `JD_CONTROL_PACKET_PERIOD` equivalent: the control service's tick period.
pub const TICK_PERIOD_MS: u32 = 500;
/// Ticks of unopposed proposing before an address is considered confirmed.
pub const ADDRESS_CONFIRM_TICKS: u8 = 6;

/// The seam the control service sends and receives bus packets through.
/// Implemented by the line driver; lets this module stay generic over a
/// `DeviceManager`/service table without also naming the line driver's
/// `Alarm` type.
pub trait PacketTransport {
    fn send(&self, packet: Packet) -> Result<(), ErrorCode>;
    fn get_packet(&self) -> Option<Packet>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EnumerationState {
    NotEnumerating,
    Proposing,
    Enumerated,
    /// Transient: a tick's advertisement failed to enqueue (bus off / queue
    /// full). Resumes `resume_state` once a send succeeds again.
    EnumeratingBusLow,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ControlDiagnostics {
    pub crc_drops: u32,
    pub devices_expired: u32,
}

pub struct ControlService<'a, A: Alarm<'a>> {
    identifier: [u8; 8],
    services: &'a [&'a dyn Service],
    device_manager: &'a DeviceManager,
    transport: &'a dyn PacketTransport,
    tick_alarm: &'a A,

    state: Cell<EnumerationState>,
    resume_state: Cell<EnumerationState>,
    rolling_counter: Cell<u8>,
    own_device_address: Cell<u8>,
    own_flags: Cell<LocalRegisterCopy<u8, DeviceFlags::Register>>,
    own_device: Cell<Option<DeviceHandle>>,
    maximum_baud: Cell<BaudCode>,
    random_state: Cell<u32>,

    name_buf: RefCell<[u8; MAX_NAME_LEN]>,
    name_len: Cell<u8>,

    diagnostics: Cell<ControlDiagnostics>,
}

impl<'a, A: Alarm<'a>> ControlService<'a, A> {
    /// `identifier_seed` is a 64-bit source (e.g. a chip unique ID); the
    /// local-administered bit (bit 1 of byte 6) is cleared here so the
    /// derived `unique_device_identifier` never collides with a
    /// manufacturer-assigned one.
    pub fn new(
        identifier_seed: [u8; 8],
        services: &'a [&'a dyn Service],
        device_manager: &'a DeviceManager,
        transport: &'a dyn PacketTransport,
        tick_alarm: &'a A,
    ) -> Self {
        let mut identifier = identifier_seed;
        identifier[6] &= !0x02;
        Self {
            identifier,
            services,
            device_manager,
            transport,
            tick_alarm,
            state: Cell::new(EnumerationState::NotEnumerating),
            resume_state: Cell::new(EnumerationState::NotEnumerating),
            rolling_counter: Cell::new(0),
            own_device_address: Cell::new(0),
            own_flags: Cell::new(LocalRegisterCopy::new(0)),
            own_device: Cell::new(None),
            maximum_baud: Cell::new(BaudCode::Baud1M),
            random_state: Cell::new(0x9E37_79B9),
            name_buf: RefCell::new([0; MAX_NAME_LEN]),
            name_len: Cell::new(0),
            diagnostics: Cell::new(ControlDiagnostics::default()),
        }
    }

    pub fn register(&'static self) {
        self.tick_alarm.set_alarm_client(self);
    }

    /// Arms the first tick. Does not itself start enumeration; call
    /// [`Self::enumerate`] for that.
    pub fn start(&self) {
        self.arm_tick();
    }

    pub fn set_maximum_baud(&self, baud: BaudCode) {
        self.maximum_baud.set(baud);
    }

    pub fn get_state(&self) -> EnumerationState {
        self.state.get()
    }

    pub fn get_address(&self) -> u8 {
        self.own_device_address.get()
    }

    /// This node's own identifier (local-administered bit already cleared),
    /// needed by control-layer services to bind the CRC of packets they
    /// originate.
    pub fn identifier(&self) -> [u8; 8] {
        self.identifier
    }

    pub fn get_diagnostics(&self) -> ControlDiagnostics {
        self.diagnostics.get()
    }

    pub fn set_device_name(&self, name: &[u8]) -> Result<(), ErrorCode> {
        if name.len() > MAX_NAME_LEN {
            return Err(ErrorCode::SIZE);
        }
        self.name_buf.borrow_mut()[..name.len()].copy_from_slice(name);
        self.name_len.set(name.len() as u8);
        let mut flags = self.own_flags.get();
        flags.modify(DeviceFlags::HAS_NAME::SET);
        self.own_flags.set(flags);
        Ok(())
    }

    /// Begins (or restarts) local enumeration: assigns dense service numbers
    /// to every `Host`/`BroadcastHost` service in table order, picks a
    /// random starting address, and enters `Proposing`. A no-op, staying
    /// `NotEnumerating`, if there is no local service to advertise.
    pub fn enumerate(&self) {
        let has_host = self
            .services
            .iter()
            .any(|s| matches!(s.mode(), ServiceMode::Host | ServiceMode::BroadcastHost));
        if !has_host {
            self.state.set(EnumerationState::NotEnumerating);
            return;
        }

        let mut next_number = 1u8;
        for service in self.services {
            if matches!(service.mode(), ServiceMode::Host | ServiceMode::BroadcastHost) {
                service.set_service_number(next_number);
                next_number += 1;
            }
        }

        let address = self.random_address();
        self.own_device_address.set(address);
        let mut flags: LocalRegisterCopy<u8, DeviceFlags::Register> = LocalRegisterCopy::new(0);
        flags.modify(DeviceFlags::PROPOSING::SET);
        if self.name_len.get() > 0 {
            flags.modify(DeviceFlags::HAS_NAME::SET);
        }
        self.own_flags.set(flags);
        self.rolling_counter.set(0);
        self.state.set(EnumerationState::Proposing);

        if let Some(handle) =
            self.device_manager
                .add_local(self.identifier, address, self.maximum_baud.get())
        {
            self.own_device.set(Some(handle));
            for service in self.services {
                if matches!(service.mode(), ServiceMode::Host | ServiceMode::BroadcastHost) {
                    service.set_device(Some(handle));
                }
            }
        }
        kernel::debug!("jacdac: proposing address {}", address);
    }

    /// Tears down local enumeration: releases the local device record and
    /// notifies every host service it is gone.
    pub fn disconnect(&self) {
        if let Some(handle) = self.own_device.take() {
            self.device_manager.remove(handle);
        }
        for service in self.services {
            if matches!(service.mode(), ServiceMode::Host | ServiceMode::BroadcastHost) {
                service.set_device(None);
                service.host_disconnected();
            }
        }
        self.state.set(EnumerationState::NotEnumerating);
    }

    /// Runs one half-second tick: ages remote devices, drains and routes
    /// whatever the line driver queued up, then (if enumerating) advances
    /// the proposal/advertisement state machine.
    pub fn tick(&self) {
        self.process_device_aging();
        self.drain_incoming();

        let state = self.state.get();
        if state == EnumerationState::NotEnumerating {
            return;
        }

        if state == EnumerationState::Proposing {
            let count = self.rolling_counter.get().saturating_add(1);
            self.rolling_counter.set(count);
            if count >= ADDRESS_CONFIRM_TICKS {
                self.confirm_address();
            }
        }

        match self.broadcast_advertisement() {
            Ok(()) => {
                if self.state.get() == EnumerationState::EnumeratingBusLow {
                    self.state.set(self.resume_state.get());
                }
            }
            Err(_) => {
                let cur = self.state.get();
                if cur != EnumerationState::EnumeratingBusLow {
                    self.resume_state.set(cur);
                    self.state.set(EnumerationState::EnumeratingBusLow);
                }
            }
        }
    }

    fn arm_tick(&self) {
        let now = self.tick_alarm.now();
        self.tick_alarm
            .set_alarm(now, self.tick_alarm.ticks_from_ms(TICK_PERIOD_MS));
    }

    fn confirm_address(&self) {
        let mut flags = self.own_flags.get();
        flags.modify(DeviceFlags::PROPOSING::CLEAR);
        self.own_flags.set(flags);
        self.state.set(EnumerationState::Enumerated);
        for service in self.services {
            if matches!(service.mode(), ServiceMode::Host | ServiceMode::BroadcastHost) {
                service.host_connected();
            }
        }
        kernel::debug!("jacdac: address {} confirmed", self.own_device_address.get());
    }

    /// Picks a new random address and resets the rolling counter, keeping
    /// (or re-entering) `Proposing`. Used on every collision outcome that
    /// isn't a reject of the *other* party.
    fn surrender(&self) {
        let address = self.random_address();
        self.own_device_address.set(address);
        let mut flags = self.own_flags.get();
        flags.modify(DeviceFlags::PROPOSING::SET);
        self.own_flags.set(flags);
        self.rolling_counter.set(0);
        self.state.set(EnumerationState::Proposing);
        if let Some(handle) = self.own_device.get() {
            self.device_manager
                .update_with(handle, |device| device.device_address = address);
        }
        kernel::debug!("jacdac: address collision, re-proposing {}", address);
    }

    fn send_reject(&self, target_identifier: [u8; 8], colliding_address: u8) {
        let mut flags: LocalRegisterCopy<u8, DeviceFlags::Register> = LocalRegisterCopy::new(0);
        flags.modify(DeviceFlags::REJECT::SET);
        let mut buf = [0u8; 10];
        let Ok(len) = encode_control_packet(
            &target_identifier,
            colliding_address,
            flags,
            None,
            core::iter::empty(),
            &mut buf,
        ) else {
            return;
        };
        let mut packet = Packet::new(CONTROL_ADDRESS, CONTROL_SERVICE_NUMBER, self.maximum_baud.get());
        if packet.set_data(&buf[..len]).is_err() {
            return;
        }
        packet.finalize_crc(None);
        let _ = self.transport.send(packet);
    }

    /// xorshift32, reseeded from the tick alarm's clock on every draw.
    fn next_random(&self) -> u32 {
        let mut x = self.random_state.get() ^ self.tick_alarm.now().into_u32();
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.random_state.set(x);
        x
    }

    /// Uniform in 1..254, per spec.
    fn random_address(&self) -> u8 {
        1 + (self.next_random() % 253) as u8
    }

    fn process_device_aging(&self) {
        let mut expired = [DeviceHandle::default(); MAX_DEVICES];
        let count = self.device_manager.age_tick(&mut expired);
        if count == 0 {
            return;
        }
        let mut diagnostics = self.diagnostics.get();
        diagnostics.devices_expired += count as u32;
        self.diagnostics.set(diagnostics);
        for handle in &expired[..count] {
            for service in self.services {
                if service.device() == Some(*handle) {
                    service.set_device(None);
                    service.host_disconnected();
                }
            }
        }
    }

    fn drain_incoming(&self) {
        while let Some(packet) = self.transport.get_packet() {
            self.route_packet(&packet);
        }
    }

    fn route_packet(&self, packet: &Packet) {
        if packet.device_address == CONTROL_ADDRESS {
            if packet.service_number == CONTROL_SERVICE_NUMBER {
                self.handle_control_packet(packet);
            } else {
                self.route_control_layer_packet(packet);
            }
        } else {
            self.route_data_packet(packet);
        }
    }

    /// A packet addressed at the control address but under a non-zero
    /// service number is not an enumeration/advertisement packet (that's
    /// always `CONTROL_SERVICE_NUMBER`); it targets whichever
    /// `ControlLayer`-moded service (RNG, configuration) was fixed at that
    /// number. These services aren't bound to a remote device, so there is
    /// no device lookup here, same as `handle_control_packet`.
    fn route_control_layer_packet(&self, packet: &Packet) {
        for service in self.services {
            if service.mode() == ServiceMode::ControlLayer
                && service.service_number() == packet.service_number
                && service.handle_packet(packet)
            {
                break;
            }
        }
    }

    fn handle_control_packet(&self, packet: &Packet) {
        let Ok(control) = ControlPacket::decode(packet.data()) else {
            return;
        };

        if control.is_reject() && control.unique_device_identifier == self.identifier {
            self.surrender();
            return;
        }

        if self.state.get() != EnumerationState::NotEnumerating
            && control.device_address == self.own_device_address.get()
        {
            if control.unique_device_identifier == self.identifier {
                // Case A: our own reflection.
            } else if control.is_proposing() {
                // Case B.
                match self.state.get() {
                    EnumerationState::Proposing => self.surrender(),
                    EnumerationState::Enumerated => {
                        self.send_reject(control.unique_device_identifier, control.device_address)
                    }
                    _ => self.surrender(),
                }
            } else {
                // Case C: a confirmed owner outranks us.
                self.surrender();
            }
            return;
        }

        self.handle_advertisement(&control, packet.communication_rate);
    }

    fn handle_advertisement(&self, control: &ControlPacket, rate: BaudCode) {
        if control.unique_device_identifier == self.identifier {
            return;
        }
        let Some(handle) = self.device_manager.add(control, rate) else {
            return;
        };
        for (index, info) in control.service_infos().enumerate() {
            let remote_service_number = (index + 1) as u8;
            for service in self.services {
                match service.mode() {
                    ServiceMode::Client
                        if service.service_class() == info.service_class
                            && Self::matches_required_device(service, control) =>
                    {
                        service.handle_advertisement(handle, &info);
                    }
                    ServiceMode::BroadcastHost if service.service_class() == info.service_class => {
                        let local_number = service.service_number();
                        self.device_manager.update_with(handle, |device| {
                            device.set_broadcast_mapping(remote_service_number, local_number);
                        });
                    }
                    _ => {}
                }
            }
        }
    }

    /// A `Client` service's `requiredDevice`, when set, must match the
    /// advertising device by identifier or by name (spec.md §4.5's routing
    /// rule); a service that sets neither matches any advertiser.
    fn matches_required_device(service: &&dyn Service, control: &ControlPacket) -> bool {
        if let Some(required_id) = service.required_device_identifier() {
            if required_id != control.unique_device_identifier {
                return false;
            }
        }
        if let Some(required_name) = service.required_device_name() {
            if Some(required_name) != control.name() {
                return false;
            }
        }
        true
    }

    fn route_data_packet(&self, packet: &Packet) {
        let Some(handle) = self.device_manager.lookup_by_address(packet.device_address) else {
            return;
        };
        let Some(device) = self.device_manager.get(handle) else {
            return;
        };
        if !packet.crc_valid(Some(&device.unique_device_identifier)) {
            let mut diagnostics = self.diagnostics.get();
            diagnostics.crc_drops += 1;
            self.diagnostics.set(diagnostics);
            return;
        }

        if device.has_broadcast_mapping(packet.service_number) {
            let local_number = device.broadcast_local_service_number(packet.service_number);
            for service in self.services {
                if service.mode() == ServiceMode::BroadcastHost
                    && service.service_number() == local_number
                    && service.handle_packet(packet)
                {
                    break;
                }
            }
            return;
        }

        for service in self.services {
            if service.device() == Some(handle)
                && service.service_number() == packet.service_number
                && service.handle_packet(packet)
            {
                break;
            }
        }
    }

    /// Writes this node's own advertisement (identifier, address, flags,
    /// name, one `ServiceInfo` per non-client, non-control-layer service)
    /// and hands it to the transport addressed at the broadcast control
    /// service.
    fn broadcast_advertisement(&self) -> Result<(), ErrorCode> {
        let mut payload = [0u8; 240];
        let len = self.build_advertisement(&mut payload)?;
        let mut packet = Packet::new(CONTROL_ADDRESS, CONTROL_SERVICE_NUMBER, self.maximum_baud.get());
        packet.set_data(&payload[..len])?;
        packet.finalize_crc(None);
        self.transport.send(packet)
    }

    fn build_advertisement(&self, out: &mut [u8]) -> Result<usize, ErrorCode> {
        if out.len() < 10 {
            return Err(ErrorCode::SIZE);
        }
        out[0..8].copy_from_slice(&self.identifier);
        out[8] = self.own_device_address.get();
        out[9] = self.own_flags.get().get();
        let mut pos = 10;

        let name_len = self.name_len.get() as usize;
        if name_len > 0 {
            if pos + 1 + name_len > out.len() {
                return Err(ErrorCode::SIZE);
            }
            out[pos] = name_len as u8;
            pos += 1;
            out[pos..pos + name_len].copy_from_slice(&self.name_buf.borrow()[..name_len]);
            pos += name_len;
        }

        for service in self.services {
            if matches!(service.mode(), ServiceMode::Client | ServiceMode::ControlLayer) {
                continue;
            }
            if pos + 6 > out.len() {
                break;
            }
            let mut adv = [0u8; 16];
            let adv_len = (service.add_advertisement_data(&mut adv) as usize).min(16);
            if pos + 6 + adv_len > out.len() {
                break;
            }
            out[pos..pos + 4].copy_from_slice(&service.service_class().to_le_bytes());
            out[pos + 4] = 0;
            out[pos + 5] = adv_len as u8;
            pos += 6;
            out[pos..pos + adv_len].copy_from_slice(&adv[..adv_len]);
            pos += adv_len;
        }
        Ok(pos)
    }
}

impl<'a, A: Alarm<'a>> AlarmClient for ControlService<'a, A> {
    fn alarm(&self) {
        self.tick();
        self.arm_tick();
    }
}

/// Lets the configuration service apply a rename/identify request without
/// this module naming `ControlService`'s own `Alarm` type parameter.
impl<'a, A: Alarm<'a>> ConfigurationClient for ControlService<'a, A> {
    fn rename(&self, name: &[u8]) -> Result<(), ErrorCode> {
        ControlService::set_device_name(self, name)
    }

    fn own_device_address(&self) -> u8 {
        ControlService::get_address(self)
    }
}

impl<'a, A: Alarm<'a>> PacketTransport for LineDriver<'a, A> {
    fn send(&self, packet: Packet) -> Result<(), ErrorCode> {
        LineDriver::send(self, packet)
    }

    fn get_packet(&self) -> Option<Packet> {
        LineDriver::get_packet(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jacdac::service::UNASSIGNED_SERVICE_NUMBER;
    use kernel::hil::time::{Freq1MHz, Time, Ticks32};
    use std::collections::VecDeque;

    struct FakeAlarm<'a> {
        now: Cell<u32>,
        armed: Cell<Option<(u32, u32)>>,
        client: kernel::utilities::cells::OptionalCell<&'a dyn AlarmClient>,
    }

    impl<'a> FakeAlarm<'a> {
        fn new() -> Self {
            Self {
                now: Cell::new(0),
                armed: Cell::new(None),
                client: kernel::utilities::cells::OptionalCell::empty(),
            }
        }
    }

    impl<'a> Time for FakeAlarm<'a> {
        type Frequency = Freq1MHz;
        type Ticks = Ticks32;
        fn now(&self) -> Ticks32 {
            Ticks32::from(self.now.get())
        }
    }

    impl<'a> Alarm<'a> for FakeAlarm<'a> {
        fn set_alarm_client(&self, client: &'a dyn AlarmClient) {
            self.client.set(client);
        }
        fn set_alarm(&self, reference: Ticks32, dt: Ticks32) {
            self.armed.set(Some((reference.into_u32(), dt.into_u32())));
        }
        fn get_alarm(&self) -> Ticks32 {
            match self.armed.get() {
                Some((reference, dt)) => Ticks32::from(reference.wrapping_add(dt)),
                None => Ticks32::from(0),
            }
        }
        fn disarm(&self) -> Result<(), ErrorCode> {
            self.armed.set(None);
            Ok(())
        }
        fn is_armed(&self) -> bool {
            self.armed.get().is_some()
        }
        fn minimum_dt(&self) -> Ticks32 {
            Ticks32::from(1)
        }
    }

    struct FakeTransport {
        outbox: RefCell<VecDeque<Packet>>,
        inbox: RefCell<VecDeque<Packet>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                outbox: RefCell::new(VecDeque::new()),
                inbox: RefCell::new(VecDeque::new()),
            }
        }

        fn inject(&self, packet: Packet) {
            self.inbox.borrow_mut().push_back(packet);
        }

        fn take_sent(&self) -> Option<Packet> {
            self.outbox.borrow_mut().pop_front()
        }
    }

    impl PacketTransport for FakeTransport {
        fn send(&self, packet: Packet) -> Result<(), ErrorCode> {
            self.outbox.borrow_mut().push_back(packet);
            Ok(())
        }
        fn get_packet(&self) -> Option<Packet> {
            self.inbox.borrow_mut().pop_front()
        }
    }

    struct StubService {
        class: u32,
        mode: ServiceMode,
        number: Cell<u8>,
        device: Cell<Option<DeviceHandle>>,
        host_connected_calls: Cell<u32>,
        host_disconnected_calls: Cell<u32>,
        handled: Cell<u32>,
    }

    impl StubService {
        fn new(class: u32, mode: ServiceMode) -> Self {
            Self {
                class,
                mode,
                number: Cell::new(UNASSIGNED_SERVICE_NUMBER),
                device: Cell::new(None),
                host_connected_calls: Cell::new(0),
                host_disconnected_calls: Cell::new(0),
                handled: Cell::new(0),
            }
        }
    }

    impl Service for StubService {
        fn service_class(&self) -> u32 {
            self.class
        }
        fn mode(&self) -> ServiceMode {
            self.mode
        }
        fn service_number(&self) -> u8 {
            self.number.get()
        }
        fn set_service_number(&self, service_number: u8) {
            self.number.set(service_number);
        }
        fn device(&self) -> Option<DeviceHandle> {
            self.device.get()
        }
        fn set_device(&self, device: Option<DeviceHandle>) {
            self.device.set(device);
        }
        fn handle_packet(&self, _packet: &Packet) -> bool {
            self.handled.set(self.handled.get() + 1);
            true
        }
        fn host_connected(&self) {
            self.host_connected_calls.set(self.host_connected_calls.get() + 1);
        }
        fn host_disconnected(&self) {
            self.host_disconnected_calls
                .set(self.host_disconnected_calls.get() + 1);
        }
    }

    fn encode_inbound_control(
        identifier: [u8; 8],
        address: u8,
        flags: LocalRegisterCopy<u8, DeviceFlags::Register>,
    ) -> Packet {
        let mut buf = [0u8; 10];
        let len = encode_control_packet(&identifier, address, flags, None, core::iter::empty(), &mut buf).unwrap();
        let mut packet = Packet::new(CONTROL_ADDRESS, CONTROL_SERVICE_NUMBER, BaudCode::Baud125K);
        packet.set_data(&buf[..len]).unwrap();
        packet.finalize_crc(None);
        packet
    }

    #[test]
    fn enumerate_without_host_services_stays_not_enumerating() {
        let client = StubService::new(8, ServiceMode::Client);
        let services: [&dyn Service; 1] = [&client];
        let device_manager = DeviceManager::new();
        let transport = FakeTransport::new();
        let alarm = FakeAlarm::new();
        let control = ControlService::new([1; 8], &services, &device_manager, &transport, &alarm);

        control.enumerate();
        assert_eq!(control.get_state(), EnumerationState::NotEnumerating);
    }

    #[test]
    fn enumeration_confirms_after_six_ticks() {
        let host = StubService::new(8, ServiceMode::Host);
        let services: [&dyn Service; 1] = [&host];
        let device_manager = DeviceManager::new();
        let transport = FakeTransport::new();
        let alarm = FakeAlarm::new();
        let control = ControlService::new([1; 8], &services, &device_manager, &transport, &alarm);

        control.enumerate();
        assert_eq!(control.get_state(), EnumerationState::Proposing);
        assert!((1..254).contains(&control.get_address()));
        assert_eq!(host.number.get(), 1);

        for _ in 0..ADDRESS_CONFIRM_TICKS {
            control.tick();
        }

        assert_eq!(control.get_state(), EnumerationState::Enumerated);
        assert_eq!(host.host_connected_calls.get(), 1);

        let last = transport.take_sent().unwrap();
        let control_packet = ControlPacket::decode(last.data()).unwrap();
        assert!(!control_packet.is_proposing());
        let info = control_packet.service_infos().next().unwrap();
        assert_eq!(info.service_class, 8);
    }

    #[test]
    fn proposing_collision_forces_surrender() {
        let host = StubService::new(8, ServiceMode::Host);
        let services: [&dyn Service; 1] = [&host];
        let device_manager = DeviceManager::new();
        let transport = FakeTransport::new();
        let alarm = FakeAlarm::new();
        let control = ControlService::new([1; 8], &services, &device_manager, &transport, &alarm);

        control.enumerate();
        let original_address = control.get_address();

        let mut flags: LocalRegisterCopy<u8, DeviceFlags::Register> = LocalRegisterCopy::new(0);
        flags.modify(DeviceFlags::PROPOSING::SET);
        let colliding = encode_inbound_control([2; 8], original_address, flags);
        transport.inject(colliding);

        control.tick();

        assert_eq!(control.get_state(), EnumerationState::Proposing);
        assert_ne!(control.get_address(), original_address);
    }

    #[test]
    fn reject_of_our_identifier_forces_surrender() {
        let host = StubService::new(8, ServiceMode::Host);
        let services: [&dyn Service; 1] = [&host];
        let device_manager = DeviceManager::new();
        let transport = FakeTransport::new();
        let alarm = FakeAlarm::new();
        let control = ControlService::new([3; 8], &services, &device_manager, &transport, &alarm);

        control.enumerate();
        control.tick();
        let counter_before = control.rolling_counter.get();
        assert!(counter_before > 0);

        let mut flags: LocalRegisterCopy<u8, DeviceFlags::Register> = LocalRegisterCopy::new(0);
        flags.modify(DeviceFlags::REJECT::SET);
        let reject = encode_inbound_control(control.identifier(), control.get_address(), flags);
        transport.inject(reject);

        control.tick();

        assert_eq!(control.get_state(), EnumerationState::Proposing);
        assert_eq!(control.rolling_counter.get(), 0);
    }

    #[test]
    fn broadcast_advertisement_maps_remote_service_and_routes_data() {
        let broadcast_host = StubService::new(9, ServiceMode::BroadcastHost);
        let services: [&dyn Service; 1] = [&broadcast_host];
        let device_manager = DeviceManager::new();
        let transport = FakeTransport::new();
        let alarm = FakeAlarm::new();
        let control = ControlService::new([4; 8], &services, &device_manager, &transport, &alarm);
        control.enumerate();
        assert_eq!(broadcast_host.number.get(), 1);

        let remote_identifier = [7u8; 8];
        let flags: LocalRegisterCopy<u8, DeviceFlags::Register> = LocalRegisterCopy::new(0);
        let mut buf = [0u8; 32];
        let adv = [0u8; 0];
        let len = encode_control_packet(
            &remote_identifier,
            50,
            flags,
            None,
            core::iter::once((9u32, 0u8, &adv[..])),
            &mut buf,
        )
        .unwrap();
        let mut advertisement = Packet::new(CONTROL_ADDRESS, CONTROL_SERVICE_NUMBER, BaudCode::Baud125K);
        advertisement.set_data(&buf[..len]).unwrap();
        advertisement.finalize_crc(None);
        transport.inject(advertisement);

        control.tick();

        let handle = device_manager.lookup_by_address(50).expect("remote device tracked");
        let device = device_manager.get(handle).unwrap();
        assert!(device.has_broadcast_mapping(1));
        assert_eq!(device.broadcast_local_service_number(1), 1);

        let mut data_packet = Packet::new(50, 1, BaudCode::Baud125K);
        data_packet.set_data(&[42]).unwrap();
        data_packet.finalize_crc(Some(&remote_identifier));
        transport.inject(data_packet);

        control.tick();

        assert_eq!(broadcast_host.handled.get(), 1);
    }
}
