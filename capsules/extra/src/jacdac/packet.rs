// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2023.

//! Wire types: the bus `Packet` header, the address-0 `ControlPacket`
//! payload, and the `ServiceInfo` advertisement records a control packet
//! carries.

use enum_primitive::enum_from_primitive;
use kernel::utilities::registers::{register_bitfields, LocalRegisterCopy};
use kernel::ErrorCode;

use super::crc::crc12;

register_bitfields![u8,
    pub DeviceFlags [
        REJECT OFFSET(0) NUMBITS(1) [],
        PROPOSING OFFSET(1) NUMBITS(1) [],
        HAS_NAME OFFSET(2) NUMBITS(1) [],
        NACK OFFSET(3) NUMBITS(1) [],
    ]
];

pub const MAX_DATA_LEN: usize = 255;
pub const HEADER_LEN: usize = 4;
pub const MAX_PACKET_LEN: usize = HEADER_LEN + MAX_DATA_LEN;
pub const CONTROL_ADDRESS: u8 = 0;
pub const CONTROL_SERVICE_NUMBER: u8 = 0;

enum_from_primitive! {
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub enum BaudCode {
        Baud1M = 1,
        Baud500K = 2,
        Baud250K = 4,
        Baud125K = 8,
    }
}

impl BaudCode {
    pub fn bits_per_second(self) -> u32 {
        match self {
            BaudCode::Baud1M => 1_000_000,
            BaudCode::Baud500K => 500_000,
            BaudCode::Baud250K => 250_000,
            BaudCode::Baud125K => 125_000,
        }
    }

    /// Byte time in microseconds: 10 bits (1 start + 8 data + 1 stop) at
    /// `bits_per_second`. 80us at 125 kbaud.
    pub fn byte_time_us(self) -> u32 {
        10_000_000 / self.bits_per_second()
    }

    /// Recovers the baud code a pre-frame low pulse encodes. The pulse
    /// width, in multiples of one byte-time at 125 kbaud, is rounded up to
    /// the nearest power of two; anything outside `{1, 2, 4, 8}` is not a
    /// valid pulse code and signals a UART error to the caller.
    pub fn from_pulse_width_us(measured_us: u32) -> Option<BaudCode> {
        if measured_us == 0 {
            return None;
        }
        let byte_time = BaudCode::Baud125K.byte_time_us();
        let units = (measured_us + byte_time - 1) / byte_time;
        match units.next_power_of_two() {
            1 => Some(BaudCode::Baud1M),
            2 => Some(BaudCode::Baud500K),
            4 => Some(BaudCode::Baud250K),
            8 => Some(BaudCode::Baud125K),
            _ => None,
        }
    }
}

/// One bus-level packet: the 4-byte header plus up to 255 bytes of payload.
/// `communication_rate` is carried out-of-band (the baud code is conveyed on
/// the wire by the pre-frame pulse width, not by any header byte).
#[derive(Clone)]
pub struct Packet {
    pub service_number: u8,
    pub device_address: u8,
    pub communication_rate: BaudCode,
    /// The 12-bit CRC this packet carries on the wire. Zero (invalid) until
    /// either [`Packet::finalize_crc`] (outbound) or [`Packet::from_wire`]
    /// (inbound) sets it; the line driver only ever serializes or parses
    /// this field, never computes it, since only the control service knows
    /// which device identifier (if any) a unicast frame is bound to.
    crc: u16,
    data: [u8; MAX_DATA_LEN],
    data_len: u8,
}

impl Packet {
    pub fn new(device_address: u8, service_number: u8, communication_rate: BaudCode) -> Self {
        Self {
            service_number: service_number & 0xF,
            device_address,
            communication_rate,
            crc: 0,
            data: [0; MAX_DATA_LEN],
            data_len: 0,
        }
    }

    pub fn set_data(&mut self, data: &[u8]) -> Result<(), ErrorCode> {
        if data.len() > MAX_DATA_LEN {
            return Err(ErrorCode::SIZE);
        }
        self.data[..data.len()].copy_from_slice(data);
        self.data_len = data.len() as u8;
        Ok(())
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len as usize]
    }

    pub fn size(&self) -> u8 {
        self.data_len
    }

    pub fn is_control(&self) -> bool {
        self.device_address == CONTROL_ADDRESS
    }

    /// Computes and stores this packet's CRC over `device_address ++ size ++
    /// data`, optionally bound to `identifier`. Must be called by the
    /// control service before a packet is handed to [`Self::to_wire`]; the
    /// line driver only serializes whatever CRC is already stored.
    pub fn finalize_crc(&mut self, identifier: Option<&[u8; 8]>) {
        self.crc = crc12(identifier, self.device_address, self.data());
    }

    /// Serializes the header and payload into `out` using the already
    /// computed CRC (see [`Self::finalize_crc`]). Returns the number of
    /// bytes written.
    pub fn to_wire(&self, out: &mut [u8]) -> Result<usize, ErrorCode> {
        let total = HEADER_LEN + self.data_len as usize;
        if out.len() < total {
            return Err(ErrorCode::SIZE);
        }
        let word = (self.crc & 0x0FFF) | (((self.service_number & 0xF) as u16) << 12);
        out[0] = (word & 0xFF) as u8;
        out[1] = (word >> 8) as u8;
        out[2] = self.device_address;
        out[3] = self.data_len;
        out[4..total].copy_from_slice(self.data());
        Ok(total)
    }

    /// Parses a header and payload out of `raw`, storing the transmitted CRC
    /// bits as-is (not yet verified: the line driver has no way to know
    /// which identifier, if any, the frame should be bound to). The control
    /// service verifies it with [`Self::crc_valid`] once it has resolved the
    /// source device.
    pub fn from_wire(raw: &[u8]) -> Result<Packet, ErrorCode> {
        if raw.len() < HEADER_LEN {
            return Err(ErrorCode::SIZE);
        }
        let word = raw[0] as u16 | ((raw[1] as u16) << 8);
        let transmitted_crc = word & 0x0FFF;
        let service_number = (word >> 12) as u8;
        let device_address = raw[2];
        let size = raw[3] as usize;
        if raw.len() < HEADER_LEN + size {
            return Err(ErrorCode::SIZE);
        }
        let mut packet = Packet::new(device_address, service_number, BaudCode::Baud125K);
        packet.set_data(&raw[HEADER_LEN..HEADER_LEN + size])?;
        packet.crc = transmitted_crc;
        Ok(packet)
    }

    /// Recomputes the CRC this packet should carry (optionally bound to
    /// `identifier`, the source/destination device's identifier) and
    /// compares it against the stored (transmitted, for inbound packets)
    /// CRC.
    pub fn crc_valid(&self, identifier: Option<&[u8; 8]>) -> bool {
        crc12(identifier, self.device_address, self.data()) == self.crc
    }

    /// Assembles a received packet from header fields and a payload slice
    /// DMA'd into separate static buffers, storing `transmitted_crc` as-is
    /// (unverified, same contract as [`Self::from_wire`]). The line driver
    /// uses this instead of `from_wire` because it drives the header and
    /// payload as two separate UART transactions and never holds both in one
    /// contiguous buffer.
    pub(crate) fn from_parts(
        device_address: u8,
        service_number: u8,
        transmitted_crc: u16,
        communication_rate: BaudCode,
        data: &[u8],
    ) -> Result<Packet, ErrorCode> {
        let mut packet = Packet::new(device_address, service_number, communication_rate);
        packet.set_data(data)?;
        packet.crc = transmitted_crc & 0x0FFF;
        Ok(packet)
    }
}

/// A single service advertisement record, as carried in a control packet's
/// payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceInfo<'a> {
    pub service_class: u32,
    pub service_flags: u8,
    pub data: &'a [u8],
}

/// Iterates the `ServiceInfo` records following a control packet's optional
/// name. Stops (without error) at the first record whose declared
/// `advertisement_size` would run past the end of the buffer, per spec: an
/// oversize/malformed record ends parsing rather than being skipped.
pub struct ServiceInfoIter<'a> {
    remaining: &'a [u8],
}

impl<'a> Iterator for ServiceInfoIter<'a> {
    type Item = ServiceInfo<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.len() < 6 {
            self.remaining = &[];
            return None;
        }
        let service_class = u32::from_le_bytes(self.remaining[0..4].try_into().unwrap());
        let service_flags = self.remaining[4];
        let advertisement_size = self.remaining[5] as usize;
        let total = 6 + advertisement_size;
        if self.remaining.len() < total {
            self.remaining = &[];
            return None;
        }
        let data = &self.remaining[6..total];
        self.remaining = &self.remaining[total..];
        Some(ServiceInfo {
            service_class,
            service_flags,
            data,
        })
    }
}

/// The parsed payload of a control packet (a [`Packet`] addressed to 0).
pub struct ControlPacket<'a> {
    pub unique_device_identifier: [u8; 8],
    pub device_address: u8,
    pub flags: LocalRegisterCopy<u8, DeviceFlags::Register>,
    payload: &'a [u8],
}

impl<'a> ControlPacket<'a> {
    pub fn decode(data: &'a [u8]) -> Result<Self, ErrorCode> {
        if data.len() < 10 {
            return Err(ErrorCode::SIZE);
        }
        let mut unique_device_identifier = [0u8; 8];
        unique_device_identifier.copy_from_slice(&data[0..8]);
        let device_address = data[8];
        let flags = LocalRegisterCopy::new(data[9]);
        Ok(Self {
            unique_device_identifier,
            device_address,
            flags,
            payload: &data[10..],
        })
    }

    pub fn is_proposing(&self) -> bool {
        self.flags.is_set(DeviceFlags::PROPOSING)
    }

    pub fn is_reject(&self) -> bool {
        self.flags.is_set(DeviceFlags::REJECT)
    }

    pub fn is_nack(&self) -> bool {
        self.flags.is_set(DeviceFlags::NACK)
    }

    pub fn has_name(&self) -> bool {
        self.flags.is_set(DeviceFlags::HAS_NAME)
    }

    pub fn name(&self) -> Option<&'a [u8]> {
        if !self.has_name() {
            return None;
        }
        let len = *self.payload.first()? as usize;
        self.payload.get(1..1 + len)
    }

    pub fn service_infos(&self) -> ServiceInfoIter<'a> {
        let start = if self.has_name() {
            let len = self.payload.first().copied().unwrap_or(0) as usize;
            (1 + len).min(self.payload.len())
        } else {
            0
        };
        ServiceInfoIter {
            remaining: &self.payload[start..],
        }
    }
}

/// Serializes a control packet's payload (everything that goes in a
/// [`Packet`]'s `data` field when `device_address == 0`) into `out`.
pub fn encode_control_packet<'b>(
    unique_device_identifier: &[u8; 8],
    device_address: u8,
    flags: LocalRegisterCopy<u8, DeviceFlags::Register>,
    name: Option<&[u8]>,
    service_infos: impl Iterator<Item = (u32, u8, &'b [u8])>,
    out: &mut [u8],
) -> Result<usize, ErrorCode> {
    if out.len() < 10 {
        return Err(ErrorCode::SIZE);
    }
    out[0..8].copy_from_slice(unique_device_identifier);
    out[8] = device_address;
    out[9] = flags.get();
    let mut pos = 10;

    if let Some(n) = name {
        if n.len() > 255 || pos + 1 + n.len() > out.len() {
            return Err(ErrorCode::SIZE);
        }
        out[pos] = n.len() as u8;
        pos += 1;
        out[pos..pos + n.len()].copy_from_slice(n);
        pos += n.len();
    }

    for (service_class, service_flags, data) in service_infos {
        if data.len() > 16 {
            return Err(ErrorCode::SIZE);
        }
        if pos + 6 + data.len() > out.len() {
            return Err(ErrorCode::NOMEM);
        }
        out[pos..pos + 4].copy_from_slice(&service_class.to_le_bytes());
        out[pos + 4] = service_flags;
        out[pos + 5] = data.len() as u8;
        pos += 6;
        out[pos..pos + data.len()].copy_from_slice(data);
        pos += data.len();
    }

    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_round_trips_through_encode_decode() {
        let mut packet = Packet::new(42, 3, BaudCode::Baud125K);
        packet.set_data(&[1, 2, 3, 4]).unwrap();
        packet.finalize_crc(None);
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = packet.to_wire(&mut buf).unwrap();

        let decoded = Packet::from_wire(&buf[..len]).unwrap();
        assert_eq!(decoded.device_address, 42);
        assert_eq!(decoded.service_number, 3);
        assert_eq!(decoded.data(), &[1, 2, 3, 4]);
        assert!(decoded.crc_valid(None));
    }

    #[test]
    fn crc_mismatch_detected_on_wrong_identifier() {
        let mut packet = Packet::new(5, 0, BaudCode::Baud125K);
        packet.set_data(&[0xAA]).unwrap();
        let id_a = [1u8; 8];
        let id_b = [2u8; 8];
        packet.finalize_crc(Some(&id_a));
        let mut buf = [0u8; MAX_PACKET_LEN];
        let len = packet.to_wire(&mut buf).unwrap();
        let decoded = Packet::from_wire(&buf[..len]).unwrap();
        assert!(decoded.crc_valid(Some(&id_a)));
        assert!(!decoded.crc_valid(Some(&id_b)));
    }

    #[test]
    fn control_packet_round_trips_with_name_and_services() {
        let id = [9u8; 8];
        let mut flags: LocalRegisterCopy<u8, DeviceFlags::Register> = LocalRegisterCopy::new(0);
        flags.modify(DeviceFlags::PROPOSING::SET + DeviceFlags::HAS_NAME::SET);

        let adv = [0x01, 0x02, 0x03];
        let mut buf = [0u8; 64];
        let len = encode_control_packet(
            &id,
            17,
            flags,
            Some(b"sensor"),
            core::iter::once((8u32, 0u8, &adv[..])),
            &mut buf,
        )
        .unwrap();

        let control = ControlPacket::decode(&buf[..len]).unwrap();
        assert_eq!(control.unique_device_identifier, id);
        assert_eq!(control.device_address, 17);
        assert!(control.is_proposing());
        assert!(control.has_name());
        assert_eq!(control.name(), Some(&b"sensor"[..]));

        let mut infos = control.service_infos();
        let first = infos.next().expect("one service info record");
        assert_eq!(first.service_class, 8);
        assert_eq!(first.data, &adv[..]);
        assert!(infos.next().is_none());
    }

    #[test]
    fn pulse_width_decodes_to_baud_code() {
        assert_eq!(BaudCode::from_pulse_width_us(80), Some(BaudCode::Baud1M));
        assert_eq!(BaudCode::from_pulse_width_us(160), Some(BaudCode::Baud500K));
        assert_eq!(BaudCode::from_pulse_width_us(320), Some(BaudCode::Baud250K));
        assert_eq!(BaudCode::from_pulse_width_us(640), Some(BaudCode::Baud125K));
        // Jitter rounds up to the next byte-time multiple before snapping
        // to a power of two.
        assert_eq!(BaudCode::from_pulse_width_us(90), Some(BaudCode::Baud500K));
        assert_eq!(BaudCode::from_pulse_width_us(0), None);
        assert_eq!(BaudCode::from_pulse_width_us(700), None);
    }

    #[test]
    fn malformed_service_info_stops_parsing() {
        // advertisement_size claims 200 bytes but only 1 remains.
        let mut payload = [0u8; 16];
        payload[9] = 0; // no name
        let record_start = 10;
        payload[record_start..record_start + 4].copy_from_slice(&8u32.to_le_bytes());
        payload[record_start + 4] = 0;
        payload[record_start + 5] = 200;
        let control = ControlPacket::decode(&payload).unwrap();
        assert_eq!(control.service_infos().count(), 0);
    }
}
