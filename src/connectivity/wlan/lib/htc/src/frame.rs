// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{error::FrameError, trailer::RECORD_HDR_LEN},
    bitfield::bitfield,
    zerocopy::{
        byteorder::{LittleEndian, U16},
        AsBytes, ByteSlice, FromBytes, LayoutVerified, Unaligned,
    },
};

pub type EndpointId = u8;

pub const HTC_HDR_LENGTH: usize = std::mem::size_of::<HtcFrameHdr>();
pub const HTC_HDR_ALIGNMENT_PADDING: usize = append_alignment_padding(HTC_HDR_LENGTH);
pub const HTC_MAX_TRAILER_LENGTH: usize = 255;
pub const HTC_MAX_PAYLOAD_LENGTH: usize = 4096 - HTC_HDR_LENGTH;
pub const HTC_MAX_BUNDLE_COUNT: u8 = 0x3F;

// Send direction, host to target.
pub const HTC_FLAGS_NEED_CREDIT_UPDATE: u8 = 1 << 0;
pub const HTC_FLAGS_SEND_BUNDLE: u8 = 1 << 1;
pub const HTC_FLAGS_SEQ_CHECK: u8 = 1 << 2;
pub const HTC_FLAGS_CRC_CHECK: u8 = 1 << 3;
pub const HTC_FLAGS_PADDING_CHECK: u8 = 1 << 4;

// Receive direction, target to host.
pub const HTC_FLAGS_RECV_1MORE_BLOCK: u8 = 1 << 0;
pub const HTC_FLAGS_RECV_TRAILER: u8 = 1 << 1;
pub const HTC_FLAGS_RECV_BUNDLE_CNT_MASK: u8 = 0xFC;
pub const HTC_FLAGS_RECV_BUNDLE_CNT_SHIFT: u8 = 2;

bitfield! {
    /// Flags of a frame sent by the host.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct SendFlags(u8);
    impl Debug;
    pub bool, need_credit_update, set_need_credit_update: 0;
    pub bool, send_bundle, set_send_bundle: 1;
    pub bool, seq_check, set_seq_check: 2;
    pub bool, crc_check, set_crc_check: 3;
    pub bool, padding_check, set_padding_check: 4;
}

impl SendFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

bitfield! {
    /// Flags of a frame received from the target.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct RecvFlags(u8);
    impl Debug;
    pub bool, one_more_block, set_one_more_block: 0;
    pub bool, trailer_present, set_trailer_present: 1;
    pub u8, bundle_count_raw, set_bundle_count_raw: 7, 2;
}

impl RecvFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Number of messages bundled behind this one.
    pub fn bundle_count(&self) -> u8 {
        decode_bundle_count(self.0)
    }
}

/// Places a 6 bit bundle count into the receive flag bits 7:2.
///
/// Bits 3:0 of the count land in flag bits 7:4 and bits 5:4 of the count land in flag bits
/// 3:2, so a target that only knows the older 4 bit field still reads the low nibble.
pub fn encode_bundle_count(count: u8) -> u8 {
    let count = u32::from(count & HTC_MAX_BUNDLE_COUNT);
    ((((count << 2) | (count >> 4)) << 2) & 0xFF) as u8
}

/// Inverse of `encode_bundle_count`. Ignores flag bits 1:0.
pub fn decode_bundle_count(flags: u8) -> u8 {
    ((flags & HTC_FLAGS_RECV_BUNDLE_CNT_MASK) >> 4)
        | (((flags >> HTC_FLAGS_RECV_BUNDLE_CNT_SHIFT) & 0x3) << 4)
}

/// Bytes needed after a header of `header_len` bytes to reach 4 byte alignment.
pub const fn append_alignment_padding(header_len: usize) -> usize {
    ((header_len + 3) & !3) - header_len
}

// Two little endian 32 bit words:
// word 0: EndpointID:8, Flags:8, PayloadLen:16
// word 1: ControlBytes0:8, ControlBytes1:8, Reserved:16
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct HtcFrameHdr {
    pub endpoint_id: u8,
    pub flags: u8,
    pub payload_len: U16<LittleEndian>,
    /// CRC when `HTC_FLAGS_CRC_CHECK` is set, trailer length when `HTC_FLAGS_RECV_TRAILER` is set.
    pub control_bytes0: u8,
    /// Sequence number when `HTC_FLAGS_SEQ_CHECK` is set.
    pub control_bytes1: u8,
    pub reserved: U16<LittleEndian>,
}

/// Decoded HTC frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HtcHeader {
    pub endpoint_id: EndpointId,
    pub flags: u8,
    pub payload_len: u16,
    pub control_bytes0: u8,
    pub control_bytes1: u8,
    pub reserved: u16,
}

impl HtcHeader {
    pub fn send_flags(&self) -> SendFlags {
        SendFlags::from_bits(self.flags)
    }

    pub fn recv_flags(&self) -> RecvFlags {
        RecvFlags::from_bits(self.flags)
    }

    pub fn to_bytes(&self) -> [u8; HTC_HDR_LENGTH] {
        let hdr = HtcFrameHdr {
            endpoint_id: self.endpoint_id,
            flags: self.flags,
            payload_len: U16::new(self.payload_len),
            control_bytes0: self.control_bytes0,
            control_bytes1: self.control_bytes1,
            reserved: U16::new(self.reserved),
        };
        let mut bytes = [0u8; HTC_HDR_LENGTH];
        bytes.copy_from_slice(hdr.as_bytes());
        bytes
    }
}

impl From<&HtcFrameHdr> for HtcHeader {
    fn from(hdr: &HtcFrameHdr) -> Self {
        Self {
            endpoint_id: hdr.endpoint_id,
            flags: hdr.flags,
            payload_len: hdr.payload_len.get(),
            control_bytes0: hdr.control_bytes0,
            control_bytes1: hdr.control_bytes1,
            reserved: hdr.reserved.get(),
        }
    }
}

/// The caller keeps `payload_len` within `HTC_MAX_PAYLOAD_LENGTH`.
pub fn encode_header(
    endpoint_id: EndpointId,
    flags: u8,
    payload_len: u16,
    control_bytes0: u8,
    control_bytes1: u8,
) -> [u8; HTC_HDR_LENGTH] {
    HtcHeader { endpoint_id, flags, payload_len, control_bytes0, control_bytes1, reserved: 0 }
        .to_bytes()
}

pub fn decode_header(buf: &[u8]) -> Result<HtcHeader, FrameError> {
    let (hdr, _) = LayoutVerified::<_, HtcFrameHdr>::new_unaligned_from_prefix(buf)
        .ok_or(FrameError::TooShort { expected: HTC_HDR_LENGTH, actual: buf.len() })?;
    Ok(HtcHeader::from(&*hdr))
}

/// A received frame split into header, payload and trailer. Bytes past `payload_len` are
/// transport padding and are not part of the frame.
pub struct HtcFrame<B: ByteSlice> {
    pub hdr: LayoutVerified<B, HtcFrameHdr>,
    pub payload: B,
    pub trailer: B,
}

impl<B: ByteSlice> HtcFrame<B> {
    pub fn parse(bytes: B) -> Result<Self, FrameError> {
        let actual = bytes.len();
        let (hdr, body) = LayoutVerified::<B, HtcFrameHdr>::new_unaligned_from_prefix(bytes)
            .ok_or(FrameError::TooShort { expected: HTC_HDR_LENGTH, actual })?;
        let payload_len = usize::from(hdr.payload_len.get());
        if payload_len > HTC_MAX_PAYLOAD_LENGTH {
            return Err(FrameError::TooLong { len: payload_len, max: HTC_MAX_PAYLOAD_LENGTH });
        }
        if body.len() < payload_len {
            return Err(FrameError::TooShort { expected: HTC_HDR_LENGTH + payload_len, actual });
        }
        let (body, _padding) = body.split_at(payload_len);

        let trailer_len = if RecvFlags::from_bits(hdr.flags).trailer_present() {
            let trailer_len = usize::from(hdr.control_bytes0);
            if trailer_len < RECORD_HDR_LEN || trailer_len > payload_len {
                return Err(FrameError::BadTrailerLength { trailer_len, payload_len });
            }
            trailer_len
        } else {
            0
        };
        let (payload, trailer) = body.split_at(payload_len - trailer_len);
        Ok(Self { hdr, payload, trailer })
    }

    pub fn header(&self) -> HtcHeader {
        HtcHeader::from(&*self.hdr)
    }

    pub fn endpoint_id(&self) -> EndpointId {
        self.hdr.endpoint_id
    }
}

/// Appends a complete frame to `buf`. A non-empty trailer sets `HTC_FLAGS_RECV_TRAILER` and
/// stores its length in control byte 0.
pub fn write_frame(
    buf: &mut Vec<u8>,
    endpoint_id: EndpointId,
    flags: u8,
    payload: &[u8],
    trailer: &[u8],
) -> Result<(), FrameError> {
    if trailer.len() > HTC_MAX_TRAILER_LENGTH {
        return Err(FrameError::TooLong { len: trailer.len(), max: HTC_MAX_TRAILER_LENGTH });
    }
    let payload_len = payload.len() + trailer.len();
    if payload_len > HTC_MAX_PAYLOAD_LENGTH {
        return Err(FrameError::TooLong { len: payload_len, max: HTC_MAX_PAYLOAD_LENGTH });
    }
    let (flags, control_bytes0) = if trailer.is_empty() {
        (flags, 0)
    } else {
        (flags | HTC_FLAGS_RECV_TRAILER, trailer.len() as u8)
    };
    buf.reserve(HTC_HDR_LENGTH + HTC_HDR_ALIGNMENT_PADDING + payload_len);
    buf.extend_from_slice(&encode_header(
        endpoint_id,
        flags,
        payload_len as u16,
        control_bytes0,
        0,
    ));
    buf.extend_from_slice(payload);
    buf.extend_from_slice(trailer);
    Ok(())
}
