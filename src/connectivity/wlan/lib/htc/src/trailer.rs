// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{error::FrameError, frame::EndpointId},
    log::warn,
    zerocopy::{
        byteorder::{LittleEndian, U16},
        AsBytes, FromBytes, LayoutVerified, Unaligned,
    },
};

pub const HTC_RECORD_NULL: u8 = 0;
pub const HTC_RECORD_CREDITS: u8 = 1;
pub const HTC_RECORD_LOOKAHEAD: u8 = 2;
pub const HTC_RECORD_LOOKAHEAD_BUNDLE: u8 = 3;

pub const RECORD_HDR_LEN: usize = std::mem::size_of::<RecordHdr>();
pub const BUNDLED_LOOKAHEAD_LEN: usize = 4;

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct RecordHdr {
    pub record_id: u8,
    pub length: u8,
    pub reserved: U16<LittleEndian>,
}

/// Credits the target returned for one endpoint since its last report.
#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C, packed)]
pub struct CreditReport {
    pub endpoint_id: EndpointId,
    pub credits: u8,
    pub reserved: U16<LittleEndian>,
}

impl CreditReport {
    pub fn new(endpoint_id: EndpointId, credits: u8) -> Self {
        Self { endpoint_id, credits, reserved: U16::new(0) }
    }
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct LookaheadReportV1 {
    pub pre_valid: u8,
    pub reserved0: [u8; 3],
    pub lookahead: [u8; 4],
    pub post_valid: u8,
    pub reserved1: [u8; 3],
}

#[derive(FromBytes, AsBytes, Unaligned, Clone, Copy, Debug)]
#[repr(C, packed)]
pub struct LookaheadReportV2 {
    pub pre_valid: u8,
    pub reserved0: [u8; 3],
    pub lookahead: [u8; 8],
    pub post_valid: u8,
    pub reserved1: [u8; 3],
}

/// The guard bytes around a lookahead must be bitwise complements of each other.
pub fn validate_lookahead_guard(pre_valid: u8, post_valid: u8) -> bool {
    pre_valid == !post_valid
}

/// Lookahead report layout, chosen per endpoint when the service is connected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookaheadVersion {
    V1,
    V2,
}

impl LookaheadVersion {
    pub fn report_len(self) -> usize {
        match self {
            LookaheadVersion::V1 => std::mem::size_of::<LookaheadReportV1>(),
            LookaheadVersion::V2 => std::mem::size_of::<LookaheadReportV2>(),
        }
    }
}

impl Default for LookaheadVersion {
    fn default() -> Self {
        LookaheadVersion::V1
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookahead {
    V1([u8; 4]),
    V2([u8; 8]),
}

impl Lookahead {
    pub fn bytes(&self) -> &[u8] {
        match self {
            Lookahead::V1(bytes) => &bytes[..],
            Lookahead::V2(bytes) => &bytes[..],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrailerRecord {
    Null,
    Credits(Vec<CreditReport>),
    Lookahead(Lookahead),
    LookaheadBundle(Vec<[u8; BUNDLED_LOOKAHEAD_LEN]>),
    Unknown { record_id: u8, len: usize },
}

/// Walks the records of a trailer. Any malformed record fails the whole trailer.
pub fn parse_trailer(
    trailer: &[u8],
    lookahead_version: LookaheadVersion,
) -> Result<Vec<TrailerRecord>, FrameError> {
    let mut records = vec![];
    let mut remaining = trailer;
    while !remaining.is_empty() {
        let (hdr, rest) = LayoutVerified::<_, RecordHdr>::new_unaligned_from_prefix(remaining)
            .ok_or(FrameError::TooShort { expected: RECORD_HDR_LEN, actual: remaining.len() })?;
        let len = usize::from(hdr.length);
        if rest.len() < len {
            return Err(FrameError::TooShort { expected: len, actual: rest.len() });
        }
        let (body, rest) = rest.split_at(len);
        records.push(parse_record(hdr.record_id, body, lookahead_version)?);
        remaining = rest;
    }
    Ok(records)
}

fn parse_record(
    record_id: u8,
    body: &[u8],
    lookahead_version: LookaheadVersion,
) -> Result<TrailerRecord, FrameError> {
    match record_id {
        HTC_RECORD_NULL => Ok(TrailerRecord::Null),
        HTC_RECORD_CREDITS => Ok(TrailerRecord::Credits(
            body.chunks_exact(std::mem::size_of::<CreditReport>())
                .filter_map(|chunk| LayoutVerified::<_, CreditReport>::new_unaligned(chunk))
                .map(|report| *report)
                .collect(),
        )),
        HTC_RECORD_LOOKAHEAD => {
            parse_lookahead(body, lookahead_version).map(TrailerRecord::Lookahead)
        }
        HTC_RECORD_LOOKAHEAD_BUNDLE => Ok(TrailerRecord::LookaheadBundle(
            body.chunks_exact(BUNDLED_LOOKAHEAD_LEN)
                .map(|chunk| {
                    let mut lookahead = [0u8; BUNDLED_LOOKAHEAD_LEN];
                    lookahead.copy_from_slice(chunk);
                    lookahead
                })
                .collect(),
        )),
        record_id => {
            warn!("skipping unknown HTC trailer record {} ({} bytes)", record_id, body.len());
            Ok(TrailerRecord::Unknown { record_id, len: body.len() })
        }
    }
}

fn parse_lookahead(body: &[u8], version: LookaheadVersion) -> Result<Lookahead, FrameError> {
    let too_short = FrameError::TooShort { expected: version.report_len(), actual: body.len() };
    match version {
        LookaheadVersion::V1 => {
            let (report, _) =
                LayoutVerified::<_, LookaheadReportV1>::new_unaligned_from_prefix(body)
                    .ok_or(too_short)?;
            check_guard(report.pre_valid, report.post_valid)?;
            Ok(Lookahead::V1(report.lookahead))
        }
        LookaheadVersion::V2 => {
            let (report, _) =
                LayoutVerified::<_, LookaheadReportV2>::new_unaligned_from_prefix(body)
                    .ok_or(too_short)?;
            check_guard(report.pre_valid, report.post_valid)?;
            Ok(Lookahead::V2(report.lookahead))
        }
    }
}

fn check_guard(pre: u8, post: u8) -> Result<(), FrameError> {
    if validate_lookahead_guard(pre, post) {
        Ok(())
    } else {
        Err(FrameError::BadGuardBytes { pre, post })
    }
}

/// Builds a trailer record by record.
#[derive(Default, Debug)]
pub struct TrailerWriter {
    buf: Vec<u8>,
}

impl TrailerWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_hdr(&mut self, record_id: u8, length: usize) {
        let hdr = RecordHdr { record_id, length: length as u8, reserved: U16::new(0) };
        self.buf.extend_from_slice(hdr.as_bytes());
    }

    pub fn credits(mut self, reports: &[CreditReport]) -> Self {
        self.record_hdr(HTC_RECORD_CREDITS, reports.len() * std::mem::size_of::<CreditReport>());
        for report in reports {
            self.buf.extend_from_slice(report.as_bytes());
        }
        self
    }

    /// Writes a lookahead with a valid guard. `pre_valid` picks the guard value.
    pub fn lookahead(mut self, lookahead: Lookahead, pre_valid: u8) -> Self {
        match lookahead {
            Lookahead::V1(bytes) => {
                let report = LookaheadReportV1 {
                    pre_valid,
                    reserved0: [0; 3],
                    lookahead: bytes,
                    post_valid: !pre_valid,
                    reserved1: [0; 3],
                };
                self.record_hdr(HTC_RECORD_LOOKAHEAD, std::mem::size_of_val(&report));
                self.buf.extend_from_slice(report.as_bytes());
            }
            Lookahead::V2(bytes) => {
                let report = LookaheadReportV2 {
                    pre_valid,
                    reserved0: [0; 3],
                    lookahead: bytes,
                    post_valid: !pre_valid,
                    reserved1: [0; 3],
                };
                self.record_hdr(HTC_RECORD_LOOKAHEAD, std::mem::size_of_val(&report));
                self.buf.extend_from_slice(report.as_bytes());
            }
        }
        self
    }

    pub fn lookahead_bundle(mut self, lookaheads: &[[u8; BUNDLED_LOOKAHEAD_LEN]]) -> Self {
        self.record_hdr(HTC_RECORD_LOOKAHEAD_BUNDLE, lookaheads.len() * BUNDLED_LOOKAHEAD_LEN);
        for lookahead in lookaheads {
            self.buf.extend_from_slice(&lookahead[..]);
        }
        self
    }

    pub fn raw_record(mut self, record_id: u8, body: &[u8]) -> Self {
        self.record_hdr(record_id, body.len());
        self.buf.extend_from_slice(body);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
