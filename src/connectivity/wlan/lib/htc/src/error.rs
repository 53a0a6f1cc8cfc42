// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{control::ConnectStatus, frame::EndpointId},
    thiserror::Error,
};

/// Malformed wire data. The frame carrying it is dropped, the connection stays up.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    #[error("buffer too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
    #[error("length {len} exceeds maximum of {max}")]
    TooLong { len: usize, max: usize },
    #[error("lookahead guard mismatch: pre_valid {pre:#04x}, post_valid {post:#04x}")]
    BadGuardBytes { pre: u8, post: u8 },
    #[error("trailer length {trailer_len} invalid for payload of {payload_len} bytes")]
    BadTrailerLength { trailer_len: usize, payload_len: usize },
    #[error("unknown control message id {0}")]
    UnknownMessageId(u16),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HtcError {
    #[error("target has not reported ready")]
    NotReady,
    #[error("endpoint {0} is not connected")]
    NoSuchEndpoint(EndpointId),
    #[error("connecting service {service_id:#06x} failed: {status:?}")]
    ServiceConnectFailed { service_id: u16, status: ConnectStatus },
    #[error("message of {len} bytes exceeds endpoint limit of {max}")]
    MessageTooLarge { len: usize, max: usize },
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),
}
