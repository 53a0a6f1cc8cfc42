// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Host-target communication (HTC) framing.
//!
//! HTC carries control and data messages between the host and the firmware over an arbitrary
//! transport. Every message starts with an 8 byte frame header. The target piggybacks credit
//! reports and lookahead information on the frames it sends in a trailer of records appended
//! to the payload.

pub mod control;
pub mod credit;
pub mod endpoint;
mod error;
pub mod frame;
pub mod trailer;

pub use {
    credit::CreditTracker,
    endpoint::{Htc, RxFrame, SendStatus},
    error::{FrameError, HtcError},
    frame::{decode_header, encode_header, EndpointId, HtcFrame, HtcHeader},
};

/// Outgoing frames, ready to be handed to the bus.
pub type FrameSink = wlan_common::sink::UnboundedSink<Vec<u8>>;
pub type FrameStream = futures::channel::mpsc::UnboundedReceiver<Vec<u8>>;
