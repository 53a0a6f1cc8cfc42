// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        config::SmeConfig,
        csr::{Csr, OpMode},
        FwRequest, FwRequestStream, RoamEvent, RoamEventStream, VdevId,
    },
    std::time::Instant,
    wlan_common::{
        mac::MacAddr,
        timer::{EventId, TimeStream},
    },
};

pub const PEER_A: MacAddr = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
pub const PEER_B: MacAddr = [0x00, 0x11, 0x22, 0x33, 0x44, 0x66];

/// A `Csr` wired to channels the test reads from directly.
pub struct CsrHarness {
    pub csr: Csr,
    pub fw_requests: FwRequestStream,
    pub events: RoamEventStream,
    pub time_stream: TimeStream,
}

impl CsrHarness {
    pub fn new() -> Self {
        Self::with_config(SmeConfig::default())
    }

    pub fn with_config(config: SmeConfig) -> Self {
        let (csr, fw_requests, events, time_stream) = Csr::new(config);
        Self { csr, fw_requests, events, time_stream }
    }

    pub fn with_session(vdev_id: VdevId, op_mode: OpMode) -> Self {
        let mut h = Self::new();
        h.csr.open_session(vdev_id, op_mode);
        h
    }

    pub fn next_event(&mut self) -> RoamEvent {
        self.events.try_next().expect("no pending roam event").expect("roam event stream closed")
    }

    pub fn expect_no_event(&mut self) {
        if let Ok(Some(event)) = self.events.try_next() {
            panic!("unexpected roam event: {:?}", event);
        }
    }

    /// Reads the stats request a disconnect starts with and returns its id.
    pub fn expect_stats_request(&mut self, vdev_id: VdevId) -> u32 {
        match expect_fw_request(&mut self.fw_requests) {
            FwRequest::GetPeerStats { request_id, vdev_id: v, .. } if v == vdev_id => request_id,
            other => panic!("expected stats request for vdev {}, got {:?}", vdev_id, other),
        }
    }
}

pub fn expect_fw_request(fw_requests: &mut FwRequestStream) -> FwRequest {
    fw_requests.try_next().expect("no pending firmware request").expect("firmware stream closed")
}

pub fn expect_no_fw_request(fw_requests: &mut FwRequestStream) {
    if let Ok(Some(req)) = fw_requests.try_next() {
        panic!("unexpected firmware request: {:?}", req);
    }
}

pub fn next_timeout(time_stream: &mut TimeStream) -> (Instant, EventId) {
    time_stream.try_next().expect("no scheduled timeout").expect("time stream closed")
}

/// Fires every scheduled timeout, including those scheduled while firing.
pub fn fire_timeouts(csr: &mut Csr, time_stream: &mut TimeStream) {
    while let Ok(Some((_, event_id))) = time_stream.try_next() {
        csr.on_timeout(event_id);
    }
}
