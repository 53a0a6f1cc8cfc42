// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        control::{
            ConnectService, ConnectServiceResponse, ConnectStatus, ConnectionFlags,
            ControlMessage, Ready, SetupCompleteEx, HTC_CONTROL_ENDPOINT,
            HTC_MAX_CONTROL_MESSAGE_LENGTH,
        },
        credit::CreditTracker,
        error::HtcError,
        frame::{self, EndpointId, HtcFrame, HTC_FLAGS_NEED_CREDIT_UPDATE, HTC_MAX_PAYLOAD_LENGTH},
        trailer::{self, Lookahead, LookaheadVersion, TrailerRecord},
        FrameSink,
    },
    log::{debug, info, warn},
    std::collections::{BTreeMap, HashMap, VecDeque},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// Waiting on the endpoint's transmit queue for credits.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub endpoint_id: EndpointId,
    pub payload: Vec<u8>,
    pub lookahead: Option<Lookahead>,
    pub bundle_count: u8,
}

#[derive(Debug)]
struct PendingConnect {
    requested_credits: u32,
    flow_control: bool,
}

#[derive(Debug)]
struct Endpoint {
    service_id: u16,
    max_msg_size: usize,
    lookahead_version: LookaheadVersion,
    tx_queue: VecDeque<Vec<u8>>,
}

/// Host side of the HTC link: the target handshake, connected services and per-endpoint
/// transmit queues gated by credits.
pub struct Htc {
    frame_sink: FrameSink,
    target: Option<Ready>,
    credits: Option<CreditTracker>,
    endpoints: BTreeMap<EndpointId, Endpoint>,
    pending_connects: HashMap<u16, PendingConnect>,
}

impl Htc {
    pub fn new(frame_sink: FrameSink) -> Self {
        Self {
            frame_sink,
            target: None,
            credits: None,
            endpoints: BTreeMap::new(),
            pending_connects: HashMap::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.target.is_some()
    }

    pub fn credit_tracker(&self) -> Option<&CreditTracker> {
        self.credits.as_ref()
    }

    pub fn endpoint_for_service(&self, service_id: u16) -> Option<EndpointId> {
        self.endpoints.iter().find(|(_, ep)| ep.service_id == service_id).map(|(id, _)| *id)
    }

    pub fn queued(&self, endpoint_id: EndpointId) -> usize {
        self.endpoints.get(&endpoint_id).map(|ep| ep.tx_queue.len()).unwrap_or(0)
    }

    pub fn on_ready(&mut self, ready: &Ready) {
        info!(
            "HTC target ready: {} credits of {} bytes, {} endpoints",
            ready.credit_count, ready.credit_size, ready.max_endpoints
        );
        let credits = CreditTracker::from_ready(ready.credit_count, ready.credit_size);
        credits.add_endpoint(HTC_CONTROL_ENDPOINT, 0, false);
        self.endpoints.clear();
        self.endpoints.insert(
            HTC_CONTROL_ENDPOINT,
            Endpoint {
                service_id: crate::control::HTC_CTRL_RSVD_SVC,
                max_msg_size: HTC_MAX_CONTROL_MESSAGE_LENGTH,
                lookahead_version: LookaheadVersion::V1,
                tx_queue: VecDeque::new(),
            },
        );
        self.credits = Some(credits);
        self.target = Some(*ready);
    }

    /// Asks the target for an endpoint serving `service_id`. The endpoint exists once the
    /// response arrives.
    pub fn connect_service(
        &mut self,
        service_id: u16,
        connection_flags: ConnectionFlags,
        lookahead_v2: bool,
        requested_credits: u32,
    ) -> Result<(), HtcError> {
        if !self.is_ready() {
            return Err(HtcError::NotReady);
        }
        self.pending_connects.insert(
            service_id,
            PendingConnect {
                requested_credits,
                flow_control: !connection_flags.disable_credit_flow_ctrl(),
            },
        );
        self.send_control(ControlMessage::ConnectService(ConnectService {
            service_id,
            connection_flags,
            lookahead_v2,
            meta: vec![],
        }))
    }

    pub fn on_connect_response(
        &mut self,
        resp: &ConnectServiceResponse,
    ) -> Result<EndpointId, HtcError> {
        let credits = self.credits.as_ref().ok_or(HtcError::NotReady)?;
        let pending = self.pending_connects.remove(&resp.service_id);
        let status = resp.status();
        if status != ConnectStatus::Success {
            return Err(HtcError::ServiceConnectFailed { service_id: resp.service_id, status });
        }
        let (requested_credits, flow_control) = match pending {
            Some(p) => (p.requested_credits, p.flow_control),
            None => {
                warn!("unsolicited connect response for service {:#06x}", resp.service_id);
                (0, true)
            }
        };
        let granted = credits.add_endpoint(resp.endpoint_id, requested_credits, flow_control);
        let lookahead_version =
            if resp.lookahead_v2 { LookaheadVersion::V2 } else { LookaheadVersion::V1 };
        info!(
            "service {:#06x} on endpoint {}: max msg {}, {} credits, lookahead {:?}",
            resp.service_id, resp.endpoint_id, resp.max_msg_size, granted, lookahead_version
        );
        self.endpoints.insert(
            resp.endpoint_id,
            Endpoint {
                service_id: resp.service_id,
                max_msg_size: usize::from(resp.max_msg_size).min(HTC_MAX_PAYLOAD_LENGTH),
                lookahead_version,
                tx_queue: VecDeque::new(),
            },
        );
        Ok(resp.endpoint_id)
    }

    pub fn setup_complete(&mut self, setup: Option<SetupCompleteEx>) -> Result<(), HtcError> {
        let msg = match setup {
            Some(setup) => ControlMessage::SetupCompleteEx(setup),
            None => ControlMessage::SetupComplete,
        };
        self.send_control(msg)
    }

    /// Dispatches a message received on the control endpoint. Returns the endpoint a connect
    /// response assigned, if any.
    pub fn on_control_message(
        &mut self,
        msg: &ControlMessage,
    ) -> Result<Option<EndpointId>, HtcError> {
        match msg {
            ControlMessage::Ready(ready) => {
                self.on_ready(ready);
                Ok(None)
            }
            ControlMessage::ConnectServiceResponse(resp) => {
                self.on_connect_response(resp).map(Some)
            }
            other => {
                debug!("ignoring HTC control message {}", other.message_id());
                Ok(None)
            }
        }
    }

    fn send_control(&mut self, msg: ControlMessage) -> Result<(), HtcError> {
        let mut payload = vec![];
        msg.write(&mut payload)?;
        self.send(HTC_CONTROL_ENDPOINT, &payload[..]).map(|_| ())
    }

    /// Frames `payload` for `endpoint_id`. The frame goes out right away when the endpoint has
    /// credits and nothing queued ahead of it, otherwise it waits for a credit report.
    pub fn send(
        &mut self,
        endpoint_id: EndpointId,
        payload: &[u8],
    ) -> Result<SendStatus, HtcError> {
        let credits = self.credits.as_ref().ok_or(HtcError::NotReady)?;
        let endpoint =
            self.endpoints.get_mut(&endpoint_id).ok_or(HtcError::NoSuchEndpoint(endpoint_id))?;
        if payload.len() > endpoint.max_msg_size {
            return Err(HtcError::MessageTooLarge {
                len: payload.len(),
                max: endpoint.max_msg_size,
            });
        }
        let mut buf = vec![];
        frame::write_frame(&mut buf, endpoint_id, 0, payload, &[])?;
        if endpoint.tx_queue.is_empty() && reserve(credits, endpoint_id, &mut buf) {
            self.frame_sink.send(buf);
            Ok(SendStatus::Sent)
        } else {
            endpoint.tx_queue.push_back(buf);
            Ok(SendStatus::Queued)
        }
    }

    /// Parses a frame from the target, applies the credits and lookahead in its trailer and
    /// releases queued frames the new credits cover.
    pub fn process_rx(&mut self, bytes: &[u8]) -> Result<RxFrame, HtcError> {
        let frame = HtcFrame::parse(bytes)?;
        let endpoint_id = frame.endpoint_id();
        let lookahead_version = self
            .endpoints
            .get(&endpoint_id)
            .map(|ep| ep.lookahead_version)
            .unwrap_or_default();
        let mut lookahead = None;
        for record in trailer::parse_trailer(frame.trailer, lookahead_version)? {
            match record {
                TrailerRecord::Credits(reports) => match self.credits.as_ref() {
                    Some(credits) => credits.apply_reports(&reports[..]),
                    None => warn!("credit report before target ready"),
                },
                TrailerRecord::Lookahead(l) => lookahead = Some(l),
                TrailerRecord::LookaheadBundle(bundle) => {
                    debug!("{} bundled lookaheads on endpoint {}", bundle.len(), endpoint_id)
                }
                TrailerRecord::Null | TrailerRecord::Unknown { .. } => {}
            }
        }
        let rx = RxFrame {
            endpoint_id,
            payload: frame.payload.to_vec(),
            lookahead,
            bundle_count: frame.header().recv_flags().bundle_count(),
        };
        self.drain_tx_queues();
        Ok(rx)
    }

    fn drain_tx_queues(&mut self) {
        let credits = match self.credits.as_ref() {
            Some(credits) => credits,
            None => return,
        };
        for (endpoint_id, endpoint) in self.endpoints.iter_mut() {
            while let Some(buf) = endpoint.tx_queue.front_mut() {
                if !reserve(credits, *endpoint_id, buf) {
                    break;
                }
                if let Some(buf) = endpoint.tx_queue.pop_front() {
                    self.frame_sink.send(buf);
                }
            }
        }
    }
}

/// Reserves the credits a framed message costs. Flags the frame when it drains the endpoint so
/// the target sends a credit report promptly.
fn reserve(credits: &CreditTracker, endpoint_id: EndpointId, frame: &mut [u8]) -> bool {
    let cost = credits.credits_for_len(frame.len());
    if !credits.try_reserve(endpoint_id, cost) {
        return false;
    }
    if credits.credits(endpoint_id) == 0 && endpoint_id != HTC_CONTROL_ENDPOINT {
        frame[1] |= HTC_FLAGS_NEED_CREDIT_UPDATE;
    }
    true
}
