// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        config::SmeConfig, csr::Csr, fw_msg::FwLink, FwEvent, FwEventStream, FwRequest,
        FwRequestStream, RoamEventStream, SmeRequest, SmeRequestStream,
    },
    anyhow::{bail, Error},
    futures::{prelude::*, select},
    log::{error, info, warn},
    std::collections::VecDeque,
    wlan_common::{
        format::MacFmt,
        sink::UnboundedSink,
        timer::{make_async_timed_event_stream, EventId},
    },
    wlan_htc::FrameStream,
};

/// Runs the station management layer until the upper layer goes away. Requests for the
/// firmware and events for the upper layer come out of the returned streams.
pub fn serve(
    config: SmeConfig,
    sme_requests: SmeRequestStream,
    fw_events: FwEventStream,
) -> (FwRequestStream, RoamEventStream, impl Future<Output = Result<(), Error>>) {
    let (csr, fw_requests, roam_events, time_stream) = Csr::new(config);
    let fut = async move {
        let timeouts = make_async_timed_event_stream(time_stream);
        serve_csr(csr, sme_requests, fw_events, timeouts).await
    };
    (fw_requests, roam_events, fut)
}

/// Feeds requests, firmware events and fired timeouts to `csr` one at a time.
pub async fn serve_csr<T>(
    mut csr: Csr,
    sme_requests: SmeRequestStream,
    fw_events: FwEventStream,
    timeouts: T,
) -> Result<(), Error>
where
    T: Stream<Item = EventId> + Unpin,
{
    let mut sme_requests = sme_requests.fuse();
    let mut fw_events = fw_events.fuse();
    let mut timeouts = timeouts.fuse();
    loop {
        select! {
            req = sme_requests.next() => match req {
                Some(req) => handle_sme_request(&mut csr, req),
                None => {
                    info!("SME request stream ended, shutting down");
                    return Ok(());
                }
            },
            event = fw_events.next() => match event {
                Some(event) => csr.on_fw_event(event),
                None => bail!("Firmware event stream terminated unexpectedly"),
            },
            event_id = timeouts.next() => match event_id {
                Some(event_id) => csr.on_timeout(event_id),
                None => bail!("Timer stream terminated unexpectedly"),
            },
        }
    }
}

fn handle_sme_request(csr: &mut Csr, req: SmeRequest) {
    match req {
        SmeRequest::OpenSession { vdev_id, op_mode } => csr.open_session(vdev_id, op_mode),
        SmeRequest::CloseSession { vdev_id } => csr.close_session(vdev_id),
        SmeRequest::SetConnected { vdev_id, bssid, oper_freq_mhz } => {
            csr.on_connected(vdev_id, bssid, oper_freq_mhz)
        }
        SmeRequest::Disassociate { vdev_id, peer, reason_code } => {
            if let Err(e) = csr.issue_disassociate(vdev_id, peer, reason_code) {
                warn!("vdev {}: disassociate {} rejected: {}", vdev_id, peer.to_mac_str(), e);
            }
        }
        SmeRequest::Deauthenticate { vdev_id, peer, reason_code } => {
            if let Err(e) = csr.issue_deauthenticate(vdev_id, peer, reason_code) {
                warn!("vdev {}: deauthenticate {} rejected: {}", vdev_id, peer.to_mac_str(), e);
            }
        }
        SmeRequest::WaitForKey { vdev_id } => csr.start_wait_for_key(vdev_id),
        SmeRequest::Command { vdev_id, kind } => {
            let cmd_type = kind.cmd_type();
            if let Err(e) = csr.issue_command(vdev_id, kind) {
                warn!("vdev {}: {:?} rejected: {}", vdev_id, cmd_type, e);
            }
        }
    }
}

/// Moves firmware requests onto the HTC link and firmware events off it. Requests issued
/// before the firmware service is connected wait until it is.
pub async fn serve_fw_link(
    mut link: FwLink,
    fw_requests: FwRequestStream,
    rx_frames: FrameStream,
    fw_event_sink: UnboundedSink<FwEvent>,
) -> Result<(), Error> {
    let mut fw_requests = fw_requests.fuse();
    let mut rx_frames = rx_frames.fuse();
    let mut backlog: VecDeque<FwRequest> = VecDeque::new();
    loop {
        select! {
            req = fw_requests.next() => match req {
                Some(req) => {
                    backlog.push_back(req);
                    flush_backlog(&mut link, &mut backlog);
                }
                None => {
                    info!("firmware request stream ended, shutting down");
                    return Ok(());
                }
            },
            frame = rx_frames.next() => match frame {
                Some(frame) => {
                    match link.on_rx_frame(&frame[..]) {
                        Ok(Some(event)) => fw_event_sink.send(event),
                        Ok(None) => {}
                        Err(e) => warn!("{:#}", e),
                    }
                    flush_backlog(&mut link, &mut backlog);
                }
                None => bail!("HTC frame stream terminated unexpectedly"),
            },
        }
    }
}

fn flush_backlog(link: &mut FwLink, backlog: &mut VecDeque<FwRequest>) {
    if link.endpoint_id().is_none() {
        return;
    }
    while let Some(req) = backlog.pop_front() {
        if let Err(e) = link.send_request(&req) {
            error!("failed to send {:?}: {}", req, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            command::CommandKind,
            csr::OpMode,
            test_utils::{expect_fw_request, next_timeout, PEER_A},
            FwStatus, PeerStats, RoamEvent, RoamStatus,
        },
        futures::{channel::mpsc, executor::block_on, pin_mut, task::Poll},
        std::{pin::Pin, task::Context},
        wlan_common::{assert_variant, mac::ReasonCode},
        wlan_htc::{
            control::{
                ConnectServiceResponse, ConnectStatus, ControlMessage, Ready, HTC_CONTROL_ENDPOINT,
                WMI_CONTROL_SVC,
            },
            frame::{write_frame, HtcFrame},
            Htc,
        },
    };

    fn poll_once<F: Future + ?Sized>(fut: Pin<&mut F>) -> Poll<F::Output> {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        fut.poll(&mut cx)
    }

    struct ServeHarness {
        sme_sink: mpsc::UnboundedSender<SmeRequest>,
        fw_sink: mpsc::UnboundedSender<FwEvent>,
        timeout_sink: mpsc::UnboundedSender<EventId>,
        fw_requests: FwRequestStream,
        roam_events: RoamEventStream,
        time_stream: wlan_common::timer::TimeStream,
    }

    fn serve_harness() -> (ServeHarness, Pin<Box<dyn Future<Output = Result<(), Error>>>>) {
        let (csr, fw_requests, roam_events, time_stream) = Csr::new(SmeConfig::default());
        let (sme_sink, sme_requests) = mpsc::unbounded();
        let (fw_sink, fw_events) = mpsc::unbounded();
        let (timeout_sink, timeouts) = mpsc::unbounded();
        let fut = Box::pin(serve_csr(csr, sme_requests, fw_events, timeouts));
        let h = ServeHarness { sme_sink, fw_sink, timeout_sink, fw_requests, roam_events, time_stream };
        (h, fut)
    }

    #[test]
    fn disassociate_through_serve_loop() {
        let (mut h, mut fut) = serve_harness();
        h.sme_sink
            .unbounded_send(SmeRequest::OpenSession { vdev_id: 3, op_mode: OpMode::Sta })
            .expect("open session");
        h.sme_sink
            .unbounded_send(SmeRequest::Disassociate {
                vdev_id: 3,
                peer: PEER_A,
                reason_code: ReasonCode::LEAVING_NETWORK_DEAUTH,
            })
            .expect("disassociate");
        assert!(poll_once(fut.as_mut()).is_pending());

        let request_id = assert_variant!(
            expect_fw_request(&mut h.fw_requests),
            FwRequest::GetPeerStats { request_id, vdev_id: 3, peer: PEER_A } => request_id
        );
        h.fw_sink
            .unbounded_send(FwEvent::PeerStats {
                request_id,
                vdev_id: 3,
                peer: PEER_A,
                stats: PeerStats::default(),
            })
            .expect("peer stats");
        assert!(poll_once(fut.as_mut()).is_pending());
        assert_variant!(expect_fw_request(&mut h.fw_requests), FwRequest::DisassocReq { vdev_id: 3, .. });

        h.fw_sink
            .unbounded_send(FwEvent::DisassocRsp { vdev_id: 3, peer: PEER_A, status: FwStatus::SUCCESS })
            .expect("disassoc rsp");
        assert!(poll_once(fut.as_mut()).is_pending());
        assert_variant!(
            h.roam_events.try_next(),
            Ok(Some(RoamEvent::DisconnectComplete { vdev_id: 3, status: RoamStatus::Success, .. }))
        );
    }

    #[test]
    fn injected_timeout_completes_command() {
        let (mut h, mut fut) = serve_harness();
        h.sme_sink
            .unbounded_send(SmeRequest::OpenSession { vdev_id: 1, op_mode: OpMode::Sta })
            .expect("open session");
        h.sme_sink
            .unbounded_send(SmeRequest::Command { vdev_id: 1, kind: CommandKind::DelTs { tsid: 3 } })
            .expect("command");
        assert!(poll_once(fut.as_mut()).is_pending());
        assert_eq!(expect_fw_request(&mut h.fw_requests), FwRequest::DelTs { vdev_id: 1, tsid: 3 });

        let (_, event_id) = next_timeout(&mut h.time_stream);
        h.timeout_sink.unbounded_send(event_id).expect("fire timeout");
        assert!(poll_once(fut.as_mut()).is_pending());
        assert_variant!(
            h.roam_events.try_next(),
            Ok(Some(RoamEvent::CommandComplete { vdev_id: 1, status: RoamStatus::TimedOut, .. }))
        );
    }

    #[test]
    fn rejected_request_keeps_serving() {
        let (mut h, mut fut) = serve_harness();
        h.sme_sink
            .unbounded_send(SmeRequest::Deauthenticate {
                vdev_id: 9,
                peer: PEER_A,
                reason_code: ReasonCode::UNSPECIFIED_REASON,
            })
            .expect("deauthenticate");
        assert!(poll_once(fut.as_mut()).is_pending());
        assert!(h.fw_requests.try_next().is_err());
    }

    #[test]
    fn sme_stream_end_is_clean_shutdown() {
        let (h, mut fut) = serve_harness();
        drop(h.sme_sink);
        assert_variant!(poll_once(fut.as_mut()), Poll::Ready(Ok(())));
    }

    #[test]
    fn fw_event_stream_end_is_an_error() {
        let (h, mut fut) = serve_harness();
        drop(h.fw_sink);
        assert_variant!(poll_once(fut.as_mut()), Poll::Ready(Err(_)));
    }

    #[test]
    fn timer_stream_end_is_an_error() {
        let (h, mut fut) = serve_harness();
        drop(h.timeout_sink);
        assert_variant!(poll_once(fut.as_mut()), Poll::Ready(Err(_)));
    }

    #[test]
    fn serve_fires_real_timeouts() {
        let config = SmeConfig { add_del_ts_timeout_ms: 10, ..SmeConfig::default() };
        let (sme_sink, sme_requests) = mpsc::unbounded();
        let (_fw_sink, fw_events) = mpsc::unbounded();
        let (_fw_requests, mut roam_events, serve_fut) = serve(config, sme_requests, fw_events);
        sme_sink
            .unbounded_send(SmeRequest::OpenSession { vdev_id: 1, op_mode: OpMode::Sta })
            .expect("open session");
        sme_sink
            .unbounded_send(SmeRequest::Command { vdev_id: 1, kind: CommandKind::AddTs { tsid: 1 } })
            .expect("command");
        let event = block_on(async {
            let serve_fut = serve_fut.fuse();
            pin_mut!(serve_fut);
            select! {
                result = serve_fut => panic!("serve loop ended: {:?}", result),
                event = roam_events.next() => event,
            }
        });
        assert_variant!(
            event,
            Some(RoamEvent::CommandComplete { vdev_id: 1, status: RoamStatus::TimedOut, .. })
        );
    }

    fn control_frame(msg: ControlMessage) -> Vec<u8> {
        let mut payload = vec![];
        msg.write(&mut payload).expect("control message");
        let mut buf = vec![];
        write_frame(&mut buf, HTC_CONTROL_ENDPOINT, 0, &payload[..], &[]).expect("control frame");
        buf
    }

    #[test]
    fn fw_link_holds_requests_until_connected() {
        let (frame_sink, mut tx_frames) = mpsc::unbounded();
        let link = FwLink::new(Htc::new(UnboundedSink::new(frame_sink)), WMI_CONTROL_SVC);
        let (req_sink, fw_requests) = mpsc::unbounded();
        let (rx_sink, rx_frames) = mpsc::unbounded();
        let (event_sink, mut fw_events) = mpsc::unbounded();
        let fut = serve_fw_link(link, fw_requests, rx_frames, UnboundedSink::new(event_sink));
        pin_mut!(fut);

        let req = FwRequest::RoamScanControl { vdev_id: 1, enable: false };
        req_sink.unbounded_send(req.clone()).expect("request");
        assert!(poll_once(fut.as_mut()).is_pending());
        assert!(tx_frames.try_next().is_err());

        let ready = Ready { credit_count: 2, credit_size: 128, max_endpoints: 3, ext: None };
        rx_sink.unbounded_send(control_frame(ControlMessage::Ready(ready))).expect("ready");
        let resp = ConnectServiceResponse {
            service_id: WMI_CONTROL_SVC,
            status: ConnectStatus::Success as u8,
            endpoint_id: 1,
            max_msg_size: 256,
            lookahead_v2: false,
            meta: vec![],
        };
        rx_sink
            .unbounded_send(control_frame(ControlMessage::ConnectServiceResponse(resp)))
            .expect("connect response");
        assert!(poll_once(fut.as_mut()).is_pending());

        // Connect request, setup complete, then the held request.
        let mut frames = vec![];
        while let Ok(Some(frame)) = tx_frames.try_next() {
            frames.push(frame);
        }
        assert_eq!(frames.len(), 3);
        let parsed = HtcFrame::parse(&frames[2][..]).expect("valid frame");
        assert_eq!(parsed.endpoint_id(), 1);
        assert_eq!(FwRequest::parse(parsed.payload), Ok(req));

        let event = FwEvent::SetKeyRsp { vdev_id: 1, peer: PEER_A, status: FwStatus::SUCCESS };
        let mut payload = vec![];
        event.write(&mut payload);
        let mut frame = vec![];
        write_frame(&mut frame, 1, 0, &payload[..], &[]).expect("event frame");
        rx_sink.unbounded_send(frame).expect("event");
        assert!(poll_once(fut.as_mut()).is_pending());
        assert_eq!(fw_events.try_next().expect("event").expect("open stream"), event);

        drop(req_sink);
        assert_variant!(poll_once(fut.as_mut()), Poll::Ready(Ok(())));
    }
}
