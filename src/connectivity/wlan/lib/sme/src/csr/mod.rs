// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod disconnect_stats;
mod event;
mod indication;
mod session;
mod set_key;

pub use self::{
    event::Event,
    session::{DisconnectStats, OpMode, RoamState, Session, SubState},
};

use {
    self::disconnect_stats::DisconnectStatsContext,
    crate::{
        command::{
            make_cmd_id, roam_status, Command, CommandError, CommandId, CommandKind,
            CommandResult, RoamReason,
        },
        config::SmeConfig,
        serialization::{CommandHandle, QueueError, Serializer},
        FwEvent, FwRequest, FwRequestStream, FwSink, FwStatus, KeyInstallError, PeerStats,
        RoamEvent, RoamEventSink, RoamEventStream, VdevId, WmStatusChangeType,
    },
    futures::channel::mpsc,
    log::{debug, error, info, warn},
    std::collections::HashMap,
    thiserror::Error,
    wlan_common::{
        format::MacFmt,
        mac::{MacAddr, ReasonCode},
        sink::UnboundedSink,
        timer::{self, EventId, TimeStream, Timer},
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoamResult {
    /// The host removed the peer.
    Forced,
    DisassocInd,
    Deauthenticated,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthenticationResult {
    /// Group key installed, the link is fully authenticated.
    Authenticated,
    /// Pairwise key installed.
    None,
    Failure(KeyInstallError),
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
#[error("firmware request channel is closed")]
pub struct FwChannelClosed;

/// Connection and roaming state of every vdev, and the commands that change it.
pub struct Csr {
    config: SmeConfig,
    sessions: HashMap<VdevId, Session>,
    serializer: Serializer,
    handles: HashMap<CommandId, CommandHandle>,
    timer: Timer<Event>,
    fw_sink: FwSink,
    event_sink: RoamEventSink,
    stats_ctx: DisconnectStatsContext,
    cmd_counter: u32,
    stats_request_counter: u32,
}

impl Csr {
    pub fn new(config: SmeConfig) -> (Self, FwRequestStream, RoamEventStream, TimeStream) {
        let (fw_sink, fw_stream) = mpsc::unbounded();
        let (event_sink, event_stream) = mpsc::unbounded();
        let (timer, time_stream) = timer::create_timer();
        let csr = Csr {
            config,
            sessions: HashMap::new(),
            serializer: Serializer::new(),
            handles: HashMap::new(),
            timer,
            fw_sink: UnboundedSink::new(fw_sink),
            event_sink: UnboundedSink::new(event_sink),
            stats_ctx: DisconnectStatsContext::default(),
            cmd_counter: 0,
            stats_request_counter: 0,
        };
        (csr, fw_stream, event_stream, time_stream)
    }

    pub fn config(&self) -> &SmeConfig {
        &self.config
    }

    pub fn session(&self, vdev_id: VdevId) -> Option<&Session> {
        self.sessions.get(&vdev_id)
    }

    pub fn disconnect_stats(&self, vdev_id: VdevId) -> Option<DisconnectStats> {
        self.sessions.get(&vdev_id).map(|session| session.disconnect_stats)
    }

    /// Statistics of the peer the vdev is disconnecting, or of the last peer it disconnected.
    pub fn peer_stats(&self, vdev_id: VdevId) -> Option<PeerStats> {
        self.sessions.get(&vdev_id).map(|session| session.peer_stats)
    }

    fn session_peer_stats(&self, vdev_id: VdevId) -> PeerStats {
        self.peer_stats(vdev_id).unwrap_or_default()
    }

    pub fn active_command(&self, vdev_id: VdevId) -> Option<&Command> {
        self.serializer.active(vdev_id)
    }

    pub fn pending_count(&self, vdev_id: VdevId) -> usize {
        self.serializer.pending_count(vdev_id)
    }

    pub fn open_session(&mut self, vdev_id: VdevId, op_mode: OpMode) {
        if self.sessions.contains_key(&vdev_id) {
            warn!("vdev {} already has a session", vdev_id);
            return;
        }
        info!("vdev {}: session opened as {:?}", vdev_id, op_mode);
        self.serializer.add_vdev(vdev_id);
        self.sessions.insert(vdev_id, Session::new(vdev_id, op_mode));
    }

    /// Tears the session down. Every command still queued for it completes as cancelled.
    pub fn close_session(&mut self, vdev_id: VdevId) {
        let session = match self.sessions.get_mut(&vdev_id) {
            Some(session) => session,
            None => {
                warn!("vdev {}: no session to close", vdev_id);
                return;
            }
        };
        if let Some(timer_id) = session.wait_for_key_timer.take() {
            self.timer.cancel_event(timer_id);
        }
        if session.is_ss_wait_for_key() {
            session.set_ss_none();
        }
        for (cmd, result) in self.serializer.purge_vdev(vdev_id, &mut self.timer) {
            self.handles.remove(&cmd.cmd_id);
            self.report_completion(cmd, result);
        }
        self.serializer.remove_vdev(vdev_id);
        self.sessions.remove(&vdev_id);
        info!("vdev {}: session closed", vdev_id);
        self.event_sink.send(RoamEvent::SessionClosed { vdev_id });
    }

    /// Records the BSS the vdev joined.
    pub fn on_connected(&mut self, vdev_id: VdevId, bssid: MacAddr, oper_freq_mhz: u32) {
        match self.sessions.get_mut(&vdev_id) {
            Some(session) => {
                session.set_connected(bssid, oper_freq_mhz);
                session.set_joined();
            }
            None => error!("vdev {}: connected without a session", vdev_id),
        }
    }

    pub fn issue_disassociate(
        &mut self,
        vdev_id: VdevId,
        peer: MacAddr,
        reason_code: ReasonCode,
    ) -> Result<CommandId, QueueError> {
        let roam_reason = RoamReason::ForcedDisassocSta;
        let kind = CommandKind::Roam { roam_reason, peer, reason_code };
        self.issue(vdev_id, kind, true)
    }

    pub fn issue_deauthenticate(
        &mut self,
        vdev_id: VdevId,
        peer: MacAddr,
        reason_code: ReasonCode,
    ) -> Result<CommandId, QueueError> {
        let roam_reason = RoamReason::ForcedDeauthSta;
        let kind = CommandKind::Roam { roam_reason, peer, reason_code };
        self.issue(vdev_id, kind, true)
    }

    pub fn issue_command(
        &mut self,
        vdev_id: VdevId,
        kind: CommandKind,
    ) -> Result<CommandId, QueueError> {
        self.issue(vdev_id, kind, false)
    }

    fn issue(
        &mut self,
        vdev_id: VdevId,
        kind: CommandKind,
        high_priority: bool,
    ) -> Result<CommandId, QueueError> {
        if !self.sessions.contains_key(&vdev_id) {
            return Err(QueueError::SessionNotFound(vdev_id));
        }
        let cmd = Command::new(self.next_cmd_id(), vdev_id, kind, &self.config);
        let cmd = if high_priority { cmd.high_priority() } else { cmd };
        self.enqueue(cmd)
    }

    fn enqueue(&mut self, cmd: Command) -> Result<CommandId, QueueError> {
        let vdev_id = cmd.vdev_id;
        let cmd_id = cmd.cmd_id;
        let handle = self.serializer.enqueue(cmd)?;
        self.handles.insert(cmd_id, handle);
        self.process_pending(vdev_id);
        Ok(cmd_id)
    }

    fn next_cmd_id(&mut self) -> CommandId {
        self.cmd_counter = self.cmd_counter.wrapping_add(1);
        make_cmd_id(self.cmd_counter)
    }

    pub fn on_fw_event(&mut self, event: FwEvent) {
        match event {
            FwEvent::PeerStats { request_id, vdev_id, peer, stats } => {
                self.on_peer_stats(request_id, vdev_id, peer, stats)
            }
            FwEvent::DisassocRsp { vdev_id, peer, status } => {
                self.on_disconnect_rsp(vdev_id, peer, SubState::DisassocReq, status)
            }
            FwEvent::DeauthRsp { vdev_id, peer, status } => {
                self.on_disconnect_rsp(vdev_id, peer, SubState::DeauthReq, status)
            }
            FwEvent::DisassocInd { vdev_id, peer, bssid, reason_code } => {
                self.on_disassoc_ind(vdev_id, peer, bssid, reason_code)
            }
            FwEvent::DeauthInd { vdev_id, peer, bssid, reason_code } => {
                self.on_deauth_ind(vdev_id, peer, bssid, reason_code)
            }
            FwEvent::DisconnectDoneInd { vdev_id, peer, reason_code } => {
                self.on_disconnect_done_ind(vdev_id, peer, reason_code)
            }
            FwEvent::SetKeyRsp { vdev_id, peer, status } => {
                self.on_set_key_rsp(vdev_id, peer, status)
            }
            FwEvent::CommandRsp { vdev_id, cmd_type, status } => {
                match self.serializer.find_active(vdev_id, |cmd| {
                    !cmd.kind.is_disconnect() && cmd.cmd_type() == cmd_type
                }) {
                    Some(cmd) => {
                        let cmd_id = cmd.cmd_id;
                        self.complete_command(cmd_id, fw_result(status));
                    }
                    None => warn!("vdev {}: response for inactive {:?}", vdev_id, cmd_type),
                }
            }
        }
        self.process_all_pending();
    }

    pub fn on_timeout(&mut self, event_id: EventId) {
        match self.timer.triggered(&event_id) {
            Some(Event::CommandTimeout(timeout)) => {
                if let Some((cmd, result)) = self.serializer.handle_timeout(event_id, timeout) {
                    self.handles.remove(&cmd.cmd_id);
                    self.report_completion(cmd, result);
                }
            }
            Some(Event::DisconnectStatsTimeout(timeout)) => {
                self.on_disconnect_stats_timeout(timeout.request_id)
            }
            Some(Event::WaitForKeyTimeout(timeout)) => {
                self.on_wait_for_key_timeout(timeout.vdev_id)
            }
            None => return,
        }
        self.process_all_pending();
    }

    fn process_all_pending(&mut self) {
        let vdev_ids: Vec<VdevId> = self.sessions.keys().copied().collect();
        for vdev_id in vdev_ids {
            self.process_pending(vdev_id);
        }
    }

    fn process_pending(&mut self, vdev_id: VdevId) {
        while let Some(cmd) = self.serializer.activate_next(vdev_id, &mut self.timer) {
            self.activate(cmd);
        }
    }

    fn activate(&mut self, cmd: Command) {
        let vdev_id = cmd.vdev_id;
        match cmd.kind {
            CommandKind::Roam { roam_reason, peer, .. } => {
                let session = match self.sessions.get_mut(&vdev_id) {
                    Some(session) => session,
                    None => {
                        error!("vdev {}: no session for {:?}", vdev_id, roam_reason);
                        self.complete_command(cmd.cmd_id, Err(CommandError::Failed(FwStatus::FAILURE)));
                        return;
                    }
                };
                session.set_joining();
                session.set_sub_state(match roam_reason {
                    RoamReason::ForcedDisassocSta => SubState::DisassocReq,
                    RoamReason::ForcedDeauthSta => SubState::DeauthReq,
                });
                // Fetch the peer's stats while it still exists. The disconnect continues once
                // they arrive or the fetch times out.
                self.get_peer_stats(vdev_id, peer);
            }
            CommandKind::WmStatusChange { indication, .. } => {
                self.get_peer_stats(vdev_id, indication.peer)
            }
            ref kind => {
                if let Some(req) = policy_request(vdev_id, kind) {
                    if self.send_fw(req).is_err() {
                        self.complete_command(cmd.cmd_id, Err(CommandError::Failed(FwStatus::FAILURE)));
                    }
                }
            }
        }
    }

    fn on_disconnect_rsp(
        &mut self,
        vdev_id: VdevId,
        peer: MacAddr,
        expected: SubState,
        status: FwStatus,
    ) {
        match self.sessions.get(&vdev_id) {
            Some(session) if session.sub_state() == expected => {}
            Some(session) => {
                debug!(
                    "vdev {}: ignoring disconnect response for {} in {:?}",
                    vdev_id,
                    peer.to_mac_str(),
                    session.sub_state()
                );
                return;
            }
            None => {
                error!("vdev {}: disconnect response without a session", vdev_id);
                return;
            }
        }
        let cmd_id = match self
            .serializer
            .find_active(vdev_id, |cmd| matches!(cmd.kind, CommandKind::Roam { .. }))
        {
            Some(cmd) => cmd.cmd_id,
            None => {
                warn!("vdev {}: disconnect response without an active command", vdev_id);
                return;
            }
        };
        self.complete_command(cmd_id, fw_result(status));
    }

    pub(crate) fn complete_command(&mut self, cmd_id: CommandId, result: CommandResult) {
        let handle = match self.handles.remove(&cmd_id) {
            Some(handle) => handle,
            None => {
                error!("no handle for command {:#010x}", cmd_id);
                return;
            }
        };
        let vdev_id = handle.vdev_id();
        match self.serializer.complete_active(handle, &result, &mut self.timer) {
            Ok(cmd) => self.report_completion(cmd, result),
            Err(e) => error!("vdev {}: {}", vdev_id, e),
        }
    }

    fn report_completion(&mut self, cmd: Command, result: CommandResult) {
        let vdev_id = cmd.vdev_id;
        let cmd_type = cmd.cmd_type();
        if cmd.kind.is_disconnect() {
            self.release_disconnect_stats(vdev_id);
        }
        match cmd.kind {
            CommandKind::Roam { peer, reason_code, .. } => {
                self.on_disconnect_complete(vdev_id, peer, reason_code, result)
            }
            CommandKind::WmStatusChange { indication, .. } => {
                // A lost link that completed normally was reported by the disconnect done
                // indication.
                if result.is_err() {
                    if let Some(session) = self.sessions.get_mut(&vdev_id) {
                        session.set_idle();
                    }
                    self.event_sink.send(RoamEvent::DisconnectComplete {
                        vdev_id,
                        peer: indication.peer,
                        status: roam_status(&result),
                        stats: self.session_peer_stats(vdev_id),
                    });
                }
            }
            _ => self.event_sink.send(RoamEvent::CommandComplete {
                vdev_id,
                cmd_id: cmd.cmd_id,
                cmd_type,
                status: roam_status(&result),
            }),
        }
    }

    fn on_disconnect_complete(
        &mut self,
        vdev_id: VdevId,
        peer: MacAddr,
        reason_code: ReasonCode,
        result: CommandResult,
    ) {
        let status = roam_status(&result);
        let stats = self.session_peer_stats(vdev_id);
        match self.sessions.get_mut(&vdev_id) {
            Some(session) if result.is_ok() => {
                session.set_joined();
                // Only an AP tells the upper layer that one of its stations is gone.
                if session.is_ap() {
                    self.event_sink.send(RoamEvent::LostLink {
                        vdev_id,
                        peer,
                        result: RoamResult::Forced,
                        status,
                        reason_code,
                        stats,
                    });
                }
            }
            Some(session) => session.set_idle(),
            None => warn!("vdev {}: session gone before disconnect completed", vdev_id),
        }
        info!("vdev {}: disconnect of {} done: {:?}", vdev_id, peer.to_mac_str(), status);
        self.event_sink.send(RoamEvent::DisconnectComplete { vdev_id, peer, status, stats });
    }

    fn send_fw(&self, req: FwRequest) -> Result<(), FwChannelClosed> {
        if self.fw_sink.is_closed() {
            error!("dropping {:?}: firmware channel closed", req);
            return Err(FwChannelClosed);
        }
        self.fw_sink.send(req);
        Ok(())
    }
}

fn fw_result(status: FwStatus) -> CommandResult {
    if status.is_success() {
        Ok(())
    } else {
        Err(CommandError::Failed(status))
    }
}

fn policy_request(vdev_id: VdevId, kind: &CommandKind) -> Option<FwRequest> {
    match *kind {
        CommandKind::AddTs { tsid } => Some(FwRequest::AddTs { vdev_id, tsid }),
        CommandKind::DelTs { tsid } => Some(FwRequest::DelTs { vdev_id, tsid }),
        CommandKind::SetHwMode { hw_mode_index } => {
            Some(FwRequest::SetHwMode { vdev_id, hw_mode_index })
        }
        CommandKind::NssUpdate { nss } => Some(FwRequest::NssUpdate { vdev_id, nss }),
        CommandKind::SetDualMacConfig { scan_config, fw_mode_config } => {
            Some(FwRequest::SetDualMacConfig { vdev_id, scan_config, fw_mode_config })
        }
        CommandKind::SetAntennaMode { num_rx_chains, num_tx_chains } => {
            Some(FwRequest::SetAntennaMode { vdev_id, num_rx_chains, num_tx_chains })
        }
        CommandKind::Roam { .. } | CommandKind::WmStatusChange { .. } => None,
    }
}

fn lost_link_result(change_type: WmStatusChangeType) -> RoamResult {
    match change_type {
        WmStatusChangeType::Disassociated => RoamResult::DisassocInd,
        WmStatusChangeType::Deauthenticated => RoamResult::Deauthenticated,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            command::CommandType,
            test_utils::{expect_fw_request, expect_no_fw_request, fire_timeouts, next_timeout, CsrHarness, PEER_A, PEER_B},
            RoamStatus,
        },
        test_case::test_case,
        wlan_common::assert_variant,
    };

    #[test]
    fn open_and_close_session() {
        let mut h = CsrHarness::new();
        h.csr.open_session(1, OpMode::Sta);
        assert_eq!(h.csr.session(1).map(|s| s.state()), Some(RoamState::Idle));
        h.csr.close_session(1);
        assert!(h.csr.session(1).is_none());
        assert_eq!(h.next_event(), RoamEvent::SessionClosed { vdev_id: 1 });
        assert_eq!(
            h.csr.issue_disassociate(1, PEER_A, ReasonCode::LEAVING_NETWORK_DISASSOC),
            Err(QueueError::SessionNotFound(1))
        );
    }

    #[test]
    fn forced_disassoc_enters_joining() {
        let mut h = CsrHarness::with_session(3, OpMode::Sta);
        h.csr.issue_disassociate(3, PEER_A, ReasonCode::LEAVING_NETWORK_DEAUTH).expect("issue");
        let session = h.csr.session(3).expect("session");
        assert_eq!(session.state(), RoamState::Joining);
        assert_eq!(session.sub_state(), SubState::DisassocReq);
        assert_variant!(
            expect_fw_request(&mut h.fw_requests),
            FwRequest::GetPeerStats { vdev_id: 3, peer: PEER_A, .. }
        );
    }

    #[test]
    fn host_disassociate_end_to_end() {
        let mut h = CsrHarness::with_session(3, OpMode::Sta);
        let cmd_id =
            h.csr.issue_disassociate(3, PEER_A, ReasonCode::LEAVING_NETWORK_DEAUTH).expect("issue");
        assert_eq!(h.csr.active_command(3).map(|c| c.cmd_id), Some(cmd_id));

        let request_id = assert_variant!(
            expect_fw_request(&mut h.fw_requests),
            FwRequest::GetPeerStats { request_id, vdev_id: 3, peer: PEER_A } => request_id
        );
        let stats = PeerStats { rssi: -55, tx_rate: 866, rx_rate: 650, rx_mc_bc_cnt: 4, rx_retry_cnt: 2 };
        h.csr.on_fw_event(FwEvent::PeerStats { request_id, vdev_id: 3, peer: PEER_A, stats });
        assert_eq!(
            expect_fw_request(&mut h.fw_requests),
            FwRequest::DisassocReq {
                vdev_id: 3,
                peer: PEER_A,
                reason_code: ReasonCode::LEAVING_NETWORK_DEAUTH
            }
        );

        h.csr.on_fw_event(FwEvent::DisassocRsp { vdev_id: 3, peer: PEER_A, status: FwStatus::SUCCESS });
        assert_eq!(
            h.next_event(),
            RoamEvent::DisconnectComplete { vdev_id: 3, peer: PEER_A, status: RoamStatus::Success, stats }
        );
        let session = h.csr.session(3).expect("session");
        assert_eq!(session.state(), RoamState::Joined);
        assert_eq!(session.sub_state(), SubState::None);
        let counters = h.csr.disconnect_stats(3).expect("stats");
        assert_eq!(counters.disconnection_cnt, 1);
        assert_eq!(counters.disconnection_by_app, 1);
        assert_eq!(counters.disassoc_by_peer, 0);
        assert_eq!(h.csr.active_command(3), None);
        h.expect_no_event();
    }

    #[test]
    fn sap_forced_deauth_reports_lost_link() {
        let mut h = CsrHarness::with_session(2, OpMode::Sap);
        h.csr.on_connected(2, PEER_B, 2437);
        h.csr.issue_deauthenticate(2, PEER_A, ReasonCode::UNSPECIFIED_REASON).expect("issue");
        let request_id = h.expect_stats_request(2);
        h.csr.on_fw_event(FwEvent::PeerStats {
            request_id,
            vdev_id: 2,
            peer: PEER_A,
            stats: PeerStats::default(),
        });
        assert_variant!(expect_fw_request(&mut h.fw_requests), FwRequest::DeauthReq { vdev_id: 2, .. });
        h.csr.on_fw_event(FwEvent::DeauthRsp { vdev_id: 2, peer: PEER_A, status: FwStatus::SUCCESS });

        assert_eq!(
            h.next_event(),
            RoamEvent::LostLink {
                vdev_id: 2,
                peer: PEER_A,
                result: RoamResult::Forced,
                status: RoamStatus::Success,
                reason_code: ReasonCode::UNSPECIFIED_REASON,
                stats: PeerStats::default(),
            }
        );
        assert_variant!(
            h.next_event(),
            RoamEvent::DisconnectComplete { vdev_id: 2, status: RoamStatus::Success, .. }
        );
        let session = h.csr.session(2).expect("session");
        assert_eq!(session.state(), RoamState::Joined);
        assert_eq!(session.sub_state(), SubState::None);
    }

    #[test_case(OpMode::Sta; "station")]
    #[test_case(OpMode::P2pClient; "p2p client")]
    fn client_forced_deauth_success_joins(op_mode: OpMode) {
        let mut h = CsrHarness::with_session(4, op_mode);
        h.csr.on_connected(4, PEER_B, 5180);
        h.csr.issue_deauthenticate(4, PEER_B, ReasonCode::LEAVING_NETWORK_DEAUTH).expect("issue");
        assert_eq!(h.csr.session(4).map(|s| s.state()), Some(RoamState::Joining));
        let request_id = h.expect_stats_request(4);
        h.csr.on_fw_event(FwEvent::PeerStats {
            request_id,
            vdev_id: 4,
            peer: PEER_B,
            stats: PeerStats::default(),
        });
        assert_variant!(expect_fw_request(&mut h.fw_requests), FwRequest::DeauthReq { vdev_id: 4, .. });
        h.csr.on_fw_event(FwEvent::DeauthRsp { vdev_id: 4, peer: PEER_B, status: FwStatus::SUCCESS });

        // Clients hear only the completion, no lost link.
        assert_variant!(
            h.next_event(),
            RoamEvent::DisconnectComplete { vdev_id: 4, status: RoamStatus::Success, .. }
        );
        h.expect_no_event();
        let session = h.csr.session(4).expect("session");
        assert_eq!(session.state(), RoamState::Joined);
        assert_eq!(session.sub_state(), SubState::None);
    }

    #[test]
    fn rsp_in_wrong_sub_state_ignored() {
        let mut h = CsrHarness::with_session(1, OpMode::Sta);
        h.csr.issue_disassociate(1, PEER_A, ReasonCode::LEAVING_NETWORK_DEAUTH).expect("issue");
        h.csr.on_fw_event(FwEvent::DeauthRsp { vdev_id: 1, peer: PEER_A, status: FwStatus::SUCCESS });
        assert!(h.csr.active_command(1).is_some());
        assert_eq!(h.csr.session(1).map(|s| s.sub_state()), Some(SubState::DisassocReq));
        h.expect_no_event();
    }

    #[test]
    fn failed_rsp_goes_idle() {
        let mut h = CsrHarness::with_session(1, OpMode::Sap);
        h.csr.issue_deauthenticate(1, PEER_A, ReasonCode::UNSPECIFIED_REASON).expect("issue");
        let request_id = h.expect_stats_request(1);
        h.csr.on_fw_event(FwEvent::PeerStats { request_id, vdev_id: 1, peer: PEER_A, stats: PeerStats::default() });
        h.csr.on_fw_event(FwEvent::DeauthRsp { vdev_id: 1, peer: PEER_A, status: FwStatus(5) });
        assert_variant!(
            h.next_event(),
            RoamEvent::DisconnectComplete { status: RoamStatus::Failure, .. }
        );
        let session = h.csr.session(1).expect("session");
        assert_eq!(session.state(), RoamState::Idle);
        assert_eq!(session.sub_state(), SubState::None);
    }

    #[test]
    fn disconnect_timeout_completes_and_activates_next() {
        let mut h = CsrHarness::with_session(1, OpMode::Sta);
        h.csr.issue_disassociate(1, PEER_A, ReasonCode::LEAVING_NETWORK_DEAUTH).expect("issue");
        let add_ts = h.csr.issue_command(1, CommandKind::AddTs { tsid: 2 }).expect("issue add ts");
        assert_eq!(h.csr.pending_count(1), 1);

        // Command timeout first, then the stats timeout.
        let (_, cmd_timeout) = next_timeout(&mut h.time_stream);
        let (_, stats_timeout) = next_timeout(&mut h.time_stream);
        h.csr.on_timeout(cmd_timeout);
        assert_variant!(
            h.next_event(),
            RoamEvent::DisconnectComplete { vdev_id: 1, peer: PEER_A, status: RoamStatus::TimedOut, .. }
        );
        let session = h.csr.session(1).expect("session");
        assert_eq!(session.state(), RoamState::Idle);
        assert_eq!(session.sub_state(), SubState::None);

        // The next command runs and the stats timer of the finished command is gone.
        assert_eq!(h.csr.active_command(1).map(|c| c.cmd_id), Some(add_ts));
        h.csr.on_timeout(stats_timeout);
        let _ = expect_fw_request(&mut h.fw_requests);
        assert_eq!(expect_fw_request(&mut h.fw_requests), FwRequest::AddTs { vdev_id: 1, tsid: 2 });
        expect_no_fw_request(&mut h.fw_requests);
    }

    #[test]
    fn policy_command_completes_on_rsp() {
        let mut h = CsrHarness::with_session(1, OpMode::Sta);
        let cmd_id = h.csr.issue_command(1, CommandKind::SetHwMode { hw_mode_index: 4 }).expect("issue");
        assert_eq!(
            expect_fw_request(&mut h.fw_requests),
            FwRequest::SetHwMode { vdev_id: 1, hw_mode_index: 4 }
        );
        h.csr.on_fw_event(FwEvent::CommandRsp {
            vdev_id: 1,
            cmd_type: CommandType::NssUpdate,
            status: FwStatus::SUCCESS,
        });
        h.expect_no_event();
        h.csr.on_fw_event(FwEvent::CommandRsp {
            vdev_id: 1,
            cmd_type: CommandType::SetHwMode,
            status: FwStatus::SUCCESS,
        });
        assert_eq!(
            h.next_event(),
            RoamEvent::CommandComplete {
                vdev_id: 1,
                cmd_id,
                cmd_type: CommandType::SetHwMode,
                status: RoamStatus::Success,
            }
        );
    }

    #[test]
    fn policy_command_timeout() {
        let mut h = CsrHarness::with_session(1, OpMode::Sta);
        let cmd_id = h.csr.issue_command(1, CommandKind::DelTs { tsid: 6 }).expect("issue");
        fire_timeouts(&mut h.csr, &mut h.time_stream);
        assert_eq!(
            h.next_event(),
            RoamEvent::CommandComplete {
                vdev_id: 1,
                cmd_id,
                cmd_type: CommandType::DelTs,
                status: RoamStatus::TimedOut,
            }
        );
        // A late response finds nothing to complete.
        h.csr.on_fw_event(FwEvent::CommandRsp {
            vdev_id: 1,
            cmd_type: CommandType::DelTs,
            status: FwStatus::SUCCESS,
        });
        h.expect_no_event();
    }

    #[test]
    fn close_session_purges_commands() {
        let mut h = CsrHarness::with_session(1, OpMode::Sta);
        h.csr.issue_disassociate(1, PEER_A, ReasonCode::LEAVING_NETWORK_DEAUTH).expect("issue");
        let add_ts = h.csr.issue_command(1, CommandKind::AddTs { tsid: 1 }).expect("issue");
        h.csr.start_wait_for_key(1);

        h.csr.close_session(1);
        assert_variant!(
            h.next_event(),
            RoamEvent::DisconnectComplete { vdev_id: 1, peer: PEER_A, status: RoamStatus::Cancelled, .. }
        );
        assert_eq!(
            h.next_event(),
            RoamEvent::CommandComplete {
                vdev_id: 1,
                cmd_id: add_ts,
                cmd_type: CommandType::AddTs,
                status: RoamStatus::Cancelled,
            }
        );
        assert_eq!(h.next_event(), RoamEvent::SessionClosed { vdev_id: 1 });
        assert_eq!(h.csr.active_command(1), None);

        // Every timer of the session is cancelled.
        fire_timeouts(&mut h.csr, &mut h.time_stream);
        h.expect_no_event();
    }

    #[test]
    fn closed_fw_channel_fails_policy_command() {
        let mut h = CsrHarness::with_session(1, OpMode::Sta);
        h.fw_requests.close();
        let cmd_id = h.csr.issue_command(1, CommandKind::NssUpdate { nss: 2 }).expect("issue");
        assert_eq!(
            h.next_event(),
            RoamEvent::CommandComplete {
                vdev_id: 1,
                cmd_id,
                cmd_type: CommandType::NssUpdate,
                status: RoamStatus::Failure,
            }
        );
        assert_eq!(h.csr.active_command(1), None);
    }
}
