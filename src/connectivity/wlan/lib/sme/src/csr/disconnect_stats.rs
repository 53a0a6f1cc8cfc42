// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    super::{event::DisconnectStatsTimeout, Csr},
    crate::{
        command::{CommandError, CommandKind, RoamReason},
        FwRequest, FwStatus, PeerStats, VdevId, WmStatusChangeType,
    },
    log::{debug, error, info, warn},
    std::sync::atomic::{AtomicBool, Ordering},
    wlan_common::{format::MacFmt, mac::MacAddr, timer::EventId},
};

/// The one stats fetch that may gate a disconnect at any time. A disconnect on another vdev
/// that finds the slot busy goes ahead without stats.
#[derive(Debug, Default)]
pub(crate) struct DisconnectStatsContext {
    vdev_id: Option<VdevId>,
    request_id: Option<u32>,
    timer_id: Option<EventId>,
    is_disconn_stats_completed: AtomicBool,
}

impl DisconnectStatsContext {
    fn in_flight(&self) -> Option<VdevId> {
        if self.is_disconn_stats_completed.load(Ordering::SeqCst) {
            None
        } else {
            self.vdev_id
        }
    }

    fn reset(&mut self, vdev_id: VdevId) {
        self.is_disconn_stats_completed.store(false, Ordering::SeqCst);
        self.vdev_id = Some(vdev_id);
        self.request_id = None;
        self.timer_id = None;
    }

    /// Only the first caller after a reset wins. The stats reply and the stats timeout both
    /// race for it.
    fn try_complete(&self) -> bool {
        self.is_disconn_stats_completed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_current_request(&self, request_id: u32) -> bool {
        self.request_id == Some(request_id)
    }
}

impl Csr {
    /// Asks the firmware for the stats of a peer about to be disconnected. The disconnect
    /// itself continues from `continue_disconnect`.
    pub(crate) fn get_peer_stats(&mut self, vdev_id: VdevId, peer: MacAddr) {
        // Stats left over from an earlier peer never describe this one.
        if let Some(session) = self.sessions.get_mut(&vdev_id) {
            session.peer_stats = PeerStats::default();
        }
        if let Some(busy_vdev) = self.stats_ctx.in_flight() {
            if busy_vdev != vdev_id {
                info!(
                    "vdev {}: stats fetch for vdev {} in flight, disconnecting {} without stats",
                    vdev_id,
                    busy_vdev,
                    peer.to_mac_str()
                );
                self.process_disconnect_cmd(vdev_id);
                return;
            }
        }
        self.stats_ctx.reset(vdev_id);

        if !self.sessions.contains_key(&vdev_id) {
            error!("vdev {}: no session, skipping stats", vdev_id);
            self.continue_disconnect();
            return;
        }

        self.stats_request_counter = self.stats_request_counter.wrapping_add(1);
        let request_id = self.stats_request_counter;
        if self.send_fw(FwRequest::GetPeerStats { request_id, vdev_id, peer }).is_err() {
            error!("vdev {}: failed to request stats of {}", vdev_id, peer.to_mac_str());
            self.continue_disconnect();
            return;
        }
        self.stats_ctx.request_id = Some(request_id);
        let timeout =
            DisconnectStatsTimeout { request_id, timeout: self.config.disconnect_stats_timeout() };
        self.stats_ctx.timer_id = Some(self.timer.schedule(timeout));
        debug!("vdev {}: stats request {} for {}", vdev_id, request_id, peer.to_mac_str());
    }

    pub(crate) fn on_peer_stats(
        &mut self,
        request_id: u32,
        vdev_id: VdevId,
        peer: MacAddr,
        stats: PeerStats,
    ) {
        if !self.stats_ctx.is_current_request(request_id) {
            debug!("vdev {}: stale stats reply {} for {}", vdev_id, request_id, peer.to_mac_str());
            return;
        }
        if let Some(timer_id) = self.stats_ctx.timer_id.take() {
            self.timer.cancel_event(timer_id);
        }
        debug!("vdev {}: stats of {}: {:?}", vdev_id, peer.to_mac_str(), stats);
        let gated_vdev = self.stats_ctx.vdev_id.unwrap_or(vdev_id);
        if let Some(session) = self.sessions.get_mut(&gated_vdev) {
            session.peer_stats = stats;
        }
        self.continue_disconnect();
    }

    pub(crate) fn on_disconnect_stats_timeout(&mut self, request_id: u32) {
        if !self.stats_ctx.is_current_request(request_id) {
            debug!("stale stats timeout {}", request_id);
            return;
        }
        self.stats_ctx.timer_id = None;
        info!("stats request {} timed out, disconnecting without stats", request_id);
        self.continue_disconnect();
    }

    /// Resumes the gated disconnect exactly once, whichever of stats and timeout comes first.
    pub(crate) fn continue_disconnect(&mut self) {
        let vdev_id = match self.stats_ctx.vdev_id {
            Some(vdev_id) => vdev_id,
            None => return,
        };
        if self.serializer.find_active(vdev_id, |cmd| cmd.kind.is_disconnect()).is_none() {
            error!("vdev {}: no active disconnect to continue", vdev_id);
            return;
        }
        if !self.stats_ctx.try_complete() {
            info!("vdev {}: disconnect already continued", vdev_id);
            return;
        }
        self.process_disconnect_cmd(vdev_id);
    }

    /// Frees the slot once the command it gated is finished, whatever the outcome.
    pub(crate) fn release_disconnect_stats(&mut self, vdev_id: VdevId) {
        if self.stats_ctx.vdev_id != Some(vdev_id) {
            return;
        }
        self.stats_ctx.is_disconn_stats_completed.store(true, Ordering::SeqCst);
        self.stats_ctx.request_id = None;
        if let Some(timer_id) = self.stats_ctx.timer_id.take() {
            self.timer.cancel_event(timer_id);
        }
    }

    fn process_disconnect_cmd(&mut self, vdev_id: VdevId) {
        let cmd = match self.serializer.find_active(vdev_id, |cmd| cmd.kind.is_disconnect()) {
            Some(cmd) => cmd.clone(),
            None => {
                error!("vdev {}: no active disconnect command", vdev_id);
                return;
            }
        };
        match cmd.kind {
            CommandKind::Roam { roam_reason, peer, reason_code } => {
                let req = match roam_reason {
                    RoamReason::ForcedDisassocSta => {
                        FwRequest::DisassocReq { vdev_id, peer, reason_code }
                    }
                    RoamReason::ForcedDeauthSta => {
                        FwRequest::DeauthReq { vdev_id, peer, reason_code }
                    }
                };
                if let Some(session) = self.sessions.get_mut(&vdev_id) {
                    session.disconnect_stats.record_app_disconnect();
                }
                info!(
                    "vdev {}: {:?} of {} reason {}",
                    vdev_id,
                    roam_reason,
                    peer.to_mac_str(),
                    reason_code.0
                );
                if self.send_fw(req).is_err() {
                    self.complete_command(cmd.cmd_id, Err(CommandError::Failed(FwStatus::FAILURE)));
                }
            }
            CommandKind::WmStatusChange { change_type, indication } => {
                let peer = indication.peer;
                let status = indication.status;
                let req = match change_type {
                    WmStatusChangeType::Disassociated => {
                        FwRequest::DisassocCnf { vdev_id, peer, status }
                    }
                    WmStatusChangeType::Deauthenticated => {
                        FwRequest::DeauthCnf { vdev_id, peer, status }
                    }
                };
                if self.send_fw(req).is_err() {
                    warn!("vdev {}: failed to confirm lost link of {}", vdev_id, peer.to_mac_str());
                    self.complete_command(cmd.cmd_id, Err(CommandError::Failed(FwStatus::FAILURE)));
                }
            }
            other => error!("vdev {}: {:?} is not a disconnect", vdev_id, other.cmd_type()),
        }
    }
}
