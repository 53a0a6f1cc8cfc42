// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    super::{lost_link_result, Csr},
    crate::{
        command::{Command, CommandKind, StatusChangeIndication},
        FwStatus, RoamEvent, RoamStatus, VdevId, WmStatusChangeType,
    },
    log::{error, info, warn},
    wlan_common::{
        format::MacFmt,
        mac::{MacAddr, ReasonCode},
    },
};

impl Csr {
    pub(crate) fn on_disassoc_ind(
        &mut self,
        vdev_id: VdevId,
        peer: MacAddr,
        bssid: MacAddr,
        reason_code: ReasonCode,
    ) {
        let indication =
            StatusChangeIndication { peer, bssid, reason_code, status: FwStatus::SUCCESS };
        let cmd =
            match self.lost_link_command(vdev_id, WmStatusChangeType::Disassociated, indication) {
                Some(cmd) => cmd,
                None => return,
            };
        if let Some(session) = self.sessions.get_mut(&vdev_id) {
            session.disconnect_stats.record_disassoc_by_peer();
        }
        self.enqueue_lost_link(cmd);
    }

    pub(crate) fn on_deauth_ind(
        &mut self,
        vdev_id: VdevId,
        peer: MacAddr,
        bssid: MacAddr,
        reason_code: ReasonCode,
    ) {
        let indication =
            StatusChangeIndication { peer, bssid, reason_code, status: FwStatus::SUCCESS };
        let cmd =
            match self.lost_link_command(vdev_id, WmStatusChangeType::Deauthenticated, indication) {
                Some(cmd) => cmd,
                None => return,
            };
        if let Some(session) = self.sessions.get_mut(&vdev_id) {
            if !session.disconnect_stats.record_deauth(reason_code) {
                info!("vdev {}: deauth reason {} not counted", vdev_id, reason_code.0);
            }
        }
        self.enqueue_lost_link(cmd);
    }

    /// Builds the command for a lost link, or None when the vdev is unknown or the peer is
    /// already being disconnected.
    fn lost_link_command(
        &mut self,
        vdev_id: VdevId,
        change_type: WmStatusChangeType,
        indication: StatusChangeIndication,
    ) -> Option<Command> {
        if !self.sessions.contains_key(&vdev_id) {
            error!("vdev {}: {:?} indication without a session", vdev_id, change_type);
            return None;
        }
        let kind = CommandKind::WmStatusChange { change_type, indication };
        let cmd = Command::new(self.next_cmd_id(), vdev_id, kind, &self.config).high_priority();
        if self.serializer.has_duplicate(&cmd) {
            info!(
                "vdev {}: {:?} of {} ignored, disconnect already queued",
                vdev_id,
                change_type,
                indication.peer.to_mac_str()
            );
            return None;
        }
        info!(
            "vdev {}: {:?} by {} reason {}",
            vdev_id,
            change_type,
            indication.peer.to_mac_str(),
            indication.reason_code.0
        );
        Some(cmd)
    }

    fn enqueue_lost_link(&mut self, cmd: Command) {
        let vdev_id = cmd.vdev_id;
        if let Err(e) = self.enqueue(cmd) {
            error!("vdev {}: failed to queue lost link: {}", vdev_id, e);
        }
    }

    pub(crate) fn on_disconnect_done_ind(
        &mut self,
        vdev_id: VdevId,
        peer: MacAddr,
        reason_code: ReasonCode,
    ) {
        if !self.sessions.contains_key(&vdev_id) {
            error!("vdev {}: disconnect done without a session", vdev_id);
            return;
        }
        let active = self.serializer.find_active(vdev_id, |cmd| {
            matches!(cmd.kind, CommandKind::WmStatusChange { .. })
        });
        let (cmd_id, change_type) = match active.map(|cmd| (cmd.cmd_id, &cmd.kind)) {
            Some((cmd_id, CommandKind::WmStatusChange { change_type, .. })) => {
                (cmd_id, *change_type)
            }
            _ => {
                warn!(
                    "vdev {}: disconnect done for {} without an active lost link",
                    vdev_id,
                    peer.to_mac_str()
                );
                return;
            }
        };
        self.event_sink.send(RoamEvent::LostLink {
            vdev_id,
            peer,
            result: lost_link_result(change_type),
            status: RoamStatus::StaNotAssociated,
            reason_code,
            stats: self.session_peer_stats(vdev_id),
        });
        self.complete_command(cmd_id, Ok(()));
        if let Some(session) = self.sessions.get_mut(&vdev_id) {
            session.set_idle();
        }
    }
}
