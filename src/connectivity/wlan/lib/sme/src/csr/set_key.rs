// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    super::{event::WaitForKeyTimeout, AuthenticationResult, Csr},
    crate::{FwRequest, FwStatus, KeyInstallError, RoamEvent, VdevId},
    log::{debug, error, info, warn},
    wlan_common::{
        format::MacFmt,
        mac::{is_broadcast, MacAddr},
    },
};

impl Csr {
    /// Holds roaming off until the keys of the new link are installed or the wait times out.
    pub fn start_wait_for_key(&mut self, vdev_id: VdevId) {
        let timeout = WaitForKeyTimeout { vdev_id, timeout: self.config.wait_for_key_timeout() };
        let session = match self.sessions.get_mut(&vdev_id) {
            Some(session) => session,
            None => {
                error!("vdev {}: waiting for keys without a session", vdev_id);
                return;
            }
        };
        if let Some(timer_id) = session.wait_for_key_timer.take() {
            self.timer.cancel_event(timer_id);
        }
        session.set_ss_wait_for_key();
        session.wait_for_key_timer = Some(self.timer.schedule(timeout));
        if self.send_fw(FwRequest::RoamScanControl { vdev_id, enable: false }).is_err() {
            warn!("vdev {}: failed to pause roam scans", vdev_id);
        }
    }

    pub(crate) fn on_set_key_rsp(&mut self, vdev_id: VdevId, peer: MacAddr, status: FwStatus) {
        let obss_scan_offload = self.config.obss_scan_offload;
        let session = match self.sessions.get_mut(&vdev_id) {
            Some(session) => session,
            None => {
                error!("vdev {}: set key response without a session", vdev_id);
                return;
            }
        };
        let was_waiting = session.is_ss_wait_for_key();
        if was_waiting {
            session.set_ss_none();
            if let Some(timer_id) = session.wait_for_key_timer.take() {
                self.timer.cancel_event(timer_id);
            }
        }
        let obss_bssid = session
            .connected_bssid()
            .filter(|_| obss_scan_offload && session.is_24ghz() && session.is_connected());

        // Roaming resumes once the keys are in. Without it the upper layer hears nothing.
        let resume = FwRequest::RoamScanControl { vdev_id, enable: true };
        if was_waiting && self.send_fw(resume).is_err() {
            error!("vdev {}: failed to resume roam scans", vdev_id);
            return;
        }

        let result = if !status.is_success() {
            error!("vdev {}: key install for {} failed: {:?}", vdev_id, peer.to_mac_str(), status);
            AuthenticationResult::Failure(KeyInstallError::Failed(status))
        } else if is_broadcast(&peer) {
            if let Some(bssid) = obss_bssid {
                debug!("vdev {}: starting OBSS scan offload", vdev_id);
                if self.send_fw(FwRequest::ObssScanInd { vdev_id, bssid }).is_err() {
                    warn!("vdev {}: failed to start OBSS scan offload", vdev_id);
                }
            }
            AuthenticationResult::Authenticated
        } else {
            AuthenticationResult::None
        };
        info!("vdev {}: key install for {}: {:?}", vdev_id, peer.to_mac_str(), result);
        self.event_sink.send(RoamEvent::SetKeyComplete { vdev_id, peer, result });
        self.event_sink.send(RoamEvent::QosSetKeyDone { vdev_id });
    }

    pub(crate) fn on_wait_for_key_timeout(&mut self, vdev_id: VdevId) {
        let session = match self.sessions.get_mut(&vdev_id) {
            Some(session) => session,
            None => {
                debug!("vdev {}: key timeout after session closed", vdev_id);
                return;
            }
        };
        session.wait_for_key_timer = None;
        if !session.is_ss_wait_for_key() {
            debug!("vdev {}: key timeout outside of key wait", vdev_id);
            return;
        }
        session.set_ss_none();
        warn!("vdev {}: timed out waiting for keys", vdev_id);
        if self.send_fw(FwRequest::RoamScanControl { vdev_id, enable: true }).is_err() {
            error!("vdev {}: failed to resume roam scans", vdev_id);
        }
        self.event_sink.send(RoamEvent::WaitForKeyTimeout { vdev_id });
    }
}
