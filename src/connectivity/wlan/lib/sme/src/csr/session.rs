// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{PeerStats, VdevId},
    log::debug,
    wlan_common::{
        mac::{is_24ghz_freq, MacAddr, ReasonCode},
        timer::EventId,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoamState {
    Stop,
    Init,
    Idle,
    Joining,
    Joined,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubState {
    None,
    DisassocReq,
    DeauthReq,
    WaitForKey,
    StopBssReq,
    StartBssReq,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpMode {
    Sta,
    P2pClient,
    Sap,
    P2pGo,
}

/// Counters of how the links of a vdev ended. They only ever grow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct DisconnectStats {
    pub disconnection_cnt: u32,
    pub disassoc_by_peer: u32,
    pub deauth_by_peer: u32,
    pub peer_kickout: u32,
    pub bmiss: u32,
    pub disconnection_by_app: u32,
}

impl DisconnectStats {
    pub fn record_app_disconnect(&mut self) {
        self.disconnection_cnt = self.disconnection_cnt.saturating_add(1);
        self.disconnection_by_app = self.disconnection_by_app.saturating_add(1);
    }

    pub fn record_disassoc_by_peer(&mut self) {
        self.disconnection_cnt = self.disconnection_cnt.saturating_add(1);
        self.disassoc_by_peer = self.disassoc_by_peer.saturating_add(1);
    }

    /// Counts a deauthentication by its reason. Returns false for reasons that are not tracked.
    pub fn record_deauth(&mut self, reason_code: ReasonCode) -> bool {
        let counter = if reason_code == ReasonCode::REASON_INACTIVITY {
            &mut self.peer_kickout
        } else if reason_code.is_peer_deauth() {
            &mut self.deauth_by_peer
        } else if reason_code == ReasonCode::BEACON_MISSED {
            &mut self.bmiss
        } else {
            return false;
        };
        *counter = counter.saturating_add(1);
        self.disconnection_cnt = self.disconnection_cnt.saturating_add(1);
        true
    }
}

#[derive(Debug)]
pub struct Session {
    vdev_id: VdevId,
    op_mode: OpMode,
    state: RoamState,
    sub_state: SubState,
    oper_freq_mhz: u32,
    connected_bssid: Option<MacAddr>,
    pub disconnect_stats: DisconnectStats,
    /// Stats of the peer this vdev is disconnecting, default until they arrive.
    pub(crate) peer_stats: PeerStats,
    pub(crate) wait_for_key_timer: Option<EventId>,
}

impl Session {
    pub fn new(vdev_id: VdevId, op_mode: OpMode) -> Self {
        Self {
            vdev_id,
            op_mode,
            state: RoamState::Idle,
            sub_state: SubState::None,
            oper_freq_mhz: 0,
            connected_bssid: None,
            disconnect_stats: DisconnectStats::default(),
            peer_stats: PeerStats::default(),
            wait_for_key_timer: None,
        }
    }

    pub fn vdev_id(&self) -> VdevId {
        self.vdev_id
    }

    pub fn op_mode(&self) -> OpMode {
        self.op_mode
    }

    pub fn state(&self) -> RoamState {
        self.state
    }

    pub fn sub_state(&self) -> SubState {
        self.sub_state
    }

    /// Leaving `Joining` always clears the sub-state.
    pub fn set_state(&mut self, state: RoamState) {
        if state == self.state {
            return;
        }
        debug!("vdev {}: state {:?} -> {:?}", self.vdev_id, self.state, state);
        if self.state == RoamState::Joining {
            self.set_sub_state(SubState::None);
        }
        self.state = state;
    }

    pub fn set_sub_state(&mut self, sub_state: SubState) {
        if sub_state != self.sub_state {
            debug!("vdev {}: sub-state {:?} -> {:?}", self.vdev_id, self.sub_state, sub_state);
            self.sub_state = sub_state;
        }
    }

    pub fn set_joining(&mut self) {
        self.set_state(RoamState::Joining);
    }

    pub fn set_joined(&mut self) {
        self.set_state(RoamState::Joined);
    }

    pub fn set_idle(&mut self) {
        self.set_state(RoamState::Idle);
    }

    pub fn set_ss_none(&mut self) {
        self.set_sub_state(SubState::None);
    }

    pub fn set_ss_wait_for_key(&mut self) {
        self.set_sub_state(SubState::WaitForKey);
    }

    pub fn is_ss_wait_for_key(&self) -> bool {
        self.sub_state == SubState::WaitForKey
    }

    pub fn set_connected(&mut self, bssid: MacAddr, oper_freq_mhz: u32) {
        self.connected_bssid = Some(bssid);
        self.oper_freq_mhz = oper_freq_mhz;
    }

    pub fn connected_bssid(&self) -> Option<MacAddr> {
        self.connected_bssid
    }

    pub fn is_connected(&self) -> bool {
        self.connected_bssid.is_some()
    }

    pub fn is_24ghz(&self) -> bool {
        is_24ghz_freq(self.oper_freq_mhz)
    }

    /// SAP and P2P-GO sessions stay up after one of their clients leaves.
    pub fn is_ap(&self) -> bool {
        matches!(self.op_mode, OpMode::Sap | OpMode::P2pGo)
    }
}

#[cfg(test)]
mod tests {
    use {super::*, test_case::test_case};

    #[test_case(RoamState::Idle; "to idle")]
    #[test_case(RoamState::Joined; "to joined")]
    #[test_case(RoamState::Stop; "to stop")]
    fn leaving_joining_clears_sub_state(next: RoamState) {
        let mut session = Session::new(1, OpMode::Sta);
        session.set_joining();
        session.set_sub_state(SubState::DisassocReq);
        session.set_state(next);
        assert_eq!(session.state(), next);
        assert_eq!(session.sub_state(), SubState::None);
    }

    #[test]
    fn sub_state_kept_outside_joining() {
        let mut session = Session::new(1, OpMode::Sta);
        session.set_joined();
        session.set_ss_wait_for_key();
        session.set_idle();
        assert!(session.is_ss_wait_for_key());

        // Re-entering the same state is not a transition.
        session.set_joining();
        session.set_sub_state(SubState::DeauthReq);
        session.set_joining();
        assert_eq!(session.sub_state(), SubState::DeauthReq);
    }

    #[test_case(ReasonCode::REASON_INACTIVITY, 1, 0, 0; "inactivity is a kickout")]
    #[test_case(ReasonCode::LEAVING_NETWORK_DEAUTH, 0, 1, 0; "peer deauth")]
    #[test_case(ReasonCode::UNSPECIFIED_REASON, 0, 1, 0; "unspecified")]
    #[test_case(ReasonCode::BEACON_MISSED, 0, 0, 1; "beacon miss")]
    fn deauth_counters(reason_code: ReasonCode, kickout: u32, by_peer: u32, bmiss: u32) {
        let mut stats = DisconnectStats::default();
        assert!(stats.record_deauth(reason_code));
        assert_eq!(stats.peer_kickout, kickout);
        assert_eq!(stats.deauth_by_peer, by_peer);
        assert_eq!(stats.bmiss, bmiss);
        assert_eq!(stats.disconnection_cnt, 1);
    }

    #[test]
    fn untracked_deauth_reason() {
        let mut stats = DisconnectStats::default();
        assert!(!stats.record_deauth(ReasonCode::LEAVING_NETWORK_DISASSOC));
        assert_eq!(stats, DisconnectStats::default());
    }

    #[test]
    fn connection_info() {
        let mut session = Session::new(2, OpMode::Sap);
        assert!(session.is_ap());
        assert!(!session.is_connected());
        session.set_connected([1, 2, 3, 4, 5, 6], 2437);
        assert!(session.is_connected());
        assert!(session.is_24ghz());
        assert_eq!(session.connected_bssid(), Some([1, 2, 3, 4, 5, 6]));
        session.set_connected([1, 2, 3, 4, 5, 6], 5180);
        assert!(!session.is_24ghz());
    }
}
