// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Station management for the roam command processor.
//!
//! Disconnects, key installs and policy commands are queued per vdev in the serializer and run
//! one at a time by the CSR state machine. Requests for the firmware leave through an
//! `FwSink`, results for the upper layer through a `RoamEventSink`.

pub mod command;
pub mod config;
pub mod csr;
pub mod fw_msg;
pub mod serialization;
pub mod serve;
#[cfg(test)]
pub mod test_utils;

use {
    futures::channel::mpsc,
    num_derive::{FromPrimitive, ToPrimitive},
    thiserror::Error,
    wlan_common::{
        mac::{MacAddr, ReasonCode},
        sink::UnboundedSink,
    },
};

pub use crate::{
    command::{CommandId, CommandType},
    config::SmeConfig,
    csr::{AuthenticationResult, Csr, OpMode, RoamResult, RoamState, SubState},
};

pub type VdevId = u8;

/// Status reported by the firmware. Zero is success.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct FwStatus(pub u16);

impl FwStatus {
    pub const SUCCESS: Self = Self(0);
    pub const FAILURE: Self = Self(1);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl From<u16> for FwStatus {
    fn from(status: u16) -> Self {
        Self(status)
    }
}

/// Link statistics of a peer, fetched right before it is removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PeerStats {
    pub rssi: i8,
    pub tx_rate: u32,
    pub rx_rate: u32,
    pub rx_mc_bc_cnt: u32,
    pub rx_retry_cnt: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoamStatus {
    Success,
    Failure,
    TimedOut,
    Cancelled,
    StaNotAssociated,
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyInstallError {
    #[error("key install failed with status {0:?}")]
    Failed(FwStatus),
}

/// Notifications for the upper layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoamEvent {
    DisconnectComplete {
        vdev_id: VdevId,
        peer: MacAddr,
        status: RoamStatus,
        stats: PeerStats,
    },
    LostLink {
        vdev_id: VdevId,
        peer: MacAddr,
        result: RoamResult,
        status: RoamStatus,
        reason_code: ReasonCode,
        stats: PeerStats,
    },
    SetKeyComplete {
        vdev_id: VdevId,
        peer: MacAddr,
        result: AuthenticationResult,
    },
    QosSetKeyDone {
        vdev_id: VdevId,
    },
    WaitForKeyTimeout {
        vdev_id: VdevId,
    },
    CommandComplete {
        vdev_id: VdevId,
        cmd_id: CommandId,
        cmd_type: CommandType,
        status: RoamStatus,
    },
    SessionClosed {
        vdev_id: VdevId,
    },
}

/// Requests for the firmware. They are framed on the firmware message endpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FwRequest {
    GetPeerStats { request_id: u32, vdev_id: VdevId, peer: MacAddr },
    DisassocReq { vdev_id: VdevId, peer: MacAddr, reason_code: ReasonCode },
    DeauthReq { vdev_id: VdevId, peer: MacAddr, reason_code: ReasonCode },
    DisassocCnf { vdev_id: VdevId, peer: MacAddr, status: FwStatus },
    DeauthCnf { vdev_id: VdevId, peer: MacAddr, status: FwStatus },
    RoamScanControl { vdev_id: VdevId, enable: bool },
    ObssScanInd { vdev_id: VdevId, bssid: MacAddr },
    AddTs { vdev_id: VdevId, tsid: u8 },
    DelTs { vdev_id: VdevId, tsid: u8 },
    SetHwMode { vdev_id: VdevId, hw_mode_index: u32 },
    NssUpdate { vdev_id: VdevId, nss: u8 },
    SetDualMacConfig { vdev_id: VdevId, scan_config: u32, fw_mode_config: u32 },
    SetAntennaMode { vdev_id: VdevId, num_rx_chains: u8, num_tx_chains: u8 },
}

/// Responses and indications from the firmware.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FwEvent {
    PeerStats { request_id: u32, vdev_id: VdevId, peer: MacAddr, stats: PeerStats },
    DisassocRsp { vdev_id: VdevId, peer: MacAddr, status: FwStatus },
    DeauthRsp { vdev_id: VdevId, peer: MacAddr, status: FwStatus },
    DisassocInd { vdev_id: VdevId, peer: MacAddr, bssid: MacAddr, reason_code: ReasonCode },
    DeauthInd { vdev_id: VdevId, peer: MacAddr, bssid: MacAddr, reason_code: ReasonCode },
    DisconnectDoneInd { vdev_id: VdevId, peer: MacAddr, reason_code: ReasonCode },
    SetKeyRsp { vdev_id: VdevId, peer: MacAddr, status: FwStatus },
    CommandRsp { vdev_id: VdevId, cmd_type: CommandType, status: FwStatus },
}

/// Requests from the upper layer, handled by the serve loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SmeRequest {
    OpenSession { vdev_id: VdevId, op_mode: OpMode },
    CloseSession { vdev_id: VdevId },
    SetConnected { vdev_id: VdevId, bssid: MacAddr, oper_freq_mhz: u32 },
    Disassociate { vdev_id: VdevId, peer: MacAddr, reason_code: ReasonCode },
    Deauthenticate { vdev_id: VdevId, peer: MacAddr, reason_code: ReasonCode },
    WaitForKey { vdev_id: VdevId },
    Command { vdev_id: VdevId, kind: command::CommandKind },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum WmStatusChangeType {
    Disassociated = 1,
    Deauthenticated = 2,
}

pub type FwSink = UnboundedSink<FwRequest>;
pub type FwRequestStream = mpsc::UnboundedReceiver<FwRequest>;
pub type FwEventStream = mpsc::UnboundedReceiver<FwEvent>;
pub type RoamEventSink = UnboundedSink<RoamEvent>;
pub type RoamEventStream = mpsc::UnboundedReceiver<RoamEvent>;
pub type SmeRequestStream = mpsc::UnboundedReceiver<SmeRequest>;
