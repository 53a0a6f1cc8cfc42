// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{config::SmeConfig, FwStatus, RoamStatus, VdevId, WmStatusChangeType},
    num_derive::{FromPrimitive, ToPrimitive},
    std::time::Duration,
    thiserror::Error,
    wlan_common::mac::{MacAddr, ReasonCode},
};

pub type CommandId = u32;

const CMD_ID_MASK: u32 = 0x00FF_FFFF;
const CMD_ID_PREFIX: u32 = 0x0D00_0000;

/// Tags the low 24 bits of a running counter as a station management command id.
pub fn make_cmd_id(counter: u32) -> CommandId {
    (counter & CMD_ID_MASK) | CMD_ID_PREFIX
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoamReason {
    ForcedDisassocSta,
    ForcedDeauthSta,
}

/// What the firmware told us when the peer went away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusChangeIndication {
    pub peer: MacAddr,
    pub bssid: MacAddr,
    pub reason_code: ReasonCode,
    pub status: FwStatus,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Roam { roam_reason: RoamReason, peer: MacAddr, reason_code: ReasonCode },
    WmStatusChange { change_type: WmStatusChangeType, indication: StatusChangeIndication },
    AddTs { tsid: u8 },
    DelTs { tsid: u8 },
    SetHwMode { hw_mode_index: u32 },
    NssUpdate { nss: u8 },
    SetDualMacConfig { scan_config: u32, fw_mode_config: u32 },
    SetAntennaMode { num_rx_chains: u8, num_tx_chains: u8 },
}

/// Serializer command types. The firmware echoes them back in command responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum CommandType {
    ForceDisassocSta = 1,
    ForceDeauthSta = 2,
    WmStatusChange = 3,
    AddTs = 4,
    DelTs = 5,
    SetHwMode = 6,
    NssUpdate = 7,
    SetDualMacConfig = 8,
    SetAntennaMode = 9,
}

impl CommandType {
    pub fn timeout(&self, config: &SmeConfig) -> Duration {
        let millis = match self {
            CommandType::ForceDisassocSta
            | CommandType::ForceDeauthSta
            | CommandType::WmStatusChange => config.peer_disconnect_timeout_ms,
            CommandType::AddTs | CommandType::DelTs => config.add_del_ts_timeout_ms,
            CommandType::SetHwMode
            | CommandType::NssUpdate
            | CommandType::SetDualMacConfig
            | CommandType::SetAntennaMode => config.policy_mgr_timeout_ms,
        };
        let millis = if millis == 0 { config.active_cmd_default_timeout_ms } else { millis };
        Duration::from_millis(millis)
    }
}

impl CommandKind {
    pub fn cmd_type(&self) -> CommandType {
        match self {
            CommandKind::Roam { roam_reason: RoamReason::ForcedDisassocSta, .. } => {
                CommandType::ForceDisassocSta
            }
            CommandKind::Roam { roam_reason: RoamReason::ForcedDeauthSta, .. } => {
                CommandType::ForceDeauthSta
            }
            CommandKind::WmStatusChange { .. } => CommandType::WmStatusChange,
            CommandKind::AddTs { .. } => CommandType::AddTs,
            CommandKind::DelTs { .. } => CommandType::DelTs,
            CommandKind::SetHwMode { .. } => CommandType::SetHwMode,
            CommandKind::NssUpdate { .. } => CommandType::NssUpdate,
            CommandKind::SetDualMacConfig { .. } => CommandType::SetDualMacConfig,
            CommandKind::SetAntennaMode { .. } => CommandType::SetAntennaMode,
        }
    }

    /// The peer a disconnect command removes.
    pub fn peer(&self) -> Option<MacAddr> {
        match self {
            CommandKind::Roam { peer, .. } => Some(*peer),
            CommandKind::WmStatusChange { indication, .. } => Some(indication.peer),
            _ => None,
        }
    }

    pub fn is_disconnect(&self) -> bool {
        self.peer().is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub cmd_id: CommandId,
    pub vdev_id: VdevId,
    pub kind: CommandKind,
    pub high_priority: bool,
    pub timeout: Duration,
}

impl Command {
    pub fn new(cmd_id: CommandId, vdev_id: VdevId, kind: CommandKind, config: &SmeConfig) -> Self {
        let timeout = kind.cmd_type().timeout(config);
        Self { cmd_id, vdev_id, kind, high_priority: false, timeout }
    }

    pub fn high_priority(self) -> Self {
        Self { high_priority: true, ..self }
    }

    pub fn cmd_type(&self) -> CommandType {
        self.kind.cmd_type()
    }

    /// Two disconnects of the same peer on the same vdev. Only one of them may be queued.
    pub fn is_duplicate_of(&self, other: &Command) -> bool {
        self.vdev_id == other.vdev_id
            && self.kind.is_disconnect()
            && self.kind.peer() == other.kind.peer()
    }
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("command timed out")]
    TimedOut,
    #[error("command was cancelled")]
    Cancelled,
    #[error("command failed with status {0:?}")]
    Failed(FwStatus),
}

pub type CommandResult = Result<(), CommandError>;

pub fn roam_status(result: &CommandResult) -> RoamStatus {
    match result {
        Ok(()) => RoamStatus::Success,
        Err(CommandError::TimedOut) => RoamStatus::TimedOut,
        Err(CommandError::Cancelled) => RoamStatus::Cancelled,
        Err(CommandError::Failed(_)) => RoamStatus::Failure,
    }
}
