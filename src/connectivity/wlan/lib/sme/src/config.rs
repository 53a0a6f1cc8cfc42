// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    anyhow::{Context as _, Error},
    serde::Deserialize,
    std::time::Duration,
};

/// HTC service carrying firmware messages.
pub const DEFAULT_FW_MSG_SERVICE_ID: u16 = wlan_htc::control::WMI_CONTROL_SVC;

/// Timeouts and feature switches of the station management layer. All durations are in
/// milliseconds. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SmeConfig {
    pub peer_disconnect_timeout_ms: u64,
    pub add_del_ts_timeout_ms: u64,
    pub policy_mgr_timeout_ms: u64,
    /// Used by command types whose own timeout is configured as zero.
    pub active_cmd_default_timeout_ms: u64,
    pub disconnect_stats_timeout_ms: u64,
    pub wait_for_key_timeout_ms: u64,
    pub obss_scan_offload: bool,
    pub fw_msg_service_id: u16,
}

impl Default for SmeConfig {
    fn default() -> Self {
        Self {
            peer_disconnect_timeout_ms: 4000,
            add_del_ts_timeout_ms: 4000,
            policy_mgr_timeout_ms: 5000,
            active_cmd_default_timeout_ms: 30000,
            disconnect_stats_timeout_ms: 200,
            wait_for_key_timeout_ms: 5000,
            obss_scan_offload: false,
            fw_msg_service_id: DEFAULT_FW_MSG_SERVICE_ID,
        }
    }
}

impl SmeConfig {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).context("malformed SME config")
    }

    pub fn disconnect_stats_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_stats_timeout_ms)
    }

    pub fn wait_for_key_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_for_key_timeout_ms)
    }
}
