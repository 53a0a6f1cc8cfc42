// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{serialization::CommandTimeout, VdevId},
    std::time::Duration,
    wlan_common::timer::TimeoutDuration,
};

#[derive(Debug, Clone)]
pub enum Event {
    CommandTimeout(CommandTimeout),
    DisconnectStatsTimeout(DisconnectStatsTimeout),
    WaitForKeyTimeout(WaitForKeyTimeout),
}
impl From<CommandTimeout> for Event {
    fn from(timeout: CommandTimeout) -> Self {
        Event::CommandTimeout(timeout)
    }
}
impl From<DisconnectStatsTimeout> for Event {
    fn from(timeout: DisconnectStatsTimeout) -> Self {
        Event::DisconnectStatsTimeout(timeout)
    }
}
impl From<WaitForKeyTimeout> for Event {
    fn from(timeout: WaitForKeyTimeout) -> Self {
        Event::WaitForKeyTimeout(timeout)
    }
}

#[derive(Debug, Clone)]
pub struct DisconnectStatsTimeout {
    pub request_id: u32,
    pub timeout: Duration,
}
impl TimeoutDuration for DisconnectStatsTimeout {
    fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}

#[derive(Debug, Clone)]
pub struct WaitForKeyTimeout {
    pub vdev_id: VdevId,
    pub timeout: Duration,
}
impl TimeoutDuration for WaitForKeyTimeout {
    fn timeout_duration(&self) -> Duration {
        self.timeout
    }
}
