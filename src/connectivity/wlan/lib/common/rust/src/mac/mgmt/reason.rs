// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use zerocopy::{AsBytes, FromBytes};

#[repr(C)]
#[derive(AsBytes, FromBytes, PartialEq, Eq, Hash, Clone, Copy, Debug, Default)]
pub struct ReasonCode(pub u16);

/// IEEE Std 802.11-2016, 9.4.1.7
impl ReasonCode {
    // 0 Reserved
    pub const UNSPECIFIED_REASON: Self = Self(1);
    pub const INVALID_AUTHENTICATION: Self = Self(2);
    pub const LEAVING_NETWORK_DEAUTH: Self = Self(3);
    pub const REASON_INACTIVITY: Self = Self(4);
    pub const NO_MORE_STAS: Self = Self(5);
    pub const INVALID_CLASS2FRAME: Self = Self(6);
    pub const INVALID_CLASS3FRAME: Self = Self(7);
    pub const LEAVING_NETWORK_DISASSOC: Self = Self(8);
    pub const NOT_AUTHENTICATED: Self = Self(9);
    pub const UNACCEPTABLE_POWER_CAPABILITY: Self = Self(10);
    pub const UNACCEPTABLE_SUPPORTED_CHANNELS: Self = Self(11);
    pub const BSS_TRANSITION_DISASSOC: Self = Self(12);
    pub const REASON_INVALID_ELEMENT: Self = Self(13);
    pub const MIC_FAILURE: Self = Self(14);
    pub const FOURWAY_HANDSHAKE_TIMEOUT: Self = Self(15);
    pub const GK_HANDSHAKE_TIMEOUT: Self = Self(16);
    // 17-65515 not used by the driver.

    /// Driver-internal codes above the IEEE range. The firmware reports a lost link with these.
    pub const KEY_TIMEOUT: Self = Self(65526);
    pub const PEER_INACTIVITY: Self = Self(65530);
    pub const BEACON_MISSED: Self = Self(65533);
    pub const HOST_TRIGGERED_SILENT_DEAUTH: Self = Self(65535);

    /// Reasons a peer gives when it tears down our authentication.
    pub fn is_peer_deauth(self) -> bool {
        matches!(
            self,
            Self::UNSPECIFIED_REASON
                | Self::INVALID_AUTHENTICATION
                | Self::LEAVING_NETWORK_DEAUTH
                | Self::INVALID_CLASS2FRAME
                | Self::INVALID_CLASS3FRAME
                | Self::NOT_AUTHENTICATED
        )
    }
}

impl From<u16> for ReasonCode {
    fn from(code: u16) -> Self {
        Self(code)
    }
}
