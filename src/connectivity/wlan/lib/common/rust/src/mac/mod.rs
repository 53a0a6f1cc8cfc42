// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod mgmt;

pub use mgmt::ReasonCode;

pub type MacAddr = [u8; 6];
pub const BCAST_ADDR: MacAddr = [0xFF; 6];

pub fn is_broadcast(addr: &MacAddr) -> bool {
    *addr == BCAST_ADDR
}

/// Frequencies between 2412 and 2484 MHz belong to the 2.4 GHz band.
pub fn is_24ghz_freq(freq_mhz: u32) -> bool {
    (2412..=2484).contains(&freq_mhz)
}
