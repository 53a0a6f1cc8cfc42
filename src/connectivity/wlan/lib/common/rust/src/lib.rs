// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Crate wlan-common hosts common libraries
//! to be used for WLAN SME, HTC, and their tests.

pub mod format;
pub mod mac;
pub mod sink;
pub mod timer;

/// Asserts that `$test` matches the given pattern and evaluates to `$e` on a match.
/// Panics with the actual value otherwise.
#[macro_export]
macro_rules! assert_variant {
    ($test:expr, $variant:pat => $e:expr, $fmt:expr $(, $args:tt)* $(,)?) => {
        match $test {
            $variant => $e,
            other => panic!("unexpected variant: {:?}; {}", other, format!($fmt $(, $args)*)),
        }
    };
    ($test:expr, $variant:pat => $e:expr $(,)?) => {
        match $test {
            $variant => $e,
            other => panic!("unexpected variant: {:?}", other),
        }
    };
    ($test:expr, $variant:pat $(,)?) => {
        $crate::assert_variant!($test, $variant => {})
    };
}
