// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{frame::EndpointId, trailer::CreditReport},
    log::warn,
    parking_lot::Mutex,
    std::{collections::HashMap, sync::Arc},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EndpointCredits {
    credits: u32,
    flow_control: bool,
}

#[derive(Debug)]
struct Inner {
    credit_size: u32,
    unassigned: u32,
    endpoints: HashMap<EndpointId, EndpointCredits>,
}

/// Per-endpoint send credits. Clones share the same balances; every operation runs under one
/// lock so a reservation can never race a credit report.
#[derive(Clone, Debug)]
pub struct CreditTracker {
    inner: Arc<Mutex<Inner>>,
}

impl CreditTracker {
    /// Builds the credit pool the target offered in its ready message.
    pub fn from_ready(credit_count: u16, credit_size: u16) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                credit_size: u32::from(credit_size).max(1),
                unassigned: u32::from(credit_count),
                endpoints: HashMap::new(),
            })),
        }
    }

    pub fn credit_size(&self) -> u32 {
        self.inner.lock().credit_size
    }

    /// Credits the target offered that no endpoint has claimed yet.
    pub fn unassigned(&self) -> u32 {
        self.inner.lock().unassigned
    }

    /// Registers an endpoint and hands it up to `requested` credits from the pool. Returns the
    /// number of credits granted. Endpoints without flow control never run out of credits.
    pub fn add_endpoint(&self, endpoint_id: EndpointId, requested: u32, flow_control: bool) -> u32 {
        let mut inner = self.inner.lock();
        let granted = if flow_control { requested.min(inner.unassigned) } else { 0 };
        inner.unassigned -= granted;
        let previous =
            inner.endpoints.insert(endpoint_id, EndpointCredits { credits: granted, flow_control });
        if let Some(previous) = previous {
            warn!(
                "endpoint {} registered twice; returning its {} credits",
                endpoint_id, previous.credits
            );
            inner.unassigned = inner.unassigned.saturating_add(previous.credits);
        }
        granted
    }

    pub fn remove_endpoint(&self, endpoint_id: EndpointId) {
        let mut inner = self.inner.lock();
        if let Some(ep) = inner.endpoints.remove(&endpoint_id) {
            inner.unassigned = inner.unassigned.saturating_add(ep.credits);
        }
    }

    pub fn credits(&self, endpoint_id: EndpointId) -> u32 {
        self.inner.lock().endpoints.get(&endpoint_id).map(|ep| ep.credits).unwrap_or(0)
    }

    /// Credits needed to send `len` bytes. Every frame costs at least one credit.
    pub fn credits_for_len(&self, len: usize) -> u32 {
        let credit_size = self.inner.lock().credit_size as usize;
        ((len + credit_size - 1) / credit_size).max(1) as u32
    }

    /// Takes `frames` credits from the endpoint if it has that many. Leaves the balance
    /// untouched and returns false otherwise.
    pub fn try_reserve(&self, endpoint_id: EndpointId, frames: u32) -> bool {
        let mut inner = self.inner.lock();
        match inner.endpoints.get_mut(&endpoint_id) {
            Some(ep) if !ep.flow_control => true,
            Some(ep) if ep.credits >= frames => {
                ep.credits -= frames;
                true
            }
            Some(_) => false,
            None => {
                warn!("reserving credits on unknown endpoint {}", endpoint_id);
                false
            }
        }
    }

    pub fn apply_report(&self, endpoint_id: EndpointId, delta: u8) {
        let mut inner = self.inner.lock();
        match inner.endpoints.get_mut(&endpoint_id) {
            Some(ep) => ep.credits = ep.credits.saturating_add(u32::from(delta)),
            None => warn!("credit report of {} for unknown endpoint {}", delta, endpoint_id),
        }
    }

    pub fn apply_reports(&self, reports: &[CreditReport]) {
        for report in reports {
            self.apply_report(report.endpoint_id, report.credits);
        }
    }
}
