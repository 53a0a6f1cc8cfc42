// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    crate::{
        command::{Command, CommandError, CommandId, CommandResult},
        VdevId,
    },
    log::{debug, error, info},
    std::collections::{HashMap, VecDeque},
    thiserror::Error,
    wlan_common::{
        format::MacFmt,
        timer::{EventId, Timer},
    },
};

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueError {
    #[error("an equivalent disconnect is already queued")]
    DuplicateAlreadyActive,
    #[error("vdev {0} has no session")]
    SessionNotFound(VdevId),
    #[error("command {0:#010x} is not active")]
    NotActive(CommandId),
    #[error("command {0:#010x} is not pending")]
    NotPending(CommandId),
}

/// Fires when an active command has been running for its timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandTimeout {
    pub vdev_id: VdevId,
    pub cmd_id: CommandId,
}

/// Proof of an enqueued command. Completing a command consumes its handle, so a command can
/// be completed at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct CommandHandle {
    vdev_id: VdevId,
    cmd_id: CommandId,
}

impl CommandHandle {
    pub fn vdev_id(&self) -> VdevId {
        self.vdev_id
    }

    pub fn cmd_id(&self) -> CommandId {
        self.cmd_id
    }
}

struct ActiveCommand {
    cmd: Command,
    timeout_id: EventId,
}

#[derive(Default)]
struct VdevQueue {
    pending: VecDeque<Command>,
    active: Option<ActiveCommand>,
}

impl VdevQueue {
    fn commands(&self) -> impl Iterator<Item = &Command> {
        self.active.iter().map(|active| &active.cmd).chain(self.pending.iter())
    }
}

/// Pending and active command lists per vdev. At most one command per vdev is active and
/// pending commands are activated in order.
#[derive(Default)]
pub struct Serializer {
    queues: HashMap<VdevId, VdevQueue>,
}

impl Serializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vdev(&mut self, vdev_id: VdevId) {
        self.queues.entry(vdev_id).or_default();
    }

    /// Forgets the vdev. Commands still queued for it are dropped without completion, so purge
    /// the vdev first.
    pub fn remove_vdev(&mut self, vdev_id: VdevId) -> bool {
        self.queues.remove(&vdev_id).is_some()
    }

    /// Whether an active or pending command of the vdev already covers `cmd`.
    pub fn has_duplicate(&self, cmd: &Command) -> bool {
        self.queues
            .get(&cmd.vdev_id)
            .map(|queue| queue.commands().any(|existing| cmd.is_duplicate_of(existing)))
            .unwrap_or(false)
    }

    pub fn enqueue(&mut self, cmd: Command) -> Result<CommandHandle, QueueError> {
        let queue =
            self.queues.get_mut(&cmd.vdev_id).ok_or(QueueError::SessionNotFound(cmd.vdev_id))?;
        if let Some(existing) = queue.commands().find(|existing| cmd.is_duplicate_of(existing)) {
            info!(
                "vdev {}: {:?} for {} dropped, {:?} already queued",
                cmd.vdev_id,
                cmd.cmd_type(),
                cmd.kind.peer().unwrap_or_default().to_mac_str(),
                existing.cmd_type()
            );
            return Err(QueueError::DuplicateAlreadyActive);
        }
        let handle = CommandHandle { vdev_id: cmd.vdev_id, cmd_id: cmd.cmd_id };
        debug!("vdev {}: queued {:?} {:#010x}", cmd.vdev_id, cmd.cmd_type(), cmd.cmd_id);
        if cmd.high_priority {
            queue.pending.push_front(cmd);
        } else {
            queue.pending.push_back(cmd);
        }
        Ok(handle)
    }

    /// Makes the next pending command of the vdev active unless one already is, and arms its
    /// timeout.
    pub fn activate_next<E>(&mut self, vdev_id: VdevId, timer: &mut Timer<E>) -> Option<Command>
    where
        E: From<CommandTimeout>,
    {
        let queue = self.queues.get_mut(&vdev_id)?;
        if queue.active.is_some() {
            return None;
        }
        let cmd = queue.pending.pop_front()?;
        let timeout = CommandTimeout { vdev_id, cmd_id: cmd.cmd_id };
        let timeout_id = timer.schedule_after(cmd.timeout, timeout.into());
        debug!("vdev {}: activated {:?} {:#010x}", vdev_id, cmd.cmd_type(), cmd.cmd_id);
        queue.active = Some(ActiveCommand { cmd: cmd.clone(), timeout_id });
        Some(cmd)
    }

    pub fn complete_active<E>(
        &mut self,
        handle: CommandHandle,
        result: &CommandResult,
        timer: &mut Timer<E>,
    ) -> Result<Command, QueueError> {
        let queue = match self.queues.get_mut(&handle.vdev_id) {
            Some(queue) => queue,
            None => return Err(QueueError::SessionNotFound(handle.vdev_id)),
        };
        match queue.active.take() {
            Some(active) if active.cmd.cmd_id == handle.cmd_id => {
                timer.cancel_event(active.timeout_id);
                debug!(
                    "vdev {}: completed {:?} {:#010x}: {:?}",
                    handle.vdev_id,
                    active.cmd.cmd_type(),
                    handle.cmd_id,
                    result
                );
                Ok(active.cmd)
            }
            other => {
                queue.active = other;
                error!(
                    "vdev {}: completing inactive command {:#010x}",
                    handle.vdev_id, handle.cmd_id
                );
                Err(QueueError::NotActive(handle.cmd_id))
            }
        }
    }

    /// Force-completes the active command the timeout was armed for. A timeout that lost the
    /// race against a completion is ignored.
    pub fn handle_timeout(
        &mut self,
        event_id: EventId,
        timeout: CommandTimeout,
    ) -> Option<(Command, CommandResult)> {
        let queue = self.queues.get_mut(&timeout.vdev_id)?;
        let armed = matches!(
            &queue.active,
            Some(active) if active.cmd.cmd_id == timeout.cmd_id && active.timeout_id == event_id
        );
        if !armed {
            debug!("vdev {}: stale timeout for {:#010x}", timeout.vdev_id, timeout.cmd_id);
            return None;
        }
        let active = queue.active.take()?;
        info!(
            "vdev {}: {:?} {:#010x} timed out",
            timeout.vdev_id,
            active.cmd.cmd_type(),
            timeout.cmd_id
        );
        Some((active.cmd, Err(CommandError::TimedOut)))
    }

    /// Removes a command that has not started yet.
    pub fn cancel_pending(&mut self, handle: &CommandHandle) -> Result<Command, QueueError> {
        let queue =
            self.queues.get_mut(&handle.vdev_id).ok_or(QueueError::SessionNotFound(
                handle.vdev_id,
            ))?;
        match queue.pending.iter().position(|cmd| cmd.cmd_id == handle.cmd_id) {
            Some(index) => queue.pending.remove(index).ok_or(QueueError::NotPending(handle.cmd_id)),
            None => Err(QueueError::NotPending(handle.cmd_id)),
        }
    }

    /// Flushes the vdev: the active command first, then every pending one in order, all
    /// completed as cancelled.
    pub fn purge_vdev<E>(
        &mut self,
        vdev_id: VdevId,
        timer: &mut Timer<E>,
    ) -> Vec<(Command, CommandResult)> {
        let queue = match self.queues.get_mut(&vdev_id) {
            Some(queue) => queue,
            None => return vec![],
        };
        let mut purged = vec![];
        if let Some(active) = queue.active.take() {
            timer.cancel_event(active.timeout_id);
            purged.push(active.cmd);
        }
        purged.extend(queue.pending.drain(..));
        if !purged.is_empty() {
            info!("vdev {}: purged {} commands", vdev_id, purged.len());
        }
        purged.into_iter().map(|cmd| (cmd, Err(CommandError::Cancelled))).collect()
    }

    pub fn active(&self, vdev_id: VdevId) -> Option<&Command> {
        self.queues.get(&vdev_id)?.active.as_ref().map(|active| &active.cmd)
    }

    pub fn find_active<F>(&self, vdev_id: VdevId, filter: F) -> Option<&Command>
    where
        F: Fn(&Command) -> bool,
    {
        self.active(vdev_id).filter(|cmd| filter(cmd))
    }

    pub fn pending_count(&self, vdev_id: VdevId) -> usize {
        self.queues.get(&vdev_id).map(|queue| queue.pending.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            command::{make_cmd_id, CommandKind, RoamReason, StatusChangeIndication},
            config::SmeConfig,
            FwStatus, WmStatusChangeType,
        },
        std::time::Duration,
        wlan_common::{
            assert_variant,
            mac::{MacAddr, ReasonCode},
            timer::{create_timer, TimeStream},
        },
    };

    const PEER_A: MacAddr = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
    const PEER_B: MacAddr = [0x00, 0x11, 0x22, 0x33, 0x44, 0x66];

    #[derive(Debug, PartialEq)]
    struct Timeout(CommandTimeout);
    impl From<CommandTimeout> for Timeout {
        fn from(timeout: CommandTimeout) -> Self {
            Timeout(timeout)
        }
    }

    fn roam(id: u32, vdev_id: VdevId, roam_reason: RoamReason, peer: MacAddr) -> Command {
        let kind =
            CommandKind::Roam { roam_reason, peer, reason_code: ReasonCode::LEAVING_NETWORK_DEAUTH };
        Command::new(make_cmd_id(id), vdev_id, kind, &SmeConfig::default())
    }

    fn wm_status_change(id: u32, vdev_id: VdevId, peer: MacAddr) -> Command {
        let kind = CommandKind::WmStatusChange {
            change_type: WmStatusChangeType::Disassociated,
            indication: StatusChangeIndication {
                peer,
                bssid: peer,
                reason_code: ReasonCode::LEAVING_NETWORK_DISASSOC,
                status: FwStatus::SUCCESS,
            },
        };
        Command::new(make_cmd_id(id), vdev_id, kind, &SmeConfig::default())
    }

    fn add_ts(id: u32, vdev_id: VdevId) -> Command {
        Command::new(make_cmd_id(id), vdev_id, CommandKind::AddTs { tsid: 3 }, &SmeConfig::default())
    }

    fn setup() -> (Serializer, Timer<Timeout>, TimeStream) {
        let (timer, time_stream) = create_timer();
        let mut serializer = Serializer::new();
        serializer.add_vdev(1);
        serializer.add_vdev(3);
        (serializer, timer, time_stream)
    }

    #[test]
    fn enqueue_unknown_vdev() {
        let (mut serializer, _timer, _time_stream) = setup();
        assert_eq!(serializer.enqueue(add_ts(1, 9)), Err(QueueError::SessionNotFound(9)));
    }

    #[test]
    fn fifo_activation_per_vdev() {
        let (mut serializer, mut timer, _time_stream) = setup();
        let first = serializer.enqueue(add_ts(1, 1)).expect("enqueue first");
        let _second = serializer.enqueue(add_ts(2, 1)).expect("enqueue second");
        let _other = serializer.enqueue(add_ts(3, 3)).expect("enqueue other vdev");

        let cmd = serializer.activate_next(1, &mut timer).expect("first command");
        assert_eq!(cmd.cmd_id, make_cmd_id(1));
        // Only one active command per vdev.
        assert_eq!(serializer.activate_next(1, &mut timer), None);
        // Other vdevs are independent.
        assert_eq!(serializer.activate_next(3, &mut timer).map(|c| c.cmd_id), Some(make_cmd_id(3)));

        serializer.complete_active(first, &Ok(()), &mut timer).expect("complete first");
        let cmd = serializer.activate_next(1, &mut timer).expect("second command");
        assert_eq!(cmd.cmd_id, make_cmd_id(2));
        assert_eq!(serializer.pending_count(1), 0);
    }

    #[test]
    fn high_priority_goes_first() {
        let (mut serializer, mut timer, _time_stream) = setup();
        serializer.enqueue(add_ts(1, 1)).expect("enqueue");
        serializer.enqueue(add_ts(2, 1).high_priority()).expect("enqueue high priority");
        let cmd = serializer.activate_next(1, &mut timer).expect("command");
        assert_eq!(cmd.cmd_id, make_cmd_id(2));
    }

    #[test]
    fn at_most_one_disconnect_per_peer() {
        let (mut serializer, mut timer, _time_stream) = setup();
        serializer
            .enqueue(roam(1, 1, RoamReason::ForcedDisassocSta, PEER_A))
            .expect("enqueue disassoc");
        serializer.activate_next(1, &mut timer).expect("active disassoc");

        assert_eq!(
            serializer.enqueue(roam(2, 1, RoamReason::ForcedDeauthSta, PEER_A)),
            Err(QueueError::DuplicateAlreadyActive)
        );
        assert_eq!(
            serializer.enqueue(wm_status_change(3, 1, PEER_A)),
            Err(QueueError::DuplicateAlreadyActive)
        );
        let active_for_peer = serializer
            .find_active(1, |cmd| cmd.kind.peer() == Some(PEER_A))
            .into_iter()
            .count();
        assert_eq!(active_for_peer, 1);
        assert_eq!(serializer.pending_count(1), 0);

        // Other peers and other vdevs are not duplicates.
        serializer.enqueue(roam(4, 1, RoamReason::ForcedDeauthSta, PEER_B)).expect("other peer");
        serializer.enqueue(roam(5, 3, RoamReason::ForcedDeauthSta, PEER_A)).expect("other vdev");
    }

    #[test]
    fn duplicate_of_pending_command() {
        let (mut serializer, _timer, _time_stream) = setup();
        serializer.enqueue(wm_status_change(1, 1, PEER_A)).expect("enqueue");
        assert_eq!(
            serializer.enqueue(roam(2, 1, RoamReason::ForcedDeauthSta, PEER_A)),
            Err(QueueError::DuplicateAlreadyActive)
        );
        assert_eq!(serializer.pending_count(1), 1);
    }

    #[test]
    fn complete_inactive_command() {
        let (mut serializer, mut timer, _time_stream) = setup();
        let first = serializer.enqueue(add_ts(1, 1)).expect("enqueue first");
        let second = serializer.enqueue(add_ts(2, 1)).expect("enqueue second");
        serializer.activate_next(1, &mut timer).expect("active");

        assert_eq!(
            serializer.complete_active(second, &Ok(()), &mut timer),
            Err(QueueError::NotActive(make_cmd_id(2)))
        );
        // The active command is untouched.
        assert_eq!(serializer.active(1).map(|c| c.cmd_id), Some(make_cmd_id(1)));
        serializer.complete_active(first, &Ok(()), &mut timer).expect("complete first");
        assert_eq!(serializer.active(1), None);
    }

    #[test]
    fn timeout_force_completes_and_next_activates() {
        let (mut serializer, mut timer, mut time_stream) = setup();
        let _first = serializer.enqueue(add_ts(1, 1)).expect("enqueue first");
        serializer.enqueue(add_ts(2, 1)).expect("enqueue second");
        let cmd = serializer.activate_next(1, &mut timer).expect("active");

        let (deadline, event_id) =
            time_stream.try_next().expect("timeout scheduled").expect("open stream");
        assert!(deadline >= timer.now() + cmd.timeout - Duration::from_secs(1));
        let timeout = assert_variant!(timer.triggered(&event_id), Some(Timeout(t)) => t);
        assert_eq!(timeout, CommandTimeout { vdev_id: 1, cmd_id: make_cmd_id(1) });

        let (timed_out, result) =
            serializer.handle_timeout(event_id, timeout).expect("command timed out");
        assert_eq!(timed_out.cmd_id, make_cmd_id(1));
        assert_eq!(result, Err(CommandError::TimedOut));
        assert_eq!(serializer.active(1), None);

        let next = serializer.activate_next(1, &mut timer).expect("next command");
        assert_eq!(next.cmd_id, make_cmd_id(2));
    }

    #[test]
    fn stale_timeout_ignored() {
        let (mut serializer, mut timer, mut time_stream) = setup();
        let first = serializer.enqueue(add_ts(1, 1)).expect("enqueue first");
        serializer.enqueue(add_ts(2, 1)).expect("enqueue second");
        serializer.activate_next(1, &mut timer).expect("active");
        let (_, first_timeout) = time_stream.try_next().expect("scheduled").expect("open stream");

        serializer.complete_active(first, &Ok(()), &mut timer).expect("complete");
        assert!(!timer.is_scheduled(&first_timeout));
        serializer.activate_next(1, &mut timer).expect("second active");

        let stale = CommandTimeout { vdev_id: 1, cmd_id: make_cmd_id(1) };
        assert_eq!(serializer.handle_timeout(first_timeout, stale), None);
        assert_eq!(serializer.active(1).map(|c| c.cmd_id), Some(make_cmd_id(2)));
    }

    #[test]
    fn cancel_pending_command() {
        let (mut serializer, mut timer, _time_stream) = setup();
        let first = serializer.enqueue(add_ts(1, 1)).expect("enqueue first");
        let second = serializer.enqueue(add_ts(2, 1)).expect("enqueue second");
        serializer.activate_next(1, &mut timer).expect("active");

        assert_eq!(serializer.cancel_pending(&first), Err(QueueError::NotPending(make_cmd_id(1))));
        let cancelled = serializer.cancel_pending(&second).expect("cancel pending");
        assert_eq!(cancelled.cmd_id, make_cmd_id(2));
        assert_eq!(serializer.pending_count(1), 0);
        assert_eq!(serializer.cancel_pending(&second), Err(QueueError::NotPending(make_cmd_id(2))));
    }

    #[test]
    fn purge_cancels_everything() {
        let (mut serializer, mut timer, mut time_stream) = setup();
        serializer.enqueue(add_ts(1, 1)).expect("enqueue first");
        serializer.enqueue(add_ts(2, 1)).expect("enqueue second");
        serializer.enqueue(add_ts(3, 3)).expect("enqueue other vdev");
        serializer.activate_next(1, &mut timer).expect("active");
        let (_, timeout_id) = time_stream.try_next().expect("scheduled").expect("open stream");

        let purged = serializer.purge_vdev(1, &mut timer);
        let ids: Vec<_> = purged.iter().map(|(cmd, _)| cmd.cmd_id).collect();
        assert_eq!(ids, vec![make_cmd_id(1), make_cmd_id(2)]);
        assert!(purged.iter().all(|(_, result)| *result == Err(CommandError::Cancelled)));
        assert!(!timer.is_scheduled(&timeout_id));
        assert_eq!(serializer.active(1), None);
        assert_eq!(serializer.pending_count(1), 0);
        assert_eq!(serializer.pending_count(3), 1);

        assert!(serializer.remove_vdev(1));
        assert!(serializer.purge_vdev(1, &mut timer).is_empty());
    }
}
