// Copyright 2019 The Fuchsia Authors. All rights reserved.
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use {
    futures::{channel::mpsc, FutureExt, Stream, StreamExt},
    std::{
        collections::HashMap,
        time::{Duration, Instant},
    },
};

#[derive(PartialEq, Eq, Hash, Debug, Copy, Clone, PartialOrd, Ord)]
pub struct EventId(u64);

pub type TimeEntry = (Instant, EventId);
pub type TimeStream = mpsc::UnboundedReceiver<TimeEntry>;

pub trait TimeoutDuration {
    fn timeout_duration(&self) -> Duration;
}

/// A timer to schedule and cancel timeouts and retrieve triggered events.
///
/// Scheduling only records the event and posts its deadline to the `TimeStream`. Whoever drains
/// the stream hands the `EventId` back through `triggered` once the deadline passes. A canceled
/// event is forgotten, so a deadline that is already in flight resolves to `None`.
pub struct Timer<E> {
    events: HashMap<EventId, E>,
    scheduler: mpsc::UnboundedSender<TimeEntry>,
    next_id: u64,
}

pub fn create_timer<E>() -> (Timer<E>, TimeStream) {
    let (scheduler, time_stream) = mpsc::unbounded();
    (Timer { events: HashMap::default(), scheduler, next_id: 0 }, time_stream)
}

impl<E> Timer<E> {
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    pub fn schedule_event(&mut self, deadline: Instant, event: E) -> EventId {
        self.next_id += 1;
        let event_id = EventId(self.next_id);
        self.events.insert(event_id, event);
        // A closed time stream only means nobody will ever fire the event.
        let _ = self.scheduler.unbounded_send((deadline, event_id));
        event_id
    }

    pub fn schedule_after(&mut self, duration: Duration, event: E) -> EventId {
        let deadline = self.now() + duration;
        self.schedule_event(deadline, event)
    }

    pub fn schedule<T>(&mut self, event: T) -> EventId
    where
        T: TimeoutDuration + Into<E>,
    {
        let duration = event.timeout_duration();
        self.schedule_after(duration, event.into())
    }

    pub fn cancel_event(&mut self, event_id: EventId) {
        self.events.remove(&event_id);
    }

    pub fn cancel_all(&mut self) {
        self.events.clear();
    }

    pub fn is_scheduled(&self, event_id: &EventId) -> bool {
        self.events.contains_key(event_id)
    }

    pub fn triggered(&mut self, event_id: &EventId) -> Option<E> {
        self.events.remove(event_id)
    }
}

/// Turns scheduled deadlines into a stream of fired event ids, sleeping on the async-io reactor.
pub fn make_async_timed_event_stream(
    time_stream: TimeStream,
) -> impl Stream<Item = EventId> + Unpin {
    time_stream
        .map(|(deadline, event_id)| FutureExt::map(async_io::Timer::at(deadline), move |_| event_id))
        .buffer_unordered(usize::MAX)
}

#[cfg(test)]
mod tests {
    use {super::*, futures::executor::block_on};

    #[derive(PartialEq, Eq, Debug, Clone)]
    struct FooEvent(u8);

    struct BarTimeout;
    impl TimeoutDuration for BarTimeout {
        fn timeout_duration(&self) -> Duration {
            Duration::from_millis(10)
        }
    }
    impl From<BarTimeout> for FooEvent {
        fn from(_: BarTimeout) -> Self {
            FooEvent(42)
        }
    }

    #[test]
    fn schedule_cancel_event() {
        let (mut timer, _time_stream) = create_timer::<FooEvent>();
        let deadline = Instant::now() + Duration::from_nanos(5);

        // Verify event triggers no more than once.
        let event_id = timer.schedule_event(deadline, FooEvent(8));
        assert_eq!(timer.triggered(&event_id), Some(FooEvent(8)));
        assert_eq!(timer.triggered(&event_id), None);

        // Verify event does not trigger if it was canceled.
        let event_id = timer.schedule_event(deadline, FooEvent(9));
        timer.cancel_event(event_id);
        assert_eq!(timer.triggered(&event_id), None);

        // Verify multiple events can be scheduled and canceled.
        let event_id_1 = timer.schedule_event(deadline, FooEvent(8));
        let event_id_2 = timer.schedule_event(deadline, FooEvent(9));
        let event_id_3 = timer.schedule_event(deadline, FooEvent(10));
        timer.cancel_event(event_id_2);
        assert_eq!(timer.triggered(&event_id_2), None);
        assert_eq!(timer.triggered(&event_id_3), Some(FooEvent(10)));
        assert_eq!(timer.triggered(&event_id_1), Some(FooEvent(8)));
    }

    #[test]
    fn cancel_all_events() {
        let (mut timer, _time_stream) = create_timer::<FooEvent>();
        let id_1 = timer.schedule_after(Duration::from_secs(1), FooEvent(1));
        let id_2 = timer.schedule_after(Duration::from_secs(2), FooEvent(2));
        assert!(timer.is_scheduled(&id_1));
        timer.cancel_all();
        assert!(!timer.is_scheduled(&id_1));
        assert_eq!(timer.triggered(&id_2), None);
    }

    #[test]
    fn time_stream_receives_deadlines() {
        let (mut timer, mut time_stream) = create_timer::<FooEvent>();
        let before = Instant::now();
        let event_id = timer.schedule(BarTimeout);
        let (deadline, id) = time_stream.try_next().expect("entry").expect("open stream");
        assert_eq!(id, event_id);
        assert!(deadline >= before + Duration::from_millis(10));
        assert_eq!(timer.triggered(&id), Some(FooEvent(42)));
    }

    #[test]
    fn async_stream_fires_elapsed_deadlines() {
        let (mut timer, time_stream) = create_timer::<FooEvent>();
        let event_id = timer.schedule_event(Instant::now(), FooEvent(1));
        let mut fired = make_async_timed_event_stream(time_stream);
        assert_eq!(block_on(fired.next()), Some(event_id));
    }
}
