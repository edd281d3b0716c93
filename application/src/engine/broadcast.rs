//! Single-subscriber sequenced event channel for one session.
//!
//! The publisher side stamps every event with a gapless `seq` starting at
//! 1 and a millisecond timestamp. Events are retained until the subscriber
//! acknowledges them, so a disconnected subscriber can reattach and resume
//! from its last acknowledged sequence number while the session lives.
//!
//! Back-pressure: once the undelivered backlog reaches the configured
//! buffer size, an incoming token event is absorbed into the newest queued
//! token for the same role instead of consuming a new sequence number.
//! Heartbeats, worker finishes and stage events always queue.
//!
//! The channel closes after exactly one terminal event; publishes after
//! that are dropped.

use council_domain::{EventEnvelope, SessionEvent};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

struct ChannelState {
    /// Retained envelopes: delivered-but-unacked plus undelivered.
    events: VecDeque<EventEnvelope>,
    /// Next sequence number to assign.
    next_seq: u64,
    /// Next sequence number to deliver.
    cursor: u64,
    /// Highest acknowledged sequence number.
    acked: u64,
    heartbeat_counter: u64,
    last_activity: Instant,
    closed: bool,
}

struct Inner {
    state: Mutex<ChannelState>,
    notify: Notify,
    capacity: usize,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().expect("event channel lock poisoned")
    }

    fn publish(&self, event: SessionEvent) {
        let mut state = self.lock();
        if state.closed {
            return;
        }

        let backlog = state.next_seq - state.cursor;
        if backlog >= self.capacity as u64 {
            if let Some(newest) = state.events.back_mut() {
                if newest.event.try_coalesce(&event) {
                    state.last_activity = Instant::now();
                    drop(state);
                    self.notify.notify_waiters();
                    return;
                }
            }
        }

        let terminal = event.is_terminal();
        let envelope = EventEnvelope::new(state.next_seq, now_ms(), event);
        state.next_seq += 1;
        state.events.push_back(envelope);
        state.last_activity = Instant::now();
        if terminal {
            state.closed = true;
        }
        drop(state);
        self.notify.notify_waiters();
    }
}

/// Owner handle for one session's event channel.
#[derive(Clone)]
pub struct EventChannel {
    inner: Arc<Inner>,
}

impl EventChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ChannelState {
                    events: VecDeque::new(),
                    next_seq: 1,
                    cursor: 1,
                    acked: 0,
                    heartbeat_counter: 0,
                    last_activity: Instant::now(),
                    closed: false,
                }),
                notify: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn publisher(&self) -> EventPublisher {
        EventPublisher {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Subscribe from the current delivery position.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Reattach after a disconnect: rewind delivery to just past
    /// `last_seq`, clamped to what is still retained.
    pub fn subscribe_from(&self, last_seq: u64) -> EventSubscriber {
        {
            let mut state = self.inner.lock();
            let oldest = state.events.front().map(|e| e.seq).unwrap_or(state.next_seq);
            state.cursor = (last_seq + 1).clamp(oldest, state.next_seq);
        }
        self.subscribe()
    }

    /// True once a terminal event has been published.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Emit a heartbeat whenever no event has been produced for
    /// `interval`. The task ends on its own once the channel closes.
    pub fn spawn_heartbeat(&self, interval: Duration) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let due = {
                    let state = inner.lock();
                    if state.closed {
                        return;
                    }
                    state.last_activity + interval
                };
                tokio::time::sleep_until(due).await;

                let counter = {
                    let mut state = inner.lock();
                    if state.closed {
                        return;
                    }
                    if state.last_activity.elapsed() < interval {
                        continue;
                    }
                    state.heartbeat_counter += 1;
                    state.heartbeat_counter
                };
                inner.publish(SessionEvent::Heartbeat { counter });
            }
        })
    }
}

/// Publishing side, cloned into the stage executor.
#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<Inner>,
}

impl EventPublisher {
    pub fn publish(&self, event: SessionEvent) {
        self.inner.publish(event);
    }
}

/// The (single) consuming side.
pub struct EventSubscriber {
    inner: Arc<Inner>,
}

impl EventSubscriber {
    /// Next envelope, in sequence order. `None` once the terminal event
    /// has been delivered.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.cursor < state.next_seq {
                    let oldest = state
                        .events
                        .front()
                        .map(|e| e.seq)
                        .expect("undelivered events imply a non-empty queue");
                    let index = (state.cursor - oldest) as usize;
                    let envelope = state.events[index].clone();
                    state.cursor += 1;
                    return Some(envelope);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Acknowledge everything up to and including `seq`, releasing it
    /// from the resume buffer.
    pub fn ack(&self, seq: u64) {
        let mut state = self.inner.lock();
        if seq > state.acked {
            state.acked = seq;
        }
        while let Some(front) = state.events.front() {
            if front.seq <= state.acked && front.seq < state.cursor {
                state.events.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use council_domain::Usage;

    fn token(role: &str, text: &str) -> SessionEvent {
        SessionEvent::WorkerToken {
            role: role.into(),
            text: text.into(),
        }
    }

    #[tokio::test]
    async fn seq_is_gapless_from_one() {
        let channel = EventChannel::new(64);
        let publisher = channel.publisher();
        for i in 0..5 {
            publisher.publish(token("draft-1", &format!("t{i}")));
        }
        publisher.publish(SessionEvent::SessionCompleted {
            usage: Usage::default(),
        });

        let mut subscriber = channel.subscribe();
        let mut expected = 1;
        while let Some(envelope) = subscriber.recv().await {
            assert_eq!(envelope.seq, expected);
            expected += 1;
        }
        assert_eq!(expected, 7);
    }

    #[tokio::test]
    async fn tokens_coalesce_only_under_pressure() {
        let channel = EventChannel::new(2);
        let publisher = channel.publisher();
        publisher.publish(token("draft-1", "a"));
        publisher.publish(token("draft-1", "b"));
        // Backlog is now at capacity: this one merges into "b".
        publisher.publish(token("draft-1", "c"));
        // Different role: must not merge even under pressure.
        publisher.publish(token("draft-2", "x"));
        publisher.publish(SessionEvent::SessionCompleted {
            usage: Usage::default(),
        });

        let mut subscriber = channel.subscribe();
        let mut texts = Vec::new();
        while let Some(envelope) = subscriber.recv().await {
            if let SessionEvent::WorkerToken { role, text } = envelope.event {
                texts.push((role, text));
            }
        }
        assert_eq!(
            texts,
            vec![
                ("draft-1".to_string(), "a".to_string()),
                ("draft-1".to_string(), "bc".to_string()),
                ("draft-2".to_string(), "x".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn finish_events_never_coalesce() {
        let channel = EventChannel::new(1);
        let publisher = channel.publisher();
        publisher.publish(token("draft-1", "a"));
        publisher.publish(SessionEvent::WorkerFinished {
            role: "draft-1".into(),
            reason: council_domain::FinishReason::Stop,
            usage: Usage::default(),
        });
        publisher.publish(SessionEvent::SessionCompleted {
            usage: Usage::default(),
        });

        let mut subscriber = channel.subscribe();
        let mut kinds = Vec::new();
        while let Some(envelope) = subscriber.recv().await {
            kinds.push(envelope.event.kind());
        }
        assert_eq!(
            kinds,
            vec!["worker_token", "worker_finished", "session_completed"]
        );
    }

    #[tokio::test]
    async fn publishing_after_terminal_is_dropped() {
        let channel = EventChannel::new(8);
        let publisher = channel.publisher();
        publisher.publish(SessionEvent::SessionFailed {
            code: "stage_failed".into(),
            message: "stage draft failed".into(),
        });
        publisher.publish(token("draft-1", "late"));

        let mut subscriber = channel.subscribe();
        assert_eq!(subscriber.recv().await.unwrap().seq, 1);
        assert!(subscriber.recv().await.is_none());
    }

    #[tokio::test]
    async fn reattach_resumes_from_last_acked() {
        let channel = EventChannel::new(64);
        let publisher = channel.publisher();
        for i in 0..4 {
            publisher.publish(token("draft-1", &format!("t{i}")));
        }

        let mut subscriber = channel.subscribe();
        let first = subscriber.recv().await.unwrap();
        let second = subscriber.recv().await.unwrap();
        subscriber.ack(second.seq);
        drop(subscriber);

        // Reattach from the acked position re-delivers seq 3 and 4.
        let mut resumed = channel.subscribe_from(second.seq);
        assert_eq!(resumed.recv().await.unwrap().seq, 3);
        assert_eq!(resumed.recv().await.unwrap().seq, 4);
        assert_eq!(first.seq, 1);
    }

    #[tokio::test]
    async fn acked_events_are_pruned_but_unacked_are_replayable() {
        let channel = EventChannel::new(64);
        let publisher = channel.publisher();
        for i in 0..3 {
            publisher.publish(token("draft-1", &format!("t{i}")));
        }

        let mut subscriber = channel.subscribe();
        for _ in 0..3 {
            subscriber.recv().await.unwrap();
        }
        subscriber.ack(1);
        drop(subscriber);

        // seq 1 is gone; replay starts at 2 even when asking for earlier.
        let mut resumed = channel.subscribe_from(0);
        assert_eq!(resumed.recv().await.unwrap().seq, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_fire_on_idle_with_increasing_counter() {
        let channel = EventChannel::new(64);
        let _beat = channel.spawn_heartbeat(Duration::from_secs(15));

        tokio::time::sleep(Duration::from_secs(40)).await;

        let publisher = channel.publisher();
        publisher.publish(SessionEvent::SessionCompleted {
            usage: Usage::default(),
        });

        let mut subscriber = channel.subscribe();
        let mut counters = Vec::new();
        while let Some(envelope) = subscriber.recv().await {
            if let SessionEvent::Heartbeat { counter } = envelope.event {
                counters.push(counter);
            }
        }
        assert!(counters.len() >= 2, "expected >=2 heartbeats, got {counters:?}");
        assert!(counters.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn activity_defers_heartbeats() {
        let channel = EventChannel::new(64);
        let _beat = channel.spawn_heartbeat(Duration::from_secs(15));
        let publisher = channel.publisher();

        for _ in 0..4 {
            tokio::time::sleep(Duration::from_secs(10)).await;
            publisher.publish(token("draft-1", "x"));
        }
        publisher.publish(SessionEvent::SessionCompleted {
            usage: Usage::default(),
        });

        let mut subscriber = channel.subscribe();
        while let Some(envelope) = subscriber.recv().await {
            assert_ne!(envelope.event.kind(), "heartbeat");
        }
    }
}
