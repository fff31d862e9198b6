// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! The shared timeline that schedulers fire against and the UI poller samples.

use parking_lot::Mutex;
use tokio::{sync::watch, time::Instant};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Started,
    Paused,
}

/// What registered schedulers observe on the transport's channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransportEvent {
    pub state: TransportState,
    /// Bumped whenever the position jumps (stop or seek).
    pub repositions: u64,
    /// Bumped by [Transport::cancel].
    pub cancels: u64,
}

struct Clock {
    state: TransportState,
    /// Position at the moment of the last start, pause, or seek.
    position: f64,
    /// When the clock last started running. None unless started.
    started_at: Option<Instant>,
}

impl Clock {
    fn seconds(&self) -> f64 {
        match self.started_at {
            Some(started_at) => self.position + started_at.elapsed().as_secs_f64(),
            None => self.position,
        }
    }
}

/// A monotonic seconds counter with start, pause, stop, and seek. Loop boundaries are imposed
/// by the scheduler, not the clock.
pub struct Transport {
    clock: Mutex<Clock>,
    events: watch::Sender<TransportEvent>,
}

impl Transport {
    pub fn new() -> Transport {
        // Only subscribers count as registrations, so the initial receiver is dropped.
        let (events, _) = watch::channel(TransportEvent {
            state: TransportState::Stopped,
            repositions: 0,
            cancels: 0,
        });
        Transport {
            clock: Mutex::new(Clock {
                state: TransportState::Stopped,
                position: 0.0,
                started_at: None,
            }),
            events,
        }
    }

    /// Starts the clock from its current position. Has no effect if already started.
    pub fn start(&self) {
        let mut clock = self.clock.lock();
        if clock.state == TransportState::Started {
            return;
        }
        clock.state = TransportState::Started;
        clock.started_at = Some(Instant::now());
        debug!(position = clock.position, "Transport started.");
        self.publish(|event| event.state = TransportState::Started);
    }

    /// Freezes the clock at its current position.
    pub fn pause(&self) {
        let mut clock = self.clock.lock();
        if clock.state != TransportState::Started {
            return;
        }
        clock.position = clock.seconds();
        clock.started_at = None;
        clock.state = TransportState::Paused;
        debug!(position = clock.position, "Transport paused.");
        self.publish(|event| event.state = TransportState::Paused);
    }

    /// Stops the clock and rewinds it to zero.
    pub fn stop(&self) {
        let mut clock = self.clock.lock();
        clock.state = TransportState::Stopped;
        clock.position = 0.0;
        clock.started_at = None;
        debug!("Transport stopped.");
        self.publish(|event| {
            event.state = TransportState::Stopped;
            event.repositions += 1;
        });
    }

    /// Moves the clock to the given position, keeping it running if it was.
    pub fn set_seconds(&self, seconds: f64) {
        let mut clock = self.clock.lock();
        clock.position = seconds;
        if clock.started_at.is_some() {
            clock.started_at = Some(Instant::now());
        }
        debug!(position = seconds, "Transport repositioned.");
        self.publish(|event| event.repositions += 1);
    }

    /// Cancels everything scheduled against the transport. Registered fire loops end.
    pub fn cancel(&self) {
        let _clock = self.clock.lock();
        self.publish(|event| event.cancels += 1);
    }

    /// The current position in seconds.
    pub fn seconds(&self) -> f64 {
        self.clock.lock().seconds()
    }

    pub fn state(&self) -> TransportState {
        self.clock.lock().state
    }

    /// Registers with the transport. The registration lasts as long as the receiver.
    pub fn subscribe(&self) -> watch::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    /// The number of live registrations.
    pub fn registrations(&self) -> usize {
        self.events.receiver_count()
    }

    /// Publishes a change while the clock lock is held so observers never see events out of
    /// order with the clock itself.
    fn publish(&self, modify: impl FnOnce(&mut TransportEvent)) {
        self.events.send_modify(modify);
    }
}

impl Default for Transport {
    fn default() -> Self {
        Transport::new()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    fn assert_close(expected: f64, actual: f64) {
        assert!(
            (expected - actual).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_pause_resume() {
        let transport = Transport::new();
        assert_eq!(TransportState::Stopped, transport.state());
        assert_close(0.0, transport.seconds());

        transport.start();
        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_close(1.5, transport.seconds());

        transport.pause();
        assert_eq!(TransportState::Paused, transport.state());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_close(1.5, transport.seconds());

        transport.start();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_close(2.0, transport.seconds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_keeps_position() {
        let transport = Transport::new();
        transport.start();
        tokio::time::advance(Duration::from_secs(1)).await;
        transport.start();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_close(2.0, transport.seconds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_rewinds() {
        let transport = Transport::new();
        transport.start();
        tokio::time::advance(Duration::from_secs(2)).await;
        transport.stop();

        assert_eq!(TransportState::Stopped, transport.state());
        assert_close(0.0, transport.seconds());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_close(0.0, transport.seconds());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_seconds() {
        let transport = Transport::new();
        transport.set_seconds(5.0);
        assert_close(5.0, transport.seconds());

        transport.start();
        tokio::time::advance(Duration::from_secs(1)).await;
        transport.set_seconds(2.0);
        assert_close(2.0, transport.seconds());
        tokio::time::advance(Duration::from_millis(250)).await;
        assert_close(2.25, transport.seconds());
    }

    #[tokio::test]
    async fn test_events_and_registrations() {
        let transport = Transport::new();
        assert_eq!(0, transport.registrations());

        let mut events = transport.subscribe();
        assert_eq!(1, transport.registrations());

        transport.start();
        assert!(events.has_changed().unwrap_or(false));
        let event = *events.borrow_and_update();
        assert_eq!(TransportState::Started, event.state);
        assert_eq!(0, event.repositions);

        transport.set_seconds(3.0);
        transport.cancel();
        let event = *events.borrow_and_update();
        assert_eq!(1, event.repositions);
        assert_eq!(1, event.cancels);

        drop(events);
        assert_eq!(0, transport.registrations());
    }
}
