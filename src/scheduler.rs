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

//! Fires note events against the transport clock, looping over the piece.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, span, warn, Instrument as _, Level, Span};

use crate::midi::NoteEvent;
use crate::playsync::CancelHandle;
use crate::samples::InstrumentPool;
use crate::transport::{Transport, TransportEvent, TransportState};

/// Clock readings this close to an event's time count as reaching it.
const TOLERANCE: f64 = 1e-6;

/// Passes through the loop beyond which clock times are too coarse to schedule against.
const MAX_CYCLE: f64 = (1u64 << 40) as f64;

/// The event list and loop length, shared with the fire loop.
struct Timeline {
    /// Events ordered by offset.
    events: Vec<NoteEvent>,
    /// Loop length in seconds. Zero disables looping.
    loop_end: f64,
}

/// The next event to fire: which pass through the loop, and which event within it.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Cursor {
    cycle: u64,
    index: usize,
}

impl Timeline {
    fn new(mut events: Vec<NoteEvent>, loop_end: f64) -> Timeline {
        events.sort_by(|a, b| a.offset.total_cmp(&b.offset));
        if loop_end > 0.0 {
            events.retain(|event| event.offset < loop_end);
        }
        Timeline { events, loop_end }
    }

    fn looping(&self) -> bool {
        self.loop_end > 0.0
    }

    /// The first event at or after the given clock position. None when the position is too
    /// far into the loop to schedule against.
    fn cursor_at(&self, position: f64) -> Option<Cursor> {
        let position = position.max(0.0);
        let (cycle, local) = if self.looping() {
            let cycle = (position / self.loop_end).floor();
            if cycle >= MAX_CYCLE {
                return None;
            }
            (cycle as u64, position - cycle * self.loop_end)
        } else {
            (0, position)
        };
        let index = self
            .events
            .partition_point(|event| event.offset < local - TOLERANCE);
        Some(self.normalize(Cursor { cycle, index }))
    }

    /// Wraps a cursor past the last event onto the next pass when looping.
    fn normalize(&self, cursor: Cursor) -> Cursor {
        if self.looping() && !self.events.is_empty() && cursor.index >= self.events.len() {
            Cursor {
                cycle: cursor.cycle.saturating_add(1),
                index: 0,
            }
        } else {
            cursor
        }
    }

    fn advance(&self, cursor: Cursor) -> Cursor {
        self.normalize(Cursor {
            cycle: cursor.cycle,
            index: cursor.index + 1,
        })
    }

    /// The clock time the cursor's event fires at, if any remain.
    fn time_of(&self, cursor: Cursor) -> Option<f64> {
        self.events
            .get(cursor.index)
            .map(|event| cursor.cycle as f64 * self.loop_end + event.offset)
    }
}

/// A running fire loop.
struct FireLoop {
    join: JoinHandle<()>,
    cancel_handle: CancelHandle,
}

impl FireLoop {
    fn stop(self) {
        self.cancel_handle.cancel();
        self.join.abort();
    }
}

/// Schedules a piece's notes against the transport. All notes play through the pool's first
/// voice regardless of the track they came from.
pub struct Scheduler {
    timeline: Arc<Timeline>,
    pool: Arc<InstrumentPool>,
    transport: Arc<Transport>,
    fire_loop: Mutex<Option<FireLoop>>,
    disposed: AtomicBool,
    span: Span,
}

impl Scheduler {
    /// Creates a scheduler looping every `loop_end` seconds. Events at or past the loop end
    /// never fire.
    pub fn new(
        events: Vec<NoteEvent>,
        loop_end: f64,
        pool: Arc<InstrumentPool>,
        transport: Arc<Transport>,
    ) -> Scheduler {
        Scheduler {
            timeline: Arc::new(Timeline::new(events, loop_end)),
            pool,
            transport,
            fire_loop: Mutex::new(None),
            disposed: AtomicBool::new(false),
            span: span!(Level::INFO, "scheduler"),
        }
    }

    /// Registers with the transport and fires events from its current position. Does nothing if
    /// already running or disposed. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let _enter = self.span.enter();
        if self.disposed.load(Ordering::SeqCst) {
            debug!("Scheduler is disposed, not starting.");
            return;
        }

        let mut fire_loop = self.fire_loop.lock();
        if fire_loop
            .as_ref()
            .is_some_and(|running| !running.join.is_finished())
        {
            return;
        }

        // Snapshot the transport now so changes made before the task first runs are seen.
        let mut events = self.transport.subscribe();
        let initial = *events.borrow_and_update();
        let cancel_handle = CancelHandle::new();
        let position = self.transport.seconds();
        let cursor = self.timeline.cursor_at(position);
        info!(
            events = self.timeline.events.len(),
            loop_end = self.timeline.loop_end,
            ?cursor,
            "Starting scheduler."
        );
        if cursor.is_none() {
            warn!(position, "Position is out of range, waiting for a reposition.");
        }
        let join = tokio::spawn(
            run(
                self.timeline.clone(),
                self.pool.clone(),
                self.transport.clone(),
                events,
                initial,
                cursor,
                cancel_handle.clone(),
            )
            .instrument(self.span.clone()),
        );
        *fire_loop = Some(FireLoop {
            join,
            cancel_handle,
        });
    }

    /// Cancels pending and future fires and releases the transport registration. Safe to call
    /// any number of times.
    pub fn stop(&self) {
        let _enter = self.span.enter();
        if let Some(fire_loop) = self.fire_loop.lock().take() {
            debug!("Stopping scheduler.");
            fire_loop.stop();
        }
    }

    /// Stops the scheduler for good. Safe to call any number of times.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.stop();
    }

    /// Returns true while a fire loop is registered with the transport.
    pub fn is_running(&self) -> bool {
        self.fire_loop
            .lock()
            .as_ref()
            .is_some_and(|running| !running.join.is_finished())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// The number of events that can fire.
    pub fn event_count(&self) -> usize {
        self.timeline.events.len()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// The fire loop. Sleeps until the next event is due, fires it and everything else that has
/// come due, and follows the transport through pauses and repositions. Without a cursor it
/// fires nothing until the transport is repositioned.
async fn run(
    timeline: Arc<Timeline>,
    pool: Arc<InstrumentPool>,
    transport: Arc<Transport>,
    mut events: watch::Receiver<TransportEvent>,
    initial: TransportEvent,
    mut cursor: Option<Cursor>,
    cancel_handle: CancelHandle,
) {
    let mut event = initial;
    let cancels = initial.cancels;

    loop {
        if event.cancels != cancels {
            debug!("Transport cancelled scheduled events.");
            return;
        }

        let mut wait = None;
        if event.state == TransportState::Started {
            let position = transport.seconds();

            // Fell more than a whole loop behind, skip ahead instead of replaying every pass.
            if let Some(next) = cursor.and_then(|cursor| timeline.time_of(cursor)) {
                if timeline.looping() && next + timeline.loop_end < position {
                    cursor = timeline.cursor_at(position);
                }
            }

            while let Some(current) = cursor {
                let Some(next) = timeline.time_of(current) else {
                    break;
                };
                if next > position + TOLERANCE {
                    wait = Some(Duration::from_secs_f64(next - position));
                    break;
                }
                fire(&pool, &timeline.events[current.index], next);
                cursor = Some(timeline.advance(current));
            }
        }

        tokio::select! {
            _ = cancel_handle.cancelled() => return,
            changed = events.changed() => {
                if changed.is_err() {
                    return;
                }
                let previous = event;
                event = *events.borrow_and_update();
                if event.repositions != previous.repositions {
                    cursor = timeline.cursor_at(transport.seconds());
                    if cursor.is_none() {
                        warn!("Position is out of range, waiting for a reposition.");
                    }
                }
            }
            _ = sleep_for(wait) => {}
        }
    }
}

async fn sleep_for(wait: Option<Duration>) {
    match wait {
        Some(wait) => tokio::time::sleep(wait).await,
        None => std::future::pending().await,
    }
}

fn fire(pool: &InstrumentPool, event: &NoteEvent, at_time: f64) {
    let Some(voice) = pool.voice(0) else {
        return;
    };
    if let Err(e) = voice.trigger_note(&event.pitch, event.duration, at_time, event.velocity) {
        warn!(err = %e, offset = event.offset, "Skipping note.");
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;

    use super::*;
    use crate::audio::mock;
    use crate::testutil::{eventually_async, note, small_bank, small_bank_fetcher};

    async fn scheduler(
        events: Vec<NoteEvent>,
        loop_end: f64,
    ) -> Result<(Scheduler, Arc<Transport>, Arc<mock::Output>), Box<dyn Error>> {
        let output = Arc::new(mock::Output::get("mock"));
        let pool = InstrumentPool::load(
            1,
            &small_bank(),
            Arc::new(small_bank_fetcher()?),
            output.clone(),
            0.0,
        )
        .await?;
        let transport = Arc::new(Transport::new());
        let scheduler = Scheduler::new(events, loop_end, Arc::new(pool), transport.clone());
        Ok((scheduler, transport, output))
    }

    #[test]
    fn test_timeline_sorts_and_drops_late_events() {
        let timeline = Timeline::new(
            vec![note(3.0, "C4"), note(1.0, "A1"), note(4.0, "C#4")],
            4.0,
        );
        let offsets: Vec<f64> = timeline.events.iter().map(|event| event.offset).collect();
        assert_eq!(vec![1.0, 3.0], offsets);
    }

    #[test]
    fn test_timeline_cursor() {
        let timeline = Timeline::new(vec![note(0.0, "C4"), note(2.0, "A1")], 4.0);

        assert_eq!(Some(Cursor { cycle: 0, index: 0 }), timeline.cursor_at(0.0));
        assert_eq!(Some(Cursor { cycle: 0, index: 1 }), timeline.cursor_at(1.0));
        assert_eq!(Some(Cursor { cycle: 0, index: 1 }), timeline.cursor_at(2.0));
        assert_eq!(Some(Cursor { cycle: 1, index: 0 }), timeline.cursor_at(3.0));
        assert_eq!(Some(Cursor { cycle: 2, index: 1 }), timeline.cursor_at(9.5));

        assert_eq!(Some(10.0), timeline.time_of(Cursor { cycle: 2, index: 1 }));
        assert_eq!(
            Cursor { cycle: 3, index: 0 },
            timeline.advance(Cursor { cycle: 2, index: 1 })
        );
    }

    #[test]
    fn test_timeline_without_loop() {
        let timeline = Timeline::new(vec![note(0.0, "C4")], 0.0);
        let cursor = timeline.cursor_at(0.0).map(|cursor| timeline.advance(cursor));
        assert_eq!(None, cursor.and_then(|cursor| timeline.time_of(cursor)));

        let cursor = timeline.cursor_at(1e300);
        assert_eq!(None, cursor.and_then(|cursor| timeline.time_of(cursor)));
    }

    #[test]
    fn test_timeline_far_positions() {
        let timeline = Timeline::new(vec![note(0.0, "C4"), note(2.0, "A1")], 4.0);
        assert_eq!(None, timeline.cursor_at(1e300));
        assert_eq!(None, timeline.cursor_at(f64::INFINITY));

        // The last schedulable pass still moves the clock forward.
        let cursor = timeline.cursor_at(MAX_CYCLE * 4.0 - 1.0);
        assert_eq!(
            Some(Cursor {
                cycle: 1 << 40,
                index: 0
            }),
            cursor
        );
        let next = cursor.map(|cursor| timeline.advance(cursor));
        let times = cursor
            .zip(next)
            .and_then(|(a, b)| timeline.time_of(a).zip(timeline.time_of(b)));
        assert!(times.is_some_and(|(a, b)| b > a));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_and_loops() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) =
            scheduler(vec![note(0.0, "C4"), note(1.0, "A1")], 2.0).await?;

        scheduler.start();
        transport.start();
        let started = tokio::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(4500)).await;

        assert_eq!(
            vec!["C4", "A1", "C4", "A1", "C4"],
            output.triggered_labels()
        );
        let times: Vec<f64> = output
            .triggered()
            .iter()
            .map(|triggered| (triggered.at - started).as_secs_f64())
            .collect();
        for (expected, actual) in [0.0, 1.0, 2.0, 3.0, 4.0].iter().zip(times.iter()) {
            assert!((expected - actual).abs() < 0.01, "{expected} != {actual}");
        }
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_events() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) =
            scheduler(vec![note(0.0, "C4"), note(1.0, "A1")], 2.0).await?;

        scheduler.start();
        transport.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        transport.pause();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(vec!["C4"], output.triggered_labels());

        transport.start();
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(vec!["C4", "A1"], output.triggered_labels());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_reposition_follows_clock() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) = scheduler(
            vec![note(0.0, "C4"), note(1.0, "A1"), note(3.0, "C#4")],
            4.0,
        )
        .await?;

        transport.set_seconds(2.5);
        scheduler.start();
        transport.start();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(vec!["C#4"], output.triggered_labels());

        // Jumping back replays what comes after the new position.
        transport.set_seconds(0.5);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(vec!["C#4", "A1"], output.triggered_labels());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_far_reposition_idles_until_moved_back() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) =
            scheduler(vec![note(0.0, "C4"), note(1.0, "A1")], 2.0).await?;

        scheduler.start();
        transport.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(vec!["C4"], output.triggered_labels());

        transport.set_seconds(1e300);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(scheduler.is_running());
        assert_eq!(vec!["C4"], output.triggered_labels());

        transport.set_seconds(0.5);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(scheduler.is_running());
        assert_eq!(vec!["C4", "A1"], output.triggered_labels());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_far_past_the_loop() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) =
            scheduler(vec![note(0.0, "C4"), note(1.0, "A1")], 2.0).await?;

        transport.set_seconds(f64::MAX);
        scheduler.start();
        transport.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(scheduler.is_running());
        assert!(output.triggered().is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_duration_does_not_loop() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) = scheduler(vec![note(0.0, "C4")], 0.0).await?;

        scheduler.start();
        transport.start();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(vec!["C4"], output.triggered_labels());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_pitch_is_skipped() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) =
            scheduler(vec![note(0.0, "B9"), note(0.5, "C4")], 0.0).await?;

        scheduler.start();
        transport.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(vec!["C4"], output.triggered_labels());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) = scheduler(vec![note(0.0, "C4")], 1.0).await?;

        scheduler.start();
        scheduler.start();
        assert_eq!(1, transport.registrations());
        transport.start();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(vec!["C4"], output.triggered_labels());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispose_releases_registration() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) = scheduler(vec![note(0.5, "C4")], 1.0).await?;

        scheduler.start();
        transport.start();
        assert_eq!(1, transport.registrations());

        scheduler.dispose();
        scheduler.dispose();
        assert!(scheduler.is_disposed());
        assert!(!scheduler.is_running());
        eventually_async(
            || async { transport.registrations() == 0 },
            "Registration was never released",
        )
        .await;

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(output.triggered().is_empty());

        // A disposed scheduler can't be restarted.
        scheduler.start();
        assert_eq!(0, transport.registrations());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_cancel_ends_fire_loop() -> Result<(), Box<dyn Error>> {
        let (scheduler, transport, output) = scheduler(vec![note(0.5, "C4")], 1.0).await?;

        scheduler.start();
        transport.start();
        transport.cancel();
        eventually_async(
            || async { !scheduler.is_running() },
            "Fire loop never ended",
        )
        .await;
        assert_eq!(0, transport.registrations());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(output.triggered().is_empty());

        // Starting again registers a fresh fire loop.
        scheduler.start();
        assert!(scheduler.is_running());
        Ok(())
    }
}
