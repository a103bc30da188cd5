//! Event delivery gateway
//!
//! One [`EventStreamer::run`] call serves one consumer connection. It owns the
//! connection's cursor and timers; concurrent streams over the same session do
//! not share state. The log is only read here, never written.

use cadence_api::{EventKind, StreamFrame};
use cadence_config::StreamSettings;
use cadence_util::SessionId;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::EventSource;

/// Why a stream stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A logged `session_ended` was forwarded
    SessionEnded,
    /// Maximum connection duration reached; a `timeout` frame was sent
    TimedOut,
    /// The transport signalled disconnect
    Cancelled,
    /// The frame receiver was dropped
    ConsumerGone,
}

/// Polls an event source from a cursor and forwards frames to a consumer
pub struct EventStreamer<S: EventSource + ?Sized> {
    source: Arc<S>,
    settings: StreamSettings,
}

impl<S: EventSource + ?Sized> EventStreamer<S> {
    pub fn new(source: Arc<S>, settings: StreamSettings) -> Self {
        Self { source, settings }
    }

    /// Stream frames for `session_id`, starting after `cursor`.
    ///
    /// Sends `connected` first, then log events in sequence order. A
    /// `heartbeat` goes out on each heartbeat tick that saw no other frame.
    /// Read failures become `error` frames with code `POLL_ERROR` and the
    /// stream continues.
    pub async fn run(
        &self,
        session_id: SessionId,
        cursor: u64,
        sink: mpsc::Sender<StreamFrame>,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let mut cursor = cursor;

        if sink
            .send(StreamFrame::connected(&session_id, cursor))
            .await
            .is_err()
        {
            return StreamOutcome::ConsumerGone;
        }
        debug!(session_id = %session_id, cursor, "Stream opened");

        let deadline = sleep(self.settings.max_duration);
        tokio::pin!(deadline);

        let mut poll = interval(self.settings.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let heartbeat_every = self.settings.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + heartbeat_every, heartbeat_every);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut traffic = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!(session_id = %session_id, cursor, "Stream cancelled by consumer");
                    return StreamOutcome::Cancelled;
                }

                _ = &mut deadline => {
                    let _ = sink
                        .send(StreamFrame::timeout(self.settings.max_duration.as_secs()))
                        .await;
                    debug!(session_id = %session_id, cursor, "Stream reached max duration");
                    return StreamOutcome::TimedOut;
                }

                _ = poll.tick() => {
                    match self.source.read_since(&session_id, cursor) {
                        Ok((events, high_water)) => {
                            for event in &events {
                                if sink.send(StreamFrame::from_logged(event)).await.is_err() {
                                    return StreamOutcome::ConsumerGone;
                                }
                                cursor = event.sequence;
                                traffic = true;

                                if event.kind == EventKind::SessionEnded {
                                    debug!(session_id = %session_id, cursor, "Session ended, closing stream");
                                    return StreamOutcome::SessionEnded;
                                }
                            }
                            cursor = cursor.max(high_water);
                        }
                        Err(e) => {
                            warn!(session_id = %session_id, cursor, error = %e, "Event log poll failed");
                            if sink.send(StreamFrame::poll_error(e.to_string())).await.is_err() {
                                return StreamOutcome::ConsumerGone;
                            }
                            traffic = true;
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if !traffic && sink.send(StreamFrame::heartbeat(cursor)).await.is_err() {
                        return StreamOutcome::ConsumerGone;
                    }
                    traffic = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CoreError, CoreResult};
    use cadence_api::{LoggedEvent, POLL_ERROR};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory source; fails the first `failures` reads
    #[derive(Default)]
    struct VecSource {
        events: Mutex<Vec<LoggedEvent>>,
        failures: AtomicUsize,
        reads: AtomicUsize,
    }

    impl VecSource {
        fn push(&self, kind: EventKind) {
            let mut events = self.events.lock().unwrap();
            let sequence = events.len() as u64 + 1;
            events.push(LoggedEvent {
                session_id: SessionId::from("s"),
                sequence,
                kind,
                timestamp: cadence_util::now(),
                payload: serde_json::json!({ "n": sequence }),
            });
        }
    }

    impl EventSource for VecSource {
        fn read_since(
            &self,
            _session_id: &SessionId,
            cursor: u64,
        ) -> CoreResult<(Vec<LoggedEvent>, u64)> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(CoreError::Poll("database is locked".into()));
            }

            let events: Vec<LoggedEvent> = self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.sequence > cursor)
                .cloned()
                .collect();
            let high = events.last().map(|e| e.sequence).unwrap_or(cursor);
            Ok((events, high))
        }
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            poll_interval: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(1),
            max_duration: Duration::from_secs(10),
        }
    }

    fn start(
        source: Arc<VecSource>,
        cursor: u64,
    ) -> (
        mpsc::Receiver<StreamFrame>,
        CancellationToken,
        tokio::task::JoinHandle<StreamOutcome>,
    ) {
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let streamer = EventStreamer::new(source, settings());
        let token = cancel.clone();
        let handle =
            tokio::spawn(async move { streamer.run(SessionId::from("s"), cursor, tx, token).await });
        (rx, cancel, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_backlog_in_order_then_closes_on_session_ended() {
        let source = Arc::new(VecSource::default());
        for _ in 0..4 {
            source.push(EventKind::ScanProgress);
        }
        source.push(EventKind::SessionEnded);

        let (mut rx, _cancel, handle) = start(source, 0);

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames[0].kind, EventKind::Connected);
        let seqs: Vec<u64> = frames[1..].iter().filter_map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(frames.last().unwrap().kind, EventKind::SessionEnded);
        assert_eq!(handle.await.unwrap(), StreamOutcome::SessionEnded);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_after_cursor() {
        let source = Arc::new(VecSource::default());
        for _ in 0..3 {
            source.push(EventKind::TaskGenerated);
        }

        let (mut rx, cancel, handle) = start(source.clone(), 2);

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Connected);
        assert_eq!(rx.recv().await.unwrap().seq, Some(3));

        source.push(EventKind::TaskUpdated);
        assert_eq!(rx.recv().await.unwrap().seq, Some(4));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), StreamOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_when_idle_then_times_out() {
        let source = Arc::new(VecSource::default());
        let (mut rx, _cancel, handle) = start(source, 0);

        let mut frames = Vec::new();
        while let Some(frame) = rx.recv().await {
            frames.push(frame);
        }

        assert_eq!(frames[0].kind, EventKind::Connected);
        let heartbeats = frames
            .iter()
            .filter(|f| f.kind == EventKind::Heartbeat)
            .count();
        assert!(heartbeats >= 8, "expected a heartbeat per idle second, got {}", heartbeats);
        assert!(frames.iter().all(|f| f.seq.is_none()));
        assert_eq!(frames.last().unwrap().kind, EventKind::Timeout);
        assert_eq!(handle.await.unwrap(), StreamOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn no_heartbeat_while_events_flow() {
        let source = Arc::new(VecSource::default());
        let (mut rx, cancel, handle) = start(source.clone(), 0);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Connected);

        // One event every 500ms for 3s: every heartbeat window sees traffic
        for _ in 0..6 {
            source.push(EventKind::ScanProgress);
            let frame = rx.recv().await.unwrap();
            assert_eq!(frame.kind, EventKind::ScanProgress);
            tokio::time::sleep(Duration::from_millis(500)).await;
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), StreamOutcome::Cancelled);
        while let Ok(frame) = rx.try_recv() {
            assert_ne!(frame.kind, EventKind::Heartbeat);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn poll_error_keeps_stream_open() {
        let source = Arc::new(VecSource::default());
        source.failures.store(1, Ordering::SeqCst);
        source.push(EventKind::ScanStarted);

        let (mut rx, cancel, handle) = start(source, 0);

        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Connected);
        let error = rx.recv().await.unwrap();
        assert_eq!(error.kind, EventKind::Error);
        assert_eq!(error.data["code"], POLL_ERROR);
        assert!(error.seq.is_none());

        // Next tick heals
        let next = rx.recv().await.unwrap();
        assert_eq!(next.seq, Some(1));

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), StreamOutcome::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling() {
        let source = Arc::new(VecSource::default());
        let (mut rx, cancel, handle) = start(source.clone(), 0);
        assert_eq!(rx.recv().await.unwrap().kind, EventKind::Connected);

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), StreamOutcome::Cancelled);

        let reads = source.reads.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(source.reads.load(Ordering::SeqCst), reads);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_receiver_ends_stream() {
        let source = Arc::new(VecSource::default());
        let (rx, _cancel, handle) = start(source, 0);
        drop(rx);
        assert_eq!(handle.await.unwrap(), StreamOutcome::ConsumerGone);
    }
}
