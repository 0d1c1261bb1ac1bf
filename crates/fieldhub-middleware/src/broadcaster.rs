//! [`Broadcaster`] – fans registry events out to realtime subscribers.
//!
//! ```text
//!   DeviceRegistry ──► EventBus ──► Broadcaster::run ──► frames (broadcast)
//!                                        │  ▲                 │
//!                                        │  └─ keepalive      ├──► Subscription ──► socket
//!                                        └─ ping when idle    └──► Subscription ──► socket
//! ```
//!
//! Each registry event becomes one serialized [`Envelope`] [`Frame`] sent to
//! every subscriber.  Frames can be lost in two places: the broadcaster can
//! fall behind the event bus, or one subscriber can fall behind the frame
//! channel.  Either way the affected subscribers get [`Delivery::Resync`]
//! and are expected to send a fresh snapshot, so no client is left with a
//! stale view.
//!
//! # Keepalive
//!
//! After every broadcast, pings included, the idle timer is re-armed.  When
//! it expires a `ping` frame goes out.  Pings therefore only appear when the
//! channel has been quiet for a full interval.
//!
//! # Catch-up
//!
//! A new subscriber first calls [`Broadcaster::subscribe`], *then* takes a
//! registry snapshot, sends it as a single `device:add`, and calls
//! [`Subscription::resume_after`] with the snapshot revision.  Frames for
//! events already contained in the snapshot are then skipped, and every
//! later event is guaranteed to be in the channel.

use std::sync::Arc;
use std::time::Duration;

use fieldhub_types::{Envelope, RegistryEvent, RegistrySnapshot};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, warn};

use crate::bus::DEFAULT_CAPACITY;

/// A serialized envelope ready to be written to a socket.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Registry revision of the event this frame carries; `None` for pings
    /// and catch-up frames.
    revision: Option<u64>,
    text: Arc<str>,
}

impl Frame {
    /// Serialize `envelope`.
    pub fn new(envelope: &Envelope, revision: Option<u64>) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(envelope)?;
        Ok(Self {
            revision,
            text: text.into(),
        })
    }

    /// The `device:add` frame a new subscriber receives first.
    pub fn catch_up(snapshot: &RegistrySnapshot) -> Result<Self, serde_json::Error> {
        Self::new(&Envelope::DeviceAdd(snapshot.devices.clone()), None)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn revision(&self) -> Option<u64> {
        self.revision
    }
}

/// What a [`Subscription`] yields.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Write this frame to the socket.
    Frame(Frame),
    /// Frames were lost; send a fresh catch-up and resume after it.
    Resync,
}

/// Fan-out hub with idle keepalive.  Clones share the same subscribers.
#[derive(Clone, Debug)]
pub struct Broadcaster {
    frames: broadcast::Sender<Delivery>,
    ping_interval: Option<Duration>,
}

impl Broadcaster {
    /// `ping_interval` of `None` disables keepalives.
    pub fn new(ping_interval: Option<Duration>) -> Self {
        Self::with_capacity(ping_interval, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(ping_interval: Option<Duration>, capacity: usize) -> Self {
        let (frames, _) = broadcast::channel(capacity);
        Self {
            frames,
            ping_interval: ping_interval.filter(|d| !d.is_zero()),
        }
    }

    /// Interpret a configured interval in milliseconds; `<= 0` disables.
    pub fn ping_interval_from_millis(millis: i64) -> Option<Duration> {
        u64::try_from(millis)
            .ok()
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Register a new subscriber.  It receives every frame sent from now on.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.frames.subscribe(),
            resume_after: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.frames.receiver_count()
    }

    /// Serialize and send `envelope` to every subscriber.  Returns how many
    /// subscribers it reached.
    pub fn broadcast(&self, envelope: &Envelope, revision: Option<u64>) -> usize {
        let frame = match Frame::new(envelope, revision) {
            Ok(frame) => frame,
            Err(e) => {
                error!(kind = envelope.kind(), error = %e, "failed to serialize envelope");
                return 0;
            }
        };
        // An error only means nobody is connected.
        self.frames.send(Delivery::Frame(frame)).unwrap_or(0)
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, events: broadcast::Receiver<RegistryEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Forward registry events as frames and emit pings while idle.  Returns
    /// when the event bus closes.
    pub async fn run(self, mut events: broadcast::Receiver<RegistryEvent>) {
        let keepalive = sleep_until(self.next_ping_deadline());
        tokio::pin!(keepalive);

        loop {
            tokio::select! {
                result = events.recv() => match result {
                    Ok(event) => {
                        let envelope = Envelope::from(&event.kind);
                        let reached = self.broadcast(&envelope, Some(event.revision));
                        debug!(kind = envelope.kind(), revision = event.revision, reached, "broadcast");
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        let reached = self.frames.send(Delivery::Resync).unwrap_or(0);
                        warn!(lagged_by = n, reached, "broadcaster fell behind the event bus; resyncing");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                () = &mut keepalive, if self.ping_interval.is_some() => {
                    let reached = self.broadcast(&Envelope::Ping, None);
                    debug!(reached, "ping");
                }
            }
            keepalive.as_mut().reset(self.next_ping_deadline());
        }
    }

    fn next_ping_deadline(&self) -> Instant {
        // Far future when disabled; the select branch is never polled then.
        let wait = self.ping_interval.unwrap_or(Duration::from_secs(86_400));
        Instant::now() + wait
    }
}

/// One subscriber's view of the frame stream.
pub struct Subscription {
    receiver: broadcast::Receiver<Delivery>,
    resume_after: u64,
}

impl Subscription {
    /// Skip frames for events with a revision at or below `revision`.
    pub fn resume_after(&mut self, revision: u64) {
        self.resume_after = revision;
    }

    /// Next delivery, or `None` once the broadcaster is gone.
    ///
    /// A subscriber that lagged behind the channel gets
    /// [`Delivery::Resync`] in place of the frames it lost.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            match self.receiver.recv().await {
                Ok(Delivery::Frame(frame))
                    if frame.revision.is_some_and(|r| r <= self.resume_after) =>
                {
                    continue;
                }
                Ok(delivery) => return Some(delivery),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "subscriber lagged, frames dropped");
                    return Some(Delivery::Resync);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
