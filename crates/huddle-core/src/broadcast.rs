//! Fan-out of frames to live connections.
//!
//! Every attached connection owns a bounded outbound queue drained by its
//! transport writer. Delivery is a non-blocking `try_send`: a full queue or a
//! closed connection drops that one delivery and never stalls the broadcast.
//!
//! Broadcasts stop short of the last [`REPLY_RESERVE`] slots of a queue. Those
//! are left for [`RoomBroadcaster::send_to`], so a reply to the connection's
//! own request still lands after a busy room has filled its share.

use crate::membership::RoomMembership;
use dashmap::DashMap;
use huddle_protocol::{ConnectionId, Frame, RoomId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{trace, warn};

/// Queue slots kept free of broadcasts for direct replies.
pub const REPLY_RESERVE: usize = 16;

/// Sending half of a connection's outbound queue.
pub type ConnectionSink = mpsc::Sender<Arc<Frame>>;

/// Receiving half of a connection's outbound queue.
pub type ConnectionStream = mpsc::Receiver<Arc<Frame>>;

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The frame was queued.
    Delivered,
    /// The connection's queue was full; the frame was dropped.
    Full,
    /// The connection is gone.
    Closed,
}

/// Outcome of a fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames queued.
    pub delivered: usize,
    /// Targets skipped because they were full, closed or detached.
    pub skipped: usize,
}

impl BroadcastReport {
    fn record(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Delivered => self.delivered += 1,
            Delivery::Full | Delivery::Closed => self.skipped += 1,
        }
    }
}

/// Cumulative delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcasterStats {
    /// Connections currently attached.
    pub attached: usize,
    /// Frames queued since start.
    pub delivered_total: u64,
    /// Frames dropped because a queue was full.
    pub dropped_total: u64,
}

/// Delivers frames to single connections, to a room's subscribers, or to
/// everyone.
#[derive(Debug)]
pub struct RoomBroadcaster {
    sinks: DashMap<ConnectionId, ConnectionSink>,
    membership: Arc<RoomMembership>,
    reply_reserve: usize,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl RoomBroadcaster {
    /// Create a broadcaster resolving room subscribers through `membership`.
    #[must_use]
    pub fn new(membership: Arc<RoomMembership>) -> Self {
        Self::with_reply_reserve(membership, 0)
    }

    /// Create a broadcaster whose fan-out leaves `reply_reserve` slots of every
    /// queue to [`send_to`](Self::send_to).
    ///
    /// Queues must be created with that many slots on top of their broadcast
    /// capacity.
    #[must_use]
    pub fn with_reply_reserve(membership: Arc<RoomMembership>, reply_reserve: usize) -> Self {
        Self {
            sinks: DashMap::new(),
            membership,
            reply_reserve,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach a connection's outbound queue.
    pub fn attach(&self, connection_id: ConnectionId, sink: ConnectionSink) {
        trace!(connection = %connection_id, "Attached outbound queue");
        self.sinks.insert(connection_id, sink);
    }

    /// Detach a connection. Returns `true` if it was attached.
    pub fn detach(&self, connection_id: &ConnectionId) -> bool {
        self.sinks.remove(connection_id).is_some()
    }

    /// Whether a connection is attached.
    #[must_use]
    pub fn is_attached(&self, connection_id: &ConnectionId) -> bool {
        self.sinks.contains_key(connection_id)
    }

    /// Send a frame to one connection, using the reply reserve if needed.
    pub fn send_to(&self, connection_id: &ConnectionId, frame: Frame) -> Delivery {
        let Some(sink) = self.sinks.get(connection_id) else {
            trace!(connection = %connection_id, "Skipping detached connection");
            return Delivery::Closed;
        };
        let outcome = sink.try_send(Arc::new(frame)).map_err(|e| match e {
            TrySendError::Full(_) => TrySendError::Full(()),
            TrySendError::Closed(_) => TrySendError::Closed(()),
        });
        self.tally(connection_id, outcome)
    }

    /// Send a frame to every current subscriber of a room.
    pub fn broadcast_to_room(&self, room_id: RoomId, frame: Frame) -> BroadcastReport {
        let frame = Arc::new(frame);
        let mut report = BroadcastReport::default();

        self.membership.for_each_subscriber(room_id, |connection_id| {
            report.record(self.deliver(connection_id, &frame));
        });

        trace!(
            room = %room_id,
            frame_type = ?frame.frame_type(),
            delivered = report.delivered,
            skipped = report.skipped,
            "Room broadcast"
        );
        report
    }

    /// Send a frame to every attached connection.
    pub fn broadcast_all(&self, frame: Frame) -> BroadcastReport {
        let frame = Arc::new(frame);
        let mut report = BroadcastReport::default();

        for entry in self.sinks.iter() {
            report.record(self.push(entry.key(), entry.value(), &frame));
        }

        trace!(
            frame_type = ?frame.frame_type(),
            delivered = report.delivered,
            skipped = report.skipped,
            "Global broadcast"
        );
        report
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> BroadcasterStats {
        BroadcasterStats {
            attached: self.sinks.len(),
            delivered_total: self.delivered.load(Ordering::Relaxed),
            dropped_total: self.dropped.load(Ordering::Relaxed),
        }
    }

    fn deliver(&self, connection_id: &ConnectionId, frame: &Arc<Frame>) -> Delivery {
        match self.sinks.get(connection_id) {
            Some(sink) => self.push(connection_id, &sink, frame),
            None => {
                trace!(connection = %connection_id, "Skipping detached connection");
                Delivery::Closed
            }
        }
    }

    /// Queue a broadcast frame unless that would eat into the reply reserve.
    fn push(
        &self,
        connection_id: &ConnectionId,
        sink: &ConnectionSink,
        frame: &Arc<Frame>,
    ) -> Delivery {
        let outcome = match sink.try_reserve() {
            // Remaining capacity is checked with our slot already taken.
            Ok(permit) if sink.capacity() >= self.reply_reserve => {
                permit.send(Arc::clone(frame));
                Ok(())
            }
            Ok(_) => Err(TrySendError::Full(())),
            Err(e) => Err(e),
        };
        self.tally(connection_id, outcome)
    }

    fn tally(&self, connection_id: &ConnectionId, outcome: Result<(), TrySendError<()>>) -> Delivery {
        match outcome {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                Delivery::Delivered
            }
            Err(TrySendError::Full(())) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(connection = %connection_id, "Outbound queue full, dropping frame");
                Delivery::Full
            }
            Err(TrySendError::Closed(())) => {
                trace!(connection = %connection_id, "Outbound queue closed");
                Delivery::Closed
            }
        }
    }
}
