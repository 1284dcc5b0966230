//! Periodic emitters, checked after every inbound frame rather than on a
//! dedicated tick loop: introduction-request retry and the epoch broadcast.

use canmaster_proto::codec::{pack_be8, pack_epoch};
use canmaster_proto::Frame;

use crate::ids::{DATA_EPOCH_ID, REQ_NODE_INTRO};
use crate::model::NodeId;

/// Minimum interval between re-broadcasting `REQ_NODE_INTRO`.
pub const MAX_REQ_INTRO_INTERVAL_MS: u64 = 30 * 60 * 1000;
/// Minimum interval between epoch broadcasts.
pub const SEND_TS_INTERVAL_MS: u64 = 10 * 1000;

/// Tracks the two housekeeping timers. Checked (not ticked) after every
/// inbound frame; lazy scheduling means no dedicated timer task is needed.
#[derive(Debug, Clone)]
pub struct HousekeepingTimers {
    last_req_intro: u64,
    last_ts_msg: u64,
}

impl HousekeepingTimers {
    /// Timers as if both fired at `now`, so the first real check only fires
    /// after a full interval has elapsed.
    #[must_use]
    pub fn new(now: u64) -> Self {
        Self { last_req_intro: now, last_ts_msg: now }
    }

    /// Check both timers against `now`, returning any frames due and
    /// advancing the timers that fired.
    pub fn check(&mut self, master_id: NodeId, now: u64) -> Vec<Frame> {
        let mut frames = Vec::new();

        if now.saturating_sub(self.last_req_intro) > MAX_REQ_INTRO_INTERVAL_MS {
            frames.push(req_node_intro_frame(master_id));
            self.last_req_intro = now;
        }

        if now.saturating_sub(self.last_ts_msg) > SEND_TS_INTERVAL_MS {
            frames.push(epoch_frame(now));
            self.last_ts_msg = now;
        }

        frames
    }
}

#[allow(clippy::unwrap_used)] // REQ_NODE_INTRO is in range; pack_be8 always yields 8 bytes
fn req_node_intro_frame(master_id: NodeId) -> Frame {
    Frame::new(REQ_NODE_INTRO, pack_be8(&master_id.bytes()).to_vec()).unwrap()
}

#[allow(clippy::unwrap_used)] // DATA_EPOCH_ID is in range; pack_epoch always yields 8 bytes
fn epoch_frame(now: u64) -> Frame {
    Frame::new(DATA_EPOCH_ID, pack_epoch(now).to_vec()).unwrap()
}
