use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use crate::frame::Frame;
use crate::receiver::reorder_buffer::ReorderBuffer;

/// Decides which control frames go back to the sender after a DATA frame was processed.
///
/// Every DATA frame is answered with a cumulative ACK once at least one segment was written, so
///  that a lost ACK is repaired by the next one - including ACKs for duplicates the receiver
///  already wrote. A NACK for the next missing segment is sent when there is a confirmed gap,
///  but at most once per `nack_interval`.
pub struct AckGenerator {
    nack_interval: Duration,
    last_nack: Option<Instant>,
}

impl AckGenerator {
    pub fn new(nack_interval: Duration) -> AckGenerator {
        AckGenerator {
            nack_interval,
            last_nack: None,
        }
    }

    pub fn on_data(&mut self, buffer: &ReorderBuffer, now: Instant) -> Vec<Frame> {
        let mut result = Vec::new();

        if buffer.next_seq() > 0 {
            result.push(Frame::ack(buffer.next_seq() - 1));
        }

        if buffer.has_gap() {
            let is_due = match self.last_nack {
                Some(t) => now.saturating_duration_since(t) >= self.nack_interval,
                None => true,
            };
            if is_due {
                self.last_nack = Some(now);
                result.push(Frame::nack(buffer.next_seq()));
            }
            else {
                trace!("gap at #{} - NACK throttled", buffer.next_seq());
            }
        }

        result
    }
}
