use std::cmp::{max, min};
use std::time::Duration;
use tokio::time::Instant;
use tracing::trace;
use crate::sender::segment_table::SegmentTable;

/// The sender's sliding window over a [SegmentTable]. This is pure bookkeeping: it decides which
///  segments go on the wire, the caller does the actual sending.
///
/// Invariants:
/// * `send_base <= next_seq <= total_segments`
/// * all segments below `send_base` are acknowledged
/// * all segments in `[send_base, next_seq)` are acknowledged or have a send timestamp
///
/// Acknowledgements are cumulative, retransmission is selective per segment.
pub struct SendWindow {
    table: SegmentTable,
    send_base: u32,
    next_seq: u32,
    window_size: u32,
    rto: Duration,
}

impl SendWindow {
    pub fn new(table: SegmentTable, window_size: u32, rto: Duration) -> SendWindow {
        SendWindow {
            table,
            send_base: 0,
            next_seq: 0,
            window_size,
            rto,
        }
    }

    pub fn table(&self) -> &SegmentTable {
        &self.table
    }

    pub fn send_base(&self) -> u32 {
        self.send_base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn is_complete(&self) -> bool {
        self.send_base == self.table.total_segments()
    }

    /// number of segments that were sent but are not acknowledged yet
    pub fn outstanding(&self) -> usize {
        (self.send_base..self.next_seq)
            .filter(|&seq| !self.table.is_acknowledged(seq))
            .count()
    }

    /// Advances `next_seq` as far as the window allows, returning the segments that need to be
    ///  sent now. They are marked as sent at `now`.
    pub fn fill(&mut self, now: Instant) -> Vec<u32> {
        let total = self.table.total_segments();
        let window_end = self.send_base.saturating_add(self.window_size);

        let mut result = Vec::new();
        while self.next_seq < total && self.next_seq < window_end {
            let seq = self.next_seq;
            self.next_seq += 1;

            if let Some(segment) = self.table.get_mut(seq) {
                if !segment.acknowledged {
                    segment.last_send_time = Some(now);
                    result.push(seq);
                }
            }
        }
        debug_assert!(self.outstanding() <= self.window_size as usize);
        result
    }

    /// Handles a cumulative ACK for `sequence`, returning `true` if it moved the window
    pub fn on_ack(&mut self, sequence: u32) -> bool {
        let total = self.table.total_segments();
        let new_base = min(sequence as u64 + 1, total as u64) as u32;
        if new_base <= self.send_base {
            trace!("ACK #{} does not advance the window at {}", sequence, self.send_base);
            return false;
        }

        for seq in self.send_base..new_base {
            if let Some(segment) = self.table.get_mut(seq) {
                segment.acknowledged = true;
            }
        }
        self.send_base = new_base;
        // NB: after a rewind, the receiver may acknowledge segments that were not re-sent yet
        self.next_seq = max(self.next_seq, self.send_base);
        true
    }

    /// Handles a NACK, returning `true` if the requested segment should be re-sent right away.
    ///  It is then marked as sent at `now`.
    pub fn on_nack(&mut self, sequence: u32, now: Instant) -> bool {
        if sequence >= self.next_seq {
            trace!("NACK #{} for a segment that was not sent yet", sequence);
            return false;
        }
        match self.table.get_mut(sequence) {
            Some(segment) if !segment.acknowledged => {
                segment.last_send_time = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Collects all unacknowledged segments in flight that were last sent more than `rto` ago,
    ///  marking them as sent at `now`
    pub fn timed_out(&mut self, now: Instant) -> Vec<u32> {
        let mut result = Vec::new();
        for seq in self.send_base..self.next_seq {
            if let Some(segment) = self.table.get_mut(seq) {
                if segment.acknowledged {
                    continue;
                }
                let is_stale = match segment.last_send_time {
                    Some(t) => now.saturating_duration_since(t) > self.rto,
                    None => true,
                };
                if is_stale {
                    segment.last_send_time = Some(now);
                    result.push(seq);
                }
            }
        }
        result
    }

    /// Starts over from segment 0 with nothing acknowledged. This is for when the receiver lost
    ///  track of our session.
    pub fn rewind(&mut self) {
        self.send_base = 0;
        self.next_seq = 0;
        for segment in self.table.iter_mut() {
            segment.acknowledged = false;
            segment.last_send_time = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    const RTO: Duration = Duration::from_millis(100);

    fn window(num_segments: u32, window_size: u32) -> SendWindow {
        SendWindow::new(SegmentTable::new(num_segments as u64 * 10, 10).unwrap(), window_size, RTO)
    }

    #[rstest]
    #[case::empty(0, 4, vec![])]
    #[case::window_larger_than_file(3, 8, vec![0,1,2])]
    #[case::window_limits(10, 4, vec![0,1,2,3])]
    #[case::window_of_one(10, 1, vec![0])]
    fn test_initial_fill(#[case] num_segments: u32, #[case] window_size: u32, #[case] expected: Vec<u32>) {
        let mut w = window(num_segments, window_size);
        let now = Instant::now();

        assert_eq!(w.fill(now), expected);
        assert_eq!(w.next_seq() as usize, expected.len());
        assert_eq!(w.outstanding(), expected.len());
        assert!(w.outstanding() <= window_size as usize);

        for seq in expected {
            assert_eq!(w.table().get(seq).unwrap().last_send_time, Some(now));
        }

        assert!(w.fill(now).is_empty());
    }

    #[test]
    fn test_empty_window_is_complete() {
        let w = window(0, 4);
        assert!(w.is_complete());
    }

    #[rstest]
    #[case::first(0, true, 1, vec![4])]
    #[case::middle(2, true, 3, vec![4,5,6])]
    #[case::all_sent(3, true, 4, vec![4,5,6,7])]
    #[case::beyond_sent(5, true, 6, vec![6,7,8,9])]
    #[case::beyond_total(99, true, 10, vec![])]
    fn test_ack_advances(#[case] ack: u32, #[case] expected_advanced: bool, #[case] expected_base: u32, #[case] expected_fill: Vec<u32>) {
        let mut w = window(10, 4);
        let now = Instant::now();
        w.fill(now);

        assert_eq!(w.on_ack(ack), expected_advanced);
        assert_eq!(w.send_base(), expected_base);
        for seq in 0..expected_base {
            assert!(w.table().is_acknowledged(seq));
        }
        assert!(w.next_seq() >= w.send_base());

        assert_eq!(w.fill(now), expected_fill);
        assert!(w.outstanding() <= 4);
    }

    #[test]
    fn test_ack_is_monotonic() {
        let mut w = window(10, 4);
        w.fill(Instant::now());

        assert!(w.on_ack(2));
        assert_eq!(w.send_base(), 3);

        assert!(!w.on_ack(1));
        assert!(!w.on_ack(2));
        assert_eq!(w.send_base(), 3);
    }

    #[test]
    fn test_ack_completes() {
        let mut w = window(3, 4);
        w.fill(Instant::now());
        assert!(!w.is_complete());
        w.on_ack(2);
        assert!(w.is_complete());
        assert_eq!(w.outstanding(), 0);
    }

    #[rstest]
    #[case::in_flight(1, true)]
    #[case::oldest(0, true)]
    #[case::acknowledged_below_base(0, false)]
    #[case::not_sent_yet(5, false)]
    #[case::beyond_total(10, false)]
    fn test_nack(#[case] nack: u32, #[case] expected: bool) {
        let mut w = window(10, 4);
        let t0 = Instant::now();
        w.fill(t0);
        if !expected && nack == 0 {
            w.on_ack(0);
        }

        let t1 = t0 + Duration::from_millis(5);
        assert_eq!(w.on_nack(nack, t1), expected);
        if expected {
            assert_eq!(w.table().get(nack).unwrap().last_send_time, Some(t1));
        }
    }

    #[test]
    fn test_timeout_is_selective() {
        let mut w = window(10, 4);
        let t0 = Instant::now();
        w.fill(t0);

        assert!(w.timed_out(t0 + RTO).is_empty());

        let t1 = t0 + Duration::from_millis(50);
        assert!(w.on_nack(2, t1));

        let t2 = t0 + RTO + Duration::from_millis(1);
        assert_eq!(w.timed_out(t2), vec![0, 1, 3]);
        assert!(w.timed_out(t2).is_empty());

        let t3 = t1 + RTO + Duration::from_millis(1);
        assert_eq!(w.timed_out(t3), vec![2]);
    }

    #[test]
    fn test_timeout_skips_acknowledged() {
        let mut w = window(10, 4);
        let t0 = Instant::now();
        w.fill(t0);
        w.on_ack(1);

        assert_eq!(w.timed_out(t0 + RTO * 2), vec![2, 3]);
    }

    #[test]
    fn test_rewind() {
        let mut w = window(10, 4);
        let t0 = Instant::now();
        w.fill(t0);
        w.on_ack(2);
        w.fill(t0);

        w.rewind();
        assert_eq!(w.send_base(), 0);
        assert_eq!(w.next_seq(), 0);
        assert!(w.table().iter().all(|s| !s.acknowledged && s.last_send_time.is_none()));

        assert_eq!(w.fill(t0), vec![0,1,2,3]);

        // the receiver still holds everything up to #5 and acknowledges cumulatively
        assert!(w.on_ack(5));
        assert_eq!(w.send_base(), 6);
        assert_eq!(w.next_seq(), 6);
        assert_eq!(w.fill(t0), vec![6,7,8,9]);
    }
}
