//! Slow-start / AIMD congestion control with triple-duplicate-ACK fast
//! retransmit, following the classic Reno-style control loop.

/// The maximum number of consecutive retransmissions of the same segment
/// before the flow gives up and resets.
pub const MAX_RETRANSMISSIONS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// Per-flow congestion state.
#[derive(Debug, Clone)]
pub struct CongestionControl {
    cwnd: u32,
    ssthresh: u32,
    mss: u32,
    phase: Phase,
    dup_acks: u32,
    retransmissions: u32,
}

impl CongestionControl {
    pub fn new(mss: u32) -> Self {
        Self {
            cwnd: mss,
            ssthresh: u32::MAX,
            mss,
            phase: Phase::SlowStart,
            dup_acks: 0,
            retransmissions: 0,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    /// The number of bytes currently permitted in flight, given the peer's
    /// advertised window.
    pub fn send_window(&self, peer_window: u32) -> u32 {
        self.cwnd.min(peer_window)
    }

    /// Called when a cumulative ACK advances `SND.UNA` by `acked_bytes`.
    /// Grows `cwnd` per slow-start or congestion-avoidance rules, and exits
    /// fast recovery if the ACK covers the retransmitted segment. `eff_mss`
    /// is the segment size actually in flight (smaller than `mss` once the
    /// Timestamps option is in use), used for the packet-count math so a
    /// flow negotiating timestamps doesn't grow `cwnd` as if it were sending
    /// full-size segments.
    pub fn on_new_ack(&mut self, acked_bytes: u32, eff_mss: u32, exits_recovery: bool) {
        self.dup_acks = 0;
        self.retransmissions = 0;
        let eff_mss = eff_mss.max(1);

        if self.phase == Phase::FastRecovery {
            if exits_recovery {
                self.cwnd = self.ssthresh;
                self.phase = if self.cwnd < self.ssthresh {
                    Phase::SlowStart
                } else {
                    Phase::CongestionAvoidance
                };
            } else {
                // Still in recovery: inflate the window by one segment per
                // partial ACK, per the standard fast-recovery deflation.
                self.cwnd += eff_mss;
            }
            return;
        }

        let packets = acked_bytes.div_ceil(eff_mss).max(1);
        if self.cwnd < self.ssthresh {
            self.phase = Phase::SlowStart;
            self.cwnd += eff_mss * packets;
        } else {
            self.phase = Phase::CongestionAvoidance;
            self.cwnd += (packets * eff_mss * eff_mss) / self.cwnd.max(1);
        }
    }

    /// Called for every duplicate ACK. Returns `true` exactly once per loss
    /// event, the moment the third duplicate arrives and fast retransmit
    /// should fire.
    pub fn on_duplicate_ack(&mut self, peer_window: u32) -> bool {
        if self.phase == Phase::FastRecovery {
            self.dup_acks += 1;
            if self.dup_acks > 3 {
                self.cwnd += self.mss;
            }
            return false;
        }
        self.dup_acks += 1;
        if self.dup_acks == 3 {
            self.ssthresh = (self.cwnd.min(peer_window) / 2).max(2 * self.mss);
            self.cwnd = self.ssthresh + 3 * self.mss;
            self.phase = Phase::FastRecovery;
            return true;
        }
        false
    }

    /// Called on RTO expiry: collapses the window and restarts slow start,
    /// tracking the retransmission count so the flow can abort after
    /// [`MAX_RETRANSMISSIONS`].
    pub fn on_retransmission_timeout(&mut self, peer_window: u32) -> bool {
        self.retransmissions += 1;
        self.ssthresh = (self.cwnd.min(peer_window) / 2).max(2 * self.mss);
        self.cwnd = self.mss;
        self.phase = Phase::SlowStart;
        self.dup_acks = 0;
        self.retransmissions >= MAX_RETRANSMISSIONS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_in_slow_start_at_one_segment() {
        let cc = CongestionControl::new(1000);
        assert_eq!(cc.cwnd(), 1000);
    }

    #[test]
    fn slow_start_grows_by_acked_segments() {
        let mut cc = CongestionControl::new(1000);
        cc.on_new_ack(2000, 1000, false);
        assert_eq!(cc.cwnd(), 3000);
    }

    #[test]
    fn triple_duplicate_ack_triggers_fast_retransmit_once() {
        let mut cc = CongestionControl::new(1000);
        cc.on_new_ack(4000, 1000, false); // grow cwnd so ssthresh/cwnd math below is interesting
        let cwnd_before = cc.cwnd();
        assert!(!cc.on_duplicate_ack(10_000));
        assert!(!cc.on_duplicate_ack(10_000));
        assert!(cc.on_duplicate_ack(10_000));
        assert!(!cc.on_duplicate_ack(10_000));
        assert_eq!(cc.ssthresh(), (cwnd_before.min(10_000) / 2).max(2000));
        assert_eq!(cc.cwnd(), cc.ssthresh() + 3000 + 1000);
    }

    #[test]
    fn rto_collapses_window_to_one_segment() {
        let mut cc = CongestionControl::new(1000);
        cc.on_new_ack(5000, 1000, false);
        cc.on_retransmission_timeout(10_000);
        assert_eq!(cc.cwnd(), 1000);
    }

    #[test]
    fn repeated_timeouts_eventually_signal_abort() {
        let mut cc = CongestionControl::new(1000);
        let mut aborted = false;
        for _ in 0..MAX_RETRANSMISSIONS {
            aborted = cc.on_retransmission_timeout(10_000);
        }
        assert!(aborted);
    }
}
