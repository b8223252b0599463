//! Per-CON-message retransmission state machine (`spec.md` §3, §4.C).

use crate::clock::Millis;
use crate::config::Config;
use rand::Rng;

/// The lifecycle of a single confirmable datagram on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Pending,
    Acked,
    Reset,
    TimedOut,
}

/// A CON message's retransmission bookkeeping. `Transaction` does not send
/// bytes itself: [`crate::endpoint::Endpoint`] owns the socket and drives
/// retransmission; this type only tracks what attempt we are on and what
/// the next deadline should be.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub mid: u16,
    pub token: Vec<u8>,
    pub encoded_bytes: Vec<u8>,
    pub retransmit_count: u32,
    pub next_fire_at: Millis,
    /// The interval, in ms, that produced `next_fire_at`; doubled for the
    /// following retransmit unless a fixed schedule overrides it.
    current_timeout_ms: u64,
    pub state: TransactionState,
    /// The retransmission parameters this transaction was created with,
    /// copied from the request's `Config` so `Endpoint::tick` does not need
    /// to look the owning request back up just to know when to give up.
    config: Config,
}

impl Transaction {
    /// Creates a transaction for a CON datagram sent at `now`, computing
    /// the initial timeout per `spec.md` §4.C (randomized, unless a fixed
    /// schedule is configured for deterministic tests).
    pub fn new(
        mid: u16,
        token: Vec<u8>,
        encoded_bytes: Vec<u8>,
        now: Millis,
        config: &Config,
        rng: &mut impl Rng,
    ) -> Self {
        let initial_timeout_ms = initial_timeout_ms(config, rng);
        Self {
            mid,
            token,
            encoded_bytes,
            retransmit_count: 0,
            next_fire_at: now + initial_timeout_ms,
            current_timeout_ms: initial_timeout_ms,
            state: TransactionState::Pending,
            config: *config,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state == TransactionState::Pending
    }

    /// Records that the current deadline has elapsed without an ack at
    /// `now` and computes the next one, unless `max_retransmit` has
    /// already been reached.
    ///
    /// Returns `true` if a retransmit should be sent, `false` if the
    /// transaction has just transitioned to `TimedOut`.
    pub fn record_retransmit(&mut self, now: Millis) -> bool {
        if self.retransmit_count >= self.config.max_retransmit {
            self.state = TransactionState::TimedOut;
            return false;
        }
        self.retransmit_count += 1;
        self.current_timeout_ms = next_timeout_ms(&self.config, self.retransmit_count, self.current_timeout_ms);
        self.next_fire_at = now + self.current_timeout_ms;
        true
    }

    pub fn mark_acked(&mut self) {
        self.state = TransactionState::Acked;
    }

    pub fn mark_reset(&mut self) {
        self.state = TransactionState::Reset;
    }
}

/// `T0`: `uniform(ACK_TIMEOUT, ACK_TIMEOUT * ACK_RANDOM_FACTOR)`, or the
/// first entry of a fixed schedule when one is configured.
fn initial_timeout_ms(config: &Config, rng: &mut impl Rng) -> u64 {
    if let Some(schedule) = config.fixed_retransmit_schedule_ms {
        return schedule[0];
    }
    let lo = config.ack_timeout_ms as f64;
    let hi = lo * config.ack_random_factor;
    if hi > lo {
        rng.gen_range(lo..=hi) as u64
    } else {
        lo as u64
    }
}

/// `T(n+1) = 2 * T(n)`, or the `n`th entry of a fixed schedule.
fn next_timeout_ms(config: &Config, attempt: u32, previous_timeout_ms: u64) -> u64 {
    if let Some(schedule) = config.fixed_retransmit_schedule_ms {
        let index = (attempt as usize).min(schedule.len() - 1);
        return schedule[index];
    }
    previous_timeout_ms * 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn fixed_schedule_matches_the_conformance_sequence() {
        let config = Config::default().with_fixed_retransmit_schedule([2000, 4000, 8000, 16000, 32000]);
        let mut rng = rand::rngs::SmallRng::seed_from_u64(0);
        let mut txn = Transaction::new(1, vec![1], vec![0xff], 0, &config, &mut rng);
        assert_eq!(txn.next_fire_at, 2000);

        let mut now = txn.next_fire_at;
        let mut fired = vec![now];
        loop {
            if !txn.record_retransmit(now) {
                break;
            }
            now = txn.next_fire_at;
            fired.push(now);
        }
        assert_eq!(fired, vec![2000, 6000, 14000, 30000, 62000]);
        assert_eq!(txn.state, TransactionState::TimedOut);
        assert_eq!(txn.retransmit_count, 4);
    }

    #[test]
    fn initial_timeout_is_within_the_jitter_bounds() {
        let config = Config::default();
        let mut rng = rand::rngs::SmallRng::seed_from_u64(7);
        for _ in 0..50 {
            let txn = Transaction::new(1, vec![1], vec![], 0, &config, &mut rng);
            assert!(txn.next_fire_at >= config.ack_timeout_ms);
            assert!(txn.next_fire_at as f64 <= config.ack_timeout_ms as f64 * config.ack_random_factor);
        }
    }
}
