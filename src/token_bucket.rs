use std::time::Instant;

use crate::rate::Rate;

/// Token bucket with lazy refill.
///
/// Tokens are credited from the time elapsed since the previous call,
/// so the bucket needs no timer between calls.
/// `0 <= tokens <= capacity` always holds.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(rate: Rate, now: Instant) -> Self {
        Self {
            capacity: rate.capacity(),
            refill_per_sec: rate.refill_per_sec(),
            tokens: rate.capacity(),
            last_refill: now,
        }
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Token level as of the last call.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Consume one token.
    pub fn try_consume(&mut self, now: Instant) -> bool {
        self.try_consume_n(1.0, now)
    }

    /// Consume `cost` tokens if available.
    ///
    /// Returns `false` and leaves the level untouched when fewer than
    /// `cost` tokens remain after refilling.
    pub fn try_consume_n(&mut self, cost: f64, now: Instant) -> bool {
        self.refill(now);
        if self.tokens < cost {
            return false;
        }
        self.tokens -= cost;
        true
    }

    fn refill(&mut self, now: Instant) {
        // an earlier `now` credits nothing and must not rewind `last_refill`
        let elapsed = now.saturating_duration_since(self.last_refill);
        let refilled = self.tokens + elapsed.as_secs_f64() * self.refill_per_sec;
        self.tokens = refilled.min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    fn bucket(rate: f64, per: u64, now: Instant) -> TokenBucket {
        TokenBucket::new(Rate::new(rate, Duration::from_secs(per)).unwrap(), now)
    }

    #[test]
    fn admits_capacity_then_rejects() {
        let now = Instant::now();
        for capacity in [1, 2, 5, 10, 100] {
            let mut tb = bucket(capacity as f64, 1, now);
            for _ in 0..capacity {
                assert!(tb.try_consume(now));
            }
            assert!(!tb.try_consume(now));
            assert!(!tb.try_consume(now));
        }
    }

    #[test]
    fn slow_refill_scenario() {
        // 5 per 8 seconds = 0.625 tokens/s
        let t0 = Instant::now();
        let mut tb = bucket(5.0, 8, t0);
        for _ in 0..5 {
            assert!(tb.try_consume(t0));
        }
        assert!(!tb.try_consume(t0));

        let t1 = t0 + Duration::from_millis(1600);
        assert!(tb.try_consume(t1));
        assert!(!tb.try_consume(t1));
    }

    #[test]
    fn refill_is_clamped() {
        let t0 = Instant::now();
        let mut tb = bucket(3.0, 1, t0);
        assert!(tb.try_consume(t0));
        // zero cost only refills
        assert!(tb.try_consume_n(0.0, t0 + Duration::from_secs(3600)));
        assert_eq!(tb.tokens(), 3.0);
        assert!(tb.try_consume_n(0.0, t0 + Duration::from_secs(7200)));
        assert_eq!(tb.tokens(), 3.0);

        let t1 = t0 + Duration::from_secs(7200);
        for _ in 0..3 {
            assert!(tb.try_consume(t1));
        }
        assert!(!tb.try_consume(t1));
    }

    #[test]
    fn recovers_once_one_token_refilled() {
        let t0 = Instant::now();
        let mut tb = bucket(1.0, 1, t0);
        assert!(tb.try_consume(t0));
        assert!(!tb.try_consume(t0 + Duration::from_millis(250)));
        assert_eq!(tb.tokens(), 0.25);
        assert!(tb.try_consume(t0 + Duration::from_secs(1)));
        assert!(!tb.try_consume(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn boundary_exactly_one_token() {
        let now = Instant::now();
        let mut tb = bucket(1.0, 1, now);
        assert_eq!(tb.tokens(), 1.0);
        assert!(tb.try_consume(now));
        assert_eq!(tb.tokens(), 0.0);
    }

    #[test]
    fn clock_going_backwards_creates_no_tokens() {
        let t0 = Instant::now() + Duration::from_secs(10);
        let mut tb = bucket(1.0, 1, t0);
        assert!(tb.try_consume(t0));
        let earlier = t0 - Duration::from_secs(5);
        assert!(!tb.try_consume(earlier));
        // still measured from t0, not from `earlier`
        assert!(!tb.try_consume(t0 + Duration::from_millis(500)));
        assert!(tb.try_consume(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn variable_cost() {
        let now = Instant::now();
        let mut tb = bucket(80.0, 1, now);
        assert!(tb.try_consume_n(10.0, now));
        assert!(!tb.try_consume_n(90.0, now));
        assert_eq!(tb.tokens(), 70.0);
        assert!(tb.try_consume_n(70.0, now));
        assert!(!tb.try_consume(now));
    }
}
