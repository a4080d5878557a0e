/// Strategy for computing the delay between retry attempts.
pub trait Backoff {
    fn base_delay_ms(&self) -> u64;

    /// Computes the delay to use after a failure that waited `current_ms`.
    fn next_delay_ms(&self, current_ms: u64) -> u64;
}

/// Multiplicative backoff with an upper cap.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    multiplier: u64,
    cap_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(base_delay_ms: u64, multiplier: u64, cap_ms: u64) -> Self {
        Self {
            base_delay_ms,
            multiplier,
            cap_ms,
        }
    }

    /// The policy network-facing loops use: 500ms doubling, capped at 30s.
    pub fn network() -> Self {
        Self::new(500, 2, 30_000)
    }
}

impl Backoff for ExponentialBackoff {
    fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    fn next_delay_ms(&self, current_ms: u64) -> u64 {
        (current_ms.saturating_mul(self.multiplier)).min(self.cap_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_caps() {
        let b = ExponentialBackoff::new(500, 2, 30_000);
        let mut d = b.base_delay_ms();
        for _ in 0..10 {
            d = b.next_delay_ms(d);
        }
        assert_eq!(d, 30_000);
    }
}
