use std::time::Duration;

use rand::Rng;

/// Exponential backoff with a cap and optional full jitter.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, jitter: bool) -> Self {
        Self { base, cap, jitter }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        let mut rng = rand::thread_rng();
        self.delay_with_rng(attempt, &mut rng)
    }

    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base_ms = self.base.as_millis().min(u128::from(u64::MAX)) as u64;
        let cap_ms = self.cap.as_millis().min(u128::from(u64::MAX)) as u64;

        let mut delay_ms = base_ms.min(cap_ms);
        for _ in 0..attempt.min(32) {
            if delay_ms >= cap_ms {
                delay_ms = cap_ms;
                break;
            }
            delay_ms = delay_ms.saturating_mul(2).min(cap_ms);
        }

        if self.jitter && delay_ms > 0 {
            delay_ms = rng.gen_range(0..=delay_ms);
        }
        Duration::from_millis(delay_ms)
    }
}
