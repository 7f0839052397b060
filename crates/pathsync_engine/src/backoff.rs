use std::time::Duration;

use rand::Rng;

use crate::settings::BackoffSettings;

#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    settings: BackoffSettings,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(settings: BackoffSettings) -> Self {
        Self {
            settings,
            attempt: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let spread = if self.settings.jitter > 0.0 {
            rand::thread_rng().gen_range(-self.settings.jitter..=self.settings.jitter)
        } else {
            0.0
        };
        let delay = self.delay_for(self.attempt, spread);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    fn delay_for(&self, attempt: u32, spread: f64) -> Duration {
        let initial = self.settings.initial.as_secs_f64();
        let max = self.settings.max.as_secs_f64();
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = (initial * self.settings.multiplier.max(1.0).powi(exponent)).min(max);
        let secs = (base * (1.0 + spread)).clamp(0.0, max);
        Duration::from_secs_f64(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_exponentially_up_to_cap() {
        let mut backoff = Backoff::new(BackoffSettings {
            jitter: 0.0,
            ..BackoffSettings::default()
        });
        let delays: Vec<_> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let mut backoff = Backoff::new(BackoffSettings::default());
        for _ in 0..50 {
            let delay = backoff.next_delay();
            assert!(delay <= Duration::from_secs(30));
        }
        let backoff = Backoff::new(BackoffSettings::default());
        assert!((backoff.delay_for(2, 0.2).as_secs_f64() - 4.8).abs() < 1e-6);
        assert!((backoff.delay_for(2, -0.2).as_secs_f64() - 3.2).abs() < 1e-6);
        assert_eq!(backoff.delay_for(9, 0.2), Duration::from_secs(30));
    }

    #[test]
    fn fixed_delay_never_changes() {
        let mut backoff = Backoff::new(BackoffSettings::fixed(Duration::from_millis(1500)));
        for _ in 0..5 {
            assert_eq!(backoff.next_delay(), Duration::from_millis(1500));
        }
    }
}
