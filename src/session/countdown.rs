use crate::common::types::remaining_percentage;

/// Remaining-time bookkeeping for one disappearing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    total: u32,
    remaining: u32,
}

impl Countdown {
    /// Picks up a countdown at `remaining`, capped at `total`. `None` when
    /// there is nothing to count down.
    pub fn resume(total: u32, remaining: u32) -> Option<Self> {
        if total == 0 || remaining == 0 {
            return None;
        }
        Some(Self {
            total,
            remaining: remaining.min(total),
        })
    }

    /// Advances by one tick and returns the new remaining time.
    pub fn tick(&mut self) -> u32 {
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn is_expired(&self) -> bool {
        self.remaining == 0
    }

    pub fn percentage(&self) -> f64 {
        remaining_percentage(self.remaining, self.total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_duration_has_no_countdown() {
        assert_eq!(Countdown::resume(0, 5), None);
        assert_eq!(Countdown::resume(10, 0), None);
    }

    #[test]
    fn ticks_down_to_zero_and_stays_there() {
        let mut countdown = Countdown::resume(3, 3).unwrap();
        assert_eq!(countdown.tick(), 2);
        assert_eq!(countdown.tick(), 1);
        assert_eq!(countdown.tick(), 0);
        assert!(countdown.is_expired());
        assert_eq!(countdown.tick(), 0);
    }

    #[test]
    fn percentage_sequence_for_ten_seconds() {
        let mut countdown = Countdown::resume(10, 10).unwrap();
        let mut seen = vec![countdown.percentage()];
        while !countdown.is_expired() {
            countdown.tick();
            seen.push(countdown.percentage());
        }
        let expected: Vec<f64> = (0..=10).rev().map(|step| f64::from(step * 10)).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn resume_caps_remaining_at_total() {
        let countdown = Countdown::resume(10, 25).unwrap();
        assert_eq!(countdown.remaining(), 10);
        assert_eq!(countdown.percentage(), 100.0);
    }
}
