use std::time::Duration;

/// Conditions under which the host flushes accumulated messages to a
/// batch output.
///
/// A batch is flushed as soon as any enabled condition is met. Zero / `None`
/// disables a condition; with everything disabled every message is its own
/// batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Flush after this many messages.
    pub count: usize,
    /// Flush once the summed payload size reaches this many bytes.
    pub byte_size: usize,
    /// Flush a non-empty batch after this much time since its first message.
    pub period: Option<Duration>,
}

impl BatchPolicy {
    /// No condition enabled: one message per batch.
    pub fn is_noop(&self) -> bool {
        self.count == 0 && self.byte_size == 0 && self.period.is_none()
    }

    /// Whether a batch holding `count` messages / `bytes` bytes must be
    /// flushed now (period is checked by the caller's timer).
    pub fn is_full(&self, count: usize, bytes: usize) -> bool {
        if count == 0 {
            return false;
        }
        if self.count == 0 && self.byte_size == 0 {
            // Only a period (or nothing) configured: without a period, flush
            // each message immediately.
            return self.period.is_none();
        }
        (self.count > 0 && count >= self.count) || (self.byte_size > 0 && bytes >= self.byte_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_policy_flushes_every_message() {
        let policy = BatchPolicy::default();
        assert!(policy.is_noop());
        assert!(!policy.is_full(0, 0));
        assert!(policy.is_full(1, 10));
    }

    #[test]
    fn count_and_byte_thresholds() {
        let policy = BatchPolicy {
            count: 3,
            byte_size: 100,
            period: None,
        };
        assert!(!policy.is_full(2, 50));
        assert!(policy.is_full(3, 50));
        assert!(policy.is_full(1, 100));
    }

    #[test]
    fn period_only_never_fills_by_size() {
        let policy = BatchPolicy {
            count: 0,
            byte_size: 0,
            period: Some(Duration::from_secs(1)),
        };
        assert!(!policy.is_noop());
        assert!(!policy.is_full(1000, 1 << 20));
    }
}
