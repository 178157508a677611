// Reconnect delay schedule.

use std::time::Duration;

use colloquy_core::config::ReconnectConfig;

const DEFAULT_TABLE_MS: [u64; 4] = [1_000, 2_000, 5_000, 10_000];

/// Table-driven backoff: attempt `n` (1-based) waits `table[n - 1]`, and
/// every attempt past the end of the table waits the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffPolicy {
    table: Vec<Duration>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            table: DEFAULT_TABLE_MS.iter().map(|ms| Duration::from_millis(*ms)).collect(),
        }
    }
}

impl BackoffPolicy {
    /// An empty table falls back to the default schedule.
    pub fn new(table: Vec<Duration>) -> Self {
        if table.is_empty() {
            return Self::default();
        }
        BackoffPolicy { table }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(config.backoff())
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) - 1) as usize;
        let index = index.min(self.table.len() - 1);
        self.table[index]
    }

    /// Longest delay the schedule will ever produce.
    pub fn cap(&self) -> Duration {
        self.table[self.table.len() - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn default_schedule_is_monotonic_then_capped() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (1..=6).map(|n| policy.delay_for(n)).collect();
        assert_eq!(delays, vec![secs(1), secs(2), secs(5), secs(10), secs(10), secs(10)]);
        assert_eq!(policy.cap(), secs(10));
    }

    #[test]
    fn attempt_zero_reads_as_first() {
        assert_eq!(BackoffPolicy::default().delay_for(0), secs(1));
    }

    #[test]
    fn far_attempts_stay_capped() {
        assert_eq!(BackoffPolicy::default().delay_for(u32::MAX), secs(10));
    }

    #[test]
    fn empty_table_falls_back_to_default() {
        assert_eq!(BackoffPolicy::new(Vec::new()), BackoffPolicy::default());
    }

    #[test]
    fn from_config_uses_configured_table() {
        let config = ReconnectConfig {
            backoff_ms: vec![250, 750],
        };
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(5), Duration::from_millis(750));
    }
}
