//! Log throttling utility
//!
//! Completions that cannot be matched to a buffer, full channels and similar
//! per-frame conditions can fire at frame rate. The throttler limits how often
//! the same message is recorded and counts what it suppressed in between.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy)]
struct Entry {
    last: Instant,
    suppressed: u64,
}

/// Limits how often the same message key is logged
///
/// ```rust
/// use std::time::Duration;
/// use framegrab::utils::LogThrottler;
///
/// let throttler = LogThrottler::new(Duration::from_secs(5));
/// assert!(throttler.should_log("unmatched_frame"));
/// assert!(!throttler.should_log("unmatched_frame"));
/// assert_eq!(throttler.suppressed("unmatched_frame"), 1);
/// ```
pub struct LogThrottler {
    entries: Mutex<HashMap<String, Entry>>,
    interval: Duration,
}

impl LogThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            interval,
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Returns `true` if a message for `key` may be logged now.
    ///
    /// A `true` result restarts the interval and resets the suppressed count.
    pub fn should_log(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) if now.duration_since(entry.last) < self.interval => {
                entry.suppressed += 1;
                false
            }
            Some(entry) => {
                entry.last = now;
                entry.suppressed = 0;
                true
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        last: now,
                        suppressed: 0,
                    },
                );
                true
            }
        }
    }

    /// Messages dropped for `key` since it was last logged
    pub fn suppressed(&self, key: &str) -> u64 {
        self.entries.lock().get(key).map_or(0, |e| e.suppressed)
    }

    /// Forget `key`, so its next occurrence is logged immediately
    pub fn clear(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for LogThrottler {
    fn default() -> Self {
        Self::with_secs(5)
    }
}

/// Throttled `tracing::warn!`
#[macro_export]
macro_rules! warn_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::warn!($($arg)*);
        }
    };
}

/// Throttled `tracing::error!`
#[macro_export]
macro_rules! error_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::error!($($arg)*);
        }
    };
}

/// Throttled `tracing::debug!`
#[macro_export]
macro_rules! debug_throttled {
    ($throttler:expr, $key:expr, $($arg:tt)*) => {
        if $throttler.should_log($key) {
            tracing::debug!($($arg)*);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_first_call_is_logged() {
        let throttler = LogThrottler::with_secs(1);
        assert!(throttler.should_log("key"));
        assert_eq!(throttler.len(), 1);
    }

    #[test]
    fn test_throttling_expires() {
        let throttler = LogThrottler::new(Duration::from_millis(100));
        assert!(throttler.should_log("key"));
        assert!(!throttler.should_log("key"));
        assert!(!throttler.should_log("key"));
        assert_eq!(throttler.suppressed("key"), 2);

        thread::sleep(Duration::from_millis(150));
        assert!(throttler.should_log("key"));
        assert_eq!(throttler.suppressed("key"), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("a"));
        assert!(throttler.should_log("b"));
        assert!(!throttler.should_log("a"));
        assert_eq!(throttler.suppressed("b"), 0);
    }

    #[test]
    fn test_clear() {
        let throttler = LogThrottler::with_secs(10);
        assert!(throttler.should_log("a"));
        assert!(throttler.should_log("b"));

        throttler.clear("a");
        assert!(throttler.should_log("a"));
        assert!(!throttler.should_log("b"));

        throttler.clear_all();
        assert!(throttler.is_empty());
    }

    #[test]
    fn test_macro_compiles_against_throttler() {
        let throttler = LogThrottler::default();
        warn_throttled!(throttler, "macro", "first {}", 1);
        debug_throttled!(throttler, "macro", "second {}", 2);
        assert_eq!(throttler.suppressed("macro"), 1);
    }
}
