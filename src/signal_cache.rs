use crate::models::{Direction, Signal};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Relative entry distance under which two same-direction signals are the same setup.
pub const DEFAULT_ENTRY_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedSignal {
    pub direction: Direction,
    pub entry: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Last emitted signal per (symbol, strategy). Owned by the caller and shared
/// by cloning; clones see the same entries.
#[derive(Clone)]
pub struct SignalCache {
    entries: Arc<DashMap<String, CachedSignal>>,
    entry_tolerance: f64,
}

impl Default for SignalCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalCache {
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_ENTRY_TOLERANCE)
    }

    pub fn with_tolerance(entry_tolerance: f64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            entry_tolerance: entry_tolerance.max(0.0),
        }
    }

    pub fn cache_key(symbol: &str, strategy: &str) -> String {
        format!("{}:{}", symbol.trim().to_ascii_uppercase(), strategy.trim())
    }

    pub fn is_duplicate(&self, symbol: &str, strategy: &str, signal: &Signal) -> bool {
        let key = Self::cache_key(symbol, strategy);
        let Some(last) = self.entries.get(&key) else {
            return false;
        };
        if last.direction != signal.direction {
            return false;
        }
        if last.entry == 0.0 {
            return signal.entry == 0.0;
        }
        ((signal.entry - last.entry) / last.entry).abs() <= self.entry_tolerance
    }

    pub fn record(&self, symbol: &str, strategy: &str, signal: &Signal) {
        self.entries.insert(
            Self::cache_key(symbol, strategy),
            CachedSignal {
                direction: signal.direction,
                entry: signal.entry,
                recorded_at: Utc::now(),
            },
        );
    }

    pub fn get(&self, symbol: &str, strategy: &str) -> Option<CachedSignal> {
        self.entries
            .get(&Self::cache_key(symbol, strategy))
            .map(|entry| entry.clone())
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(direction: Direction, entry: f64) -> Signal {
        Signal {
            direction,
            entry,
            stop_loss: entry * 0.99,
            targets: Vec::new(),
            confidence: 60.0,
            timeframe: "15m".to_string(),
        }
    }

    #[test]
    fn same_direction_near_entry_is_duplicate() {
        let cache = SignalCache::new();
        let first = signal(Direction::Long, 100.0);
        assert!(!cache.is_duplicate("btcusdt", "session_trader", &first));
        cache.record("btcusdt", "session_trader", &first);

        assert!(cache.is_duplicate("BTCUSDT", "session_trader", &signal(Direction::Long, 100.3)));
        assert!(!cache.is_duplicate("BTCUSDT", "session_trader", &signal(Direction::Long, 101.0)));
        assert!(!cache.is_duplicate("BTCUSDT", "session_trader", &signal(Direction::Short, 100.0)));
        assert!(!cache.is_duplicate("ETHUSDT", "session_trader", &first));
        assert!(!cache.is_duplicate("BTCUSDT", "trend_rider", &first));
    }

    #[test]
    fn clones_share_entries_and_clear() {
        let cache = SignalCache::new();
        let shared = cache.clone();
        shared.record("SOLUSDT", "scalper_pro", &signal(Direction::Short, 20.0));
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.get("SOLUSDT", "scalper_pro").map(|c| c.direction),
            Some(Direction::Short)
        );
        cache.clear();
        assert!(shared.is_empty());
    }
}
