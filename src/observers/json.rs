//! JSON observer for tallies and board snapshots.
//!
//! # Feature Flag
//!
//! This module requires the `json` feature:
//!
//! ```toml
//! [dependencies]
//! interruttore = { version = "0.1", features = ["json"] }
//! ```
//!
//! # Examples
//!
//! ```rust
//! use interruttore::counters::tally::Tally;
//! use interruttore::counters::Observable;
//! use interruttore::observers::json::JsonObserver;
//!
//! let increments = Tally::new().with_name("increments");
//! let dropped = Tally::new().with_name("dropped");
//! increments.add(1000);
//! dropped.add(5);
//!
//! let counters: Vec<&dyn Observable> = vec![&increments, &dropped];
//! let json = JsonObserver::new().to_json(counters.into_iter()).unwrap();
//! assert_eq!(
//!     json,
//!     r#"[{"name":"increments","value":1000},{"name":"dropped","value":5}]"#
//! );
//! ```

use serde::Serialize;

use super::Result;
use crate::backend::LocalBackend;
use crate::counters::Observable;
use crate::snapshot::{BoardSnapshot, CounterSnapshot};

/// Configuration for the JSON observer.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    /// Whether to pretty-print the JSON output.
    pub pretty: bool,
    /// Whether board snapshots carry a timestamp.
    pub include_timestamp: bool,
}

/// An observer that serializes counters and boards to JSON.
///
/// ```rust
/// use interruttore::backend::LocalBackend;
/// use interruttore::config::Config;
/// use interruttore::observers::json::JsonObserver;
///
/// let backend = LocalBackend::new(&Config::default());
/// backend.click("mainSwitch", &"u1".into()).unwrap();
///
/// let json = JsonObserver::new()
///     .pretty(true)
///     .include_timestamp(true)
///     .render_board(&backend, 10)
///     .unwrap();
/// assert!(json.contains("\"timestamp_ms\""));
/// assert!(json.contains("\"mainSwitch\""));
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonObserver {
    config: JsonConfig,
}

impl JsonObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: JsonConfig) -> Self {
        Self { config }
    }

    /// Enables or disables pretty-printing.
    pub fn pretty(mut self, enabled: bool) -> Self {
        self.config.pretty = enabled;
        self
    }

    /// Enables or disables the timestamp of board snapshots.
    pub fn include_timestamp(mut self, enabled: bool) -> Self {
        self.config.include_timestamp = enabled;
        self
    }

    /// Collects counters into a vector of [`CounterSnapshot`].
    pub fn collect<'a>(
        &self,
        counters: impl Iterator<Item = &'a dyn Observable>,
    ) -> Vec<CounterSnapshot> {
        counters.map(CounterSnapshot::from_observable).collect()
    }

    /// Serializes counters to a JSON array of `{name, value}`.
    pub fn to_json<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        self.encode(&self.collect(counters))
    }

    /// Captures `backend` and serializes the [`BoardSnapshot`].
    pub fn render_board(&self, backend: &LocalBackend, limit: usize) -> Result<String> {
        let mut snapshot = BoardSnapshot::capture(backend, limit)?;
        if self.config.include_timestamp {
            snapshot = snapshot.with_timestamp(current_timestamp_ms());
        }
        self.encode(&snapshot)
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }
}

/// Returns the current timestamp in milliseconds since Unix epoch.
fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(millis_saturating)
        .unwrap_or(0)
}

fn millis_saturating(elapsed: std::time::Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::counters::tally::Tally;
    use crate::faults::FaultPoint;
    use crate::observers::ObserverError;

    #[test]
    fn test_to_json_empty() {
        let counters: Vec<&dyn Observable> = vec![];
        let json = JsonObserver::new().to_json(counters.into_iter()).unwrap();
        assert_eq!(json, "[]");
    }

    #[test]
    fn test_to_json_backend_stats() {
        let backend = LocalBackend::new(&Config::default());
        backend.click("mainSwitch", &"u1".into()).unwrap();

        let json = JsonObserver::new()
            .to_json(backend.stats().observables().into_iter())
            .unwrap();
        assert!(json.starts_with(r#"[{"name":"increments","value":1}"#));
        assert!(json.contains(r#"{"name":"derived_failures","value":0}"#));
    }

    #[test]
    fn test_pretty_output() {
        let tally = Tally::new().with_name("pretty");
        tally.record();
        let counters: Vec<&dyn Observable> = vec![&tally];
        let json = JsonObserver::new()
            .pretty(true)
            .to_json(counters.into_iter())
            .unwrap();
        assert!(json.contains('\n'));
        assert!(json.contains("\"pretty\""));
    }

    #[test]
    fn test_render_board_roundtrips() {
        let backend = LocalBackend::new(&Config::default());
        for _ in 0..3 {
            backend.click("mainSwitch", &"u1".into()).unwrap();
        }
        let json = JsonObserver::new().render_board(&backend, 5).unwrap();
        assert!(!json.contains("timestamp_ms"));

        let parsed: BoardSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.button("mainSwitch").unwrap().total, 3);
        assert_eq!(parsed.leaderboard[0].total_clicks, 3);
        assert_eq!(parsed.stat("increments"), Some(3));
    }

    #[test]
    fn test_render_board_with_timestamp() {
        let backend = LocalBackend::new(&Config::default());
        let json = JsonObserver::with_config(JsonConfig {
            pretty: false,
            include_timestamp: true,
        })
        .render_board(&backend, 5)
        .unwrap();
        let parsed: BoardSnapshot = serde_json::from_str(&json).unwrap();
        assert!(parsed.timestamp_ms.unwrap_or(0) > 0);
    }

    #[test]
    fn test_timestamp_millis_saturate() {
        assert_eq!(millis_saturating(std::time::Duration::from_millis(1500)), 1500);
        assert_eq!(millis_saturating(std::time::Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_render_board_read_error() {
        let backend = LocalBackend::new(&Config::default());
        backend.faults().fail_next(FaultPoint::Read, 1);
        let err = JsonObserver::new().render_board(&backend, 5).unwrap_err();
        assert!(matches!(err, ObserverError::Read(_)));
    }
}
