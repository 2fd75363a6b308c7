//! Wrapper types around a [`Backend`](crate::backend::Backend).
//!
//! An adapter implements `Backend` itself and forwards to the wrapped backend,
//! so sessions and panels accept it wherever they accept the inner one.
//!
//! # Available Wrappers
//!
//! | Wrapper | Description |
//! |---------|-------------|
//! | [`Delayed`] | Adds request and response latency to every call except pushes |
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use interruttore::adapters::Delayed;
//! use interruttore::backend::LocalBackend;
//! use interruttore::config::Config;
//!
//! let remote = Delayed::new(LocalBackend::new(&Config::default()), Duration::from_millis(20))
//!     .with_response_latency(Duration::from_millis(80));
//!
//! // The wrapped backend stays reachable for setup.
//! remote.provision("bigRed", 10);
//! assert_eq!(remote.counters().reading("bigRed").unwrap().total, 10);
//! let _shared = Arc::new(remote);
//! ```

mod delayed;

pub use delayed::Delayed;
