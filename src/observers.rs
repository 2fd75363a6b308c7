//! Exporters for counters and backend state.
//!
//! - [`json`] - Serialize tallies, or a whole [`BoardSnapshot`](crate::snapshot::BoardSnapshot),
//!   to JSON
//!
//! # Unified Error Handling
//!
//! Exporters return [`ObserverError`], which wraps both serialization errors
//! and failed backend reads.
//!
//! # Feature Flags
//!
//! - `json` - Enables the [`json`] module
//! - `full` - Enables all observer modules
//!
//! # Example
//!
//! ```rust,ignore
//! use interruttore::backend::LocalBackend;
//! use interruttore::config::Config;
//! use interruttore::observers::json::JsonObserver;
//!
//! let backend = LocalBackend::new(&Config::default());
//! let json = JsonObserver::new().pretty(true).render_board(&backend, 10)?;
//! println!("{json}");
//! ```

mod error;

pub use error::{ObserverError, Result};

#[cfg(feature = "json")]
pub mod json;
