//! Secret types for protecting sensitive values from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Use them for all
//! sensitive values - the store password and TURN credentials in particular.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` while holding one cannot leak the value via `{:?}` or
//! tracing. Secrets are zeroized when dropped.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreConfig {
//!     host: String,
//!     password: SecretString, // Debug shows "[REDACTED]"
//! }
//!
//! let cfg = StoreConfig {
//!     host: "localhost".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! // Safe - password is redacted.
//! println!("{cfg:?}");
//!
//! // Access requires an explicit expose_secret() call.
//! let password: &str = cfg.password.expose_secret();
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
