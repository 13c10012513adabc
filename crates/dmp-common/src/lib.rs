//! DMP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared error handling, logging, and hashing utilities for the DMP
//! (DBF Migration Platform) workspace.
//!
//! # Overview
//!
//! - **Error Handling**: workspace-wide error and result types
//! - **Logging**: tracing-based structured logging bootstrap
//! - **Hashing**: SHA-256 hashing for personally-identifying fields
//!
//! # Example
//!
//! ```
//! use dmp_common::hashing::hash_pii;
//!
//! // PII values are normalized before hashing, so formatting noise
//! // does not produce distinct digests.
//! assert_eq!(hash_pii("  Somchai  "), hash_pii("SOMCHAI"));
//! assert_eq!(hash_pii("   "), None);
//! ```

pub mod error;
pub mod hashing;
pub mod logging;

// Re-export commonly used types
pub use error::{DmpError, Result};
