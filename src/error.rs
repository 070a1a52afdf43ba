//! # Error Handling
//!
//! Error types for the chat synchronization core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Network Errors                                                    │
//! │  │   ├── Network      - Transient transport/server failure             │
//! │  │   └── Timeout      - Remote call exceeded its deadline              │
//! │  │                                                                      │
//! │  ├── Authorization Errors                                              │
//! │  │   └── Unauthorized - Server rejected the operation                  │
//! │  │                                                                      │
//! │  ├── Consistency Errors                                                │
//! │  │   └── NotFound     - Entity vanished before confirmation            │
//! │  │                                                                      │
//! │  ├── Cache Errors                                                      │
//! │  │   └── Cache        - Local persistence failed (never fatal)         │
//! │  │                                                                      │
//! │  └── Engine Errors                                                     │
//! │      ├── InvalidMessage - Draft failed validation                      │
//! │      ├── Busy           - Per-conversation operation already in flight │
//! │      ├── Serialization  - Payload encode/decode failed                 │
//! │      └── Internal       - Invariant violation (should not happen)      │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation Policy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      PROPAGATION POLICY                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Read path     Network failure degrades to cached data; the caller     │
//! │                sees an offline flag, not a hole in the UI.             │
//! │                                                                         │
//! │  Write path    Network failure keeps the optimistic mutation visible   │
//! │                (pending-with-error), never silently discards it.       │
//! │                                                                         │
//! │  Cache         Always logged, never propagated. Persistence is a       │
//! │                convenience, not a source of truth.                     │
//! │                                                                         │
//! │  Everything in this layer is retryable by re-invoking the same         │
//! │  operation.                                                            │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for chat core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the chat synchronization core
///
/// All errors are categorized by failure domain so that callers can apply
/// the right recovery policy without string-matching messages.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Network Errors (100-199)
    // ========================================================================

    /// Transient network or server failure
    #[error("Network request failed: {0}")]
    Network(String),

    /// Remote call exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ========================================================================
    // Authorization Errors (200-299)
    // ========================================================================

    /// The server rejected the operation for this actor
    #[error("Operation rejected by the server: {0}")]
    Unauthorized(String),

    // ========================================================================
    // Consistency Errors (300-399)
    // ========================================================================

    /// The entity no longer exists on the server
    #[error("Entity not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Cache Errors (400-499)
    // ========================================================================

    /// Local persistence failed
    #[error("Cache unavailable: {0}")]
    Cache(String),

    // ========================================================================
    // Engine Errors (500-599)
    // ========================================================================

    /// The message draft failed validation
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Another operation is already in flight for this conversation
    #[error("An operation is already in flight for this conversation")]
    Busy,

    /// Payload serialization or deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Get the numeric error code for this error
    ///
    /// Error codes are organized by category:
    /// - 100-199: Network
    /// - 200-299: Authorization
    /// - 300-399: Consistency
    /// - 400-499: Cache
    /// - 500-599: Engine
    pub fn code(&self) -> i32 {
        match self {
            // Network (100-199)
            Error::Network(_) => 100,
            Error::Timeout(_) => 101,

            // Authorization (200-299)
            Error::Unauthorized(_) => 200,

            // Consistency (300-399)
            Error::NotFound(_) => 300,

            // Cache (400-499)
            Error::Cache(_) => 400,

            // Engine (500-599)
            Error::InvalidMessage(_) => 500,
            Error::Busy => 501,
            Error::Serialization(_) => 502,
            Error::Internal(_) => 503,
        }
    }

    /// Check if this error is recoverable by retrying the same operation
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::Busy | Error::Cache(_)
        )
    }

    /// Check if this error came from the network layer
    ///
    /// Network errors trigger cache fallback on reads and leave optimistic
    /// state visible on writes.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Timeout(_))
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Cache(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================
