//! Basic type definitions for the cable hub
//!
//! Provides identity helpers:
//! - `ClientId`: UUID-based unique connection identifier
//! - `unique_name`: process-wide counter for anonymous display names

use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Unique connection identifier (newtype pattern)
///
/// Wraps a UUID v4. Used as the opaque source reference of a message so the
/// room worker can skip the sender at fan-out time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(pub Uuid);

impl ClientId {
    /// Create a new random client ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

static UNIQUE_ID: AtomicU64 = AtomicU64::new(0);

/// Next anonymous display name
///
/// Decimal value of a monotonically increasing process-wide counter.
/// Values are never reused.
pub fn unique_name() -> String {
    (UNIQUE_ID.fetch_add(1, Ordering::Relaxed) + 1).to_string()
}
