//! Resilience primitives.
//!
//! # Data Flow
//! ```text
//! Failed reconciliation:
//!     → backoff.rs (per-item exponential delay)
//!     → bucket.rs (overall pacing across items)
//!     → work queue re-adds the item after max(delays)
//! ```
//!
//! # Design Decisions
//! - Jittered backoff prevents retry storms when many objects fail together
//! - The bucket paces, it never rejects; every failure is eventually retried

pub mod backoff;
pub mod bucket;

pub use backoff::calculate_backoff;
pub use bucket::TokenBucket;
