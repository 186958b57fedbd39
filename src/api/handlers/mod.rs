//! API request handlers.

/// Research submission, status, cancellation and progress events.
pub mod research;
