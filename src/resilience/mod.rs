//! Retry and backoff for transient backend failures.

pub mod backoff;
pub mod retry;
