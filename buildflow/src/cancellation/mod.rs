//! Cooperative cancellation.
//!
//! Cancellation is checked only between stages and sub-tasks; nothing is
//! interrupted mid-flight.

mod token;

pub use token::CancellationToken;
