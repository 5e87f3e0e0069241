//! Shared utilities: timestamps and id generation.

mod timestamps;
mod uuid_utils;

pub use timestamps::{iso_timestamp, now_utc, Timestamp};
pub use uuid_utils::generate_uuid;
