//! Small shared helpers.

pub mod timestamps;

pub use timestamps::{format_timestamp, iso_timestamp, parse_timestamp, Timestamp};
