//! Transaction log codec and log segment discovery (spec §4.1, §4.2).

pub mod codec;
pub mod segment;

pub use codec::{parse_actions, serialize_actions};
pub use segment::LogSegment;
