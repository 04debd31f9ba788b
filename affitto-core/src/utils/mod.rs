pub mod ids;
pub mod time;

pub use ids::new_id;
pub use time::{now_micros, now_timestamp, rfc3339_from_micros};
