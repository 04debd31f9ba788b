pub mod message;
pub mod property;
pub mod user;

// Re-export for convenience
pub use message::Message;
pub use property::{OwnerContact, Property};
pub use user::{Profile, Role, User};
