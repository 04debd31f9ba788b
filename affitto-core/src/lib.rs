//! affitto-core: types shared between client and server (models, HTTP DTOs,
//! WS events, errors). No I/O in this crate.

pub mod error;
pub mod models;
pub mod protocol;
pub mod utils;

// Re-exports to shorten paths in the server crate
pub use error::Error;
pub use models::{message::Message, property::Property, user::Role, user::User};
pub use protocol::http::{
    AuthResponse, ConfirmPaymentRequest, ConfirmPaymentResponse, ContactRequest,
    CreatePaymentIntentRequest, CreatePaymentIntentResponse, LoginRequest, PropertyQuery,
    RegisterRequest, StatusResponse, UpdateProfileRequest,
};
pub use protocol::ws::{ClientEvent, EventError, GetMessages, SendMessage, ServerEvent};
pub use utils::{new_id, now_micros, now_timestamp, rfc3339_from_micros};
