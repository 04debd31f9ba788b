pub mod http;
pub mod ws;

// Convenience re-exports
pub use http::{
    AuthResponse, ConfirmPaymentRequest, ConfirmPaymentResponse, ContactRequest,
    CreatePaymentIntentRequest, CreatePaymentIntentResponse, LoginRequest, PropertyQuery,
    RegisterRequest, StatusResponse, UpdateProfileRequest,
};
pub use ws::{ClientEvent, EventError, GetMessages, SendMessage, ServerEvent};
