use uuid::Uuid;

/// Generate a new unique id (UUIDv4) as a string.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}
