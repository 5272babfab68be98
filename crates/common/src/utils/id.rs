use uuid::Uuid;

/// Generate a unique request identifier: "req_" followed by a UUID v4
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::new_v4())
}
