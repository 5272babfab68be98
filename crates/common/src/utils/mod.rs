mod encoding;
mod headers;
mod id;
mod time;

pub use encoding::{decode_body, encode_body};
pub use headers::headers_to_map;
pub use id::generate_request_id;
pub use time::current_timestamp_millis;
