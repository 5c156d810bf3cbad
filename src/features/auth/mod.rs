pub mod api_key;

pub use api_key::{API_KEY_HEADER, ApiKeyGuard, api_key_middleware};
