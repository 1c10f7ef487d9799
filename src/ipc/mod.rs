//! Unix-socket control surface: one JSON command per connection, one response.

pub mod client;
pub mod protocol;
pub mod server;
