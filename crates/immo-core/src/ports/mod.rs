//! Port traits (interfaces) for dependency injection

pub mod auth;
pub mod storage;
pub mod transport;

pub use auth::{ConfigSource, TokenSource};
pub use storage::MediaStore;
pub use transport::{PubSubTransport, TransportEvent};
