pub mod config;
pub mod endpoint;

pub use config::{ConfigError, SessionConfig};
pub use endpoint::{AddressFamily, Endpoint, EndpointKind};
