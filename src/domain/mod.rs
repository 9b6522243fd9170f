pub mod connection;
pub mod error;
pub mod identity;
pub mod message;
pub mod session;
pub mod version;

pub use connection::ConnectionConfig;
pub use error::{ErrorEvent, ErrorKind};
pub use identity::DeviceIdentity;
pub use message::Message;
pub use session::ChargeSession;
pub use version::OcppDialect;
