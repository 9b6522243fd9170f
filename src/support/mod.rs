pub mod error_bus;
pub mod reinit;
pub mod shutdown;

pub use error_bus::ErrorBus;
pub use reinit::ReinitSignal;
pub use shutdown::ShutdownSignal;
