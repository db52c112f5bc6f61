pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod proxy;
pub mod server;
pub mod signal;

// Re-export commonly used types for easier testing
pub use config::ServerConfig;
pub use error::ServerError;
pub use lifecycle::{LifecycleManager, ServerState};
pub use server::router::{RouteDecision, Router};
pub use signal::{ShutdownBridge, ShutdownOutcome};
