pub mod config;
pub mod error;
pub mod qr;
pub mod registry;
pub mod relay;
mod session;

pub use config::{GatewayConfig, ReconnectPolicy};
pub use error::GatewayError;
pub use qr::{DataUrlRenderer, QrRenderer};
pub use registry::{SessionRegistry, SessionView};
pub use relay::MessageRelay;
