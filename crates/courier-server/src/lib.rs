pub mod bridge;
pub mod routes;
pub mod server;
pub mod ws;

pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use ws::{SubscriberId, SubscriberRegistry};
