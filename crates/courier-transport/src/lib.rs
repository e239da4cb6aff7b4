pub mod credentials;
pub mod error;
pub mod events;
pub mod transport;

pub mod mock;

pub use credentials::{CredentialBlob, CredentialStore};
pub use error::TransportError;
pub use events::{InboundMessage, TransportEvent};
pub use mock::{MockHandle, MockTransport};
pub use transport::{SentMessage, Transport, TransportConnection, TransportHandle};
