pub mod address;
pub mod disconnect;
pub mod events;
pub mod ids;
pub mod messages;
pub mod session;

pub use disconnect::DisconnectReason;
pub use events::SessionEvent;
pub use ids::{MessageId, SessionId};
pub use messages::{DeliveryStatus, Direction, MessageRecord, MessageType};
pub use session::{SessionKey, SessionSnapshot, SessionStatus, DEFAULT_SESSION_NAME};
