//! Shared types for the chat relay: wire records, the field sanitizer,
//! connection ids and the injectable clock.

pub mod clock;
pub mod ids;
pub mod messages;
pub mod sanitize;

pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use ids::ConnectionId;
pub use messages::{ChatMessage, FieldLimits, IncomingMessage, SanitizedMessage};
pub use sanitize::sanitize;
