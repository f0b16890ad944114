//! Minimal STOMP 1.2 client: frame codec and session.
//!
//! Only CONNECT, SUBSCRIBE and SEND are ever sent; only CONNECTED and MESSAGE
//! are acted on. There is no UNSUBSCRIBE, no receipts and no heart-beat timer
//! (heart-beats are announced but never enforced).

pub mod frame;
pub mod session;

pub use frame::{ACCEPT_VERSION, Command, Frame, HeartBeat, JSON_CONTENT_TYPE};
pub use session::{SessionEvent, SessionOptions, SessionState, StompSession, Subscription};
