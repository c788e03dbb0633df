// Message protocol, background service and its clients

pub mod background;
pub mod client;
pub mod protocol;

pub use background::{create_background_router, Background, BackgroundAppState};
pub use client::{HttpMessenger, LocalMessenger, Messenger};
pub use protocol::{Message, Reply};
