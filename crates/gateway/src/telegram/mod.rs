pub mod client;
pub mod reply;
pub mod types;

pub use client::TelegramClient;
pub use reply::ReplySink;
pub use types::Update;
