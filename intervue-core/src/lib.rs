pub mod config;
pub mod protocol;
pub mod stt;
pub mod text;
pub mod types;

// Keep the public surface small and intentional.
pub use config::*;
pub use protocol::*;
pub use stt::*;
pub use text::*;
pub use types::*;
