pub mod capture;
pub mod engine;
pub mod machine;
pub mod playback;
pub mod session;
pub mod traits;
