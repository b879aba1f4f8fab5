pub mod config_store;
pub mod defaults;
pub mod microphone;
pub mod runtime_engine;
pub mod secrets;
pub mod stt;
pub mod transport;
pub mod tts;
