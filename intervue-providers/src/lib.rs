pub mod deepgram_realtime;
pub mod health;
pub mod interview_ws;
