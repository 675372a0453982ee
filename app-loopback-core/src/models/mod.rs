pub mod config;
pub mod error;
pub mod format;
pub mod packet;
pub mod recording_result;
pub mod state;
