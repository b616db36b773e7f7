pub mod config;
pub mod error;
pub mod io;
pub mod progress;
pub mod project;
pub mod record;
pub mod state;
