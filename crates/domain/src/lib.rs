pub mod audio;
pub mod capability;
pub mod chat;
pub mod config;
pub mod error;
pub mod job;
pub mod resource;
pub mod room;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
