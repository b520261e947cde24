#![warn(clippy::all, rust_2018_idioms)]

pub mod cache;
pub mod catalog;
pub mod color;
pub mod downloader;
pub mod error;
pub mod mapping;
pub mod model;
pub mod penetration;
pub mod settings;
pub mod state;
pub mod volume;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use state::AppState;
