//! Incremental media catalog.
//!
//! Walks a photo/video tree, extracts capture time, location and duration,
//! derives thumbnails, and keeps a SQLite catalog in sync with what is on disk.

pub mod config;
pub mod media;
pub mod scanner;
pub mod state;

#[cfg(test)]
mod test_support;
