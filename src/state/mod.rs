/// State management module
/// 
/// This module handles all catalog state, including:
/// - Database connections and queries (library.rs)
/// - Shared data structures (data.rs)
/// - The background scan job and its status (job.rs)

pub mod library;
pub mod data;
pub mod job;
