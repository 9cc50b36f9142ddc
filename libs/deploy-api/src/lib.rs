//! Wire models for the ansigent local HTTP API

pub mod models;

pub use models::*;
