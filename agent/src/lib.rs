//! ansigent library
//!
//! Core modules for the Ansible deployment runner agent.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod server;
pub mod services;
pub mod storage;
pub mod utils;
pub mod workers;
