//! Deployment pipeline

pub mod command;
pub mod credentials;
pub mod engine;
pub mod fsm;
pub mod inventory;
pub mod playbook;
pub mod process;
pub mod scratch;

pub use engine::{Engine, EngineOptions, Outcome};
