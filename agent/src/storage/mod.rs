//! Storage: on-disk layout, settings, deployment records and the catalog

pub mod catalog;
pub mod deployments;
pub mod layout;
pub mod settings;
