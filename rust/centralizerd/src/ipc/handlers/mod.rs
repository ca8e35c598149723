pub mod catalog;
pub mod centralization;
pub mod collaborators;
pub mod core;
pub mod setup;
pub mod statistics;
