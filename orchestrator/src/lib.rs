//! Arduino App Orchestrator Library
//!
//! App addressing, the brick/model catalog, compose assembly, the app
//! lifecycle engine and status derivation.

pub mod app;
pub mod apps;
pub mod bricks;
pub mod catalog;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod storage;
pub mod utils;
pub mod workers;
pub mod yaml;
