pub mod bundle;
pub mod config;
pub mod control;
pub mod error;
pub mod partition;
pub mod routing;
pub mod storage;
pub mod types;
