// File transfer actions for FTP, FTPS and SFTP servers

pub mod action;
pub mod archive;
pub mod config;
pub mod context;
pub mod errors;
pub mod models;
pub mod planner;
pub mod session;
pub mod store;
pub mod telemetry;
