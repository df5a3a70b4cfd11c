pub mod adb;
pub mod commands;
pub mod config;
pub mod error;
pub mod gate;
pub mod logcat;
pub mod logging;
pub mod models;
pub mod perf;
pub mod scheduler;
pub mod state;
