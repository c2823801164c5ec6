pub mod backup;
pub mod commands;
pub mod hooks;
pub mod logging;
pub mod notification;
pub mod stats;
pub mod workloads;
