//! Whole backup runs against mocked Docker, storage and notifications
//!
//! Run with: `cargo test -p docker-volume-backup-tests --test lifecycle`

mod backends;
mod commands;
mod run;
mod workloads;
