//! Unit tests exercising the public API of docker-volume-backup
//!
//! Run with: `cargo test -p docker-volume-backup-tests --test unit`

mod config;
mod hooks;
mod locker;
mod prune;
