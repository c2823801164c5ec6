//! Integration tests for docker-volume-backup
//!
//! These tests require Docker and run complete backups against real containers.
//! Run with: `cargo test -p docker-volume-backup-tests --test integration -- --ignored`

mod common;
mod docker_volumes;
