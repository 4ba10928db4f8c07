//! # quadfs
//!
//! HTTP and CLI front ends for `quadfs-core`.
//!
//! - `api`: axum router exposing the filesystem verbs under `/dav`, the
//!   read-only query endpoint and store inspection
//! - `cli`: clap commands that drive the same core operations against a
//!   local data directory
//! - `config`: TOML file plus `QUADFS_*` environment overrides

pub mod api;
pub mod cli;
pub mod config;
