//! Cloister Guardian — network egress mediation and host-command approval
//! for sandboxed AI coding agents.
//!
//! This library exposes the Guardian's components for the three binaries
//! (`cloister`, `cloister-executor`, `cloister-ctl`) and for integration
//! tests. Binary entrypoints live under `src/main.rs`, `src/executor/`,
//! and `src/ctl/`.

// Several items are pub for use across binaries and integration tests,
// which are separate compilation units — suppress false dead_code warnings.
#![allow(dead_code)]

pub mod approval;
pub mod audit;
pub mod config;
pub mod decision;
pub mod error;
pub mod hostexec;
pub mod injection;
pub mod proxy;
pub mod token;
pub mod utils;
