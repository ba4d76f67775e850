//! CLI integration tests. Builds and runs use `/bin/sh` as the installer and
//! start command, so they are unix-only.

#![cfg(unix)]

mod base_tests;
mod build_tests;
mod common;
mod gc_tests;
mod run_tests;
