//! Testing utilities for perfcompare.
//!
//! This module provides:
//! - A scripted query client for readiness tests
//! - Shell-script fixtures standing in for servers and the comparison driver

mod fixtures;
mod mocks;

pub use fixtures::{
    install_fake_server, make_executable, write_script, FAKE_DRIVER, FAKE_SERVER_EXITS,
    FAKE_SERVER_IGNORES_TERM, FAKE_SERVER_STAYS_UP,
};
pub use mocks::FlakyQueryClient;
