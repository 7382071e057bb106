//! Test utilities for the duel SDK
//!
//! An in-process backend: a STOMP broker on `/ws` and a REST API under `/api`,
//! both bound to `127.0.0.1:0`, plus seeded fixtures.

mod api;
mod broker;
mod fixtures;
mod server;

pub use api::{ApiData, MockApi};
pub use broker::{MockBroker, ReceivedFrame};
pub use fixtures::{
    next_event, sample_data, sample_profile, wait_for_state, TestDuel, TEST_TOKEN, WAIT,
};
pub use server::TestServer;
