//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that drives one or more routers
//! against `MockDevice`. Everything runs on the host with no relay,
//! filesystem or serial hardware.

mod client_tests;
mod fleet_flow_tests;
mod mock_hw;
mod server_tests;
