//! End-to-end tests using simulated printers.

pub mod discovery_tests;
pub mod engine_tests;
pub mod print_workflow_tests;
pub mod serial_transport_tests;
