//! Hardware-specific tests requiring a printer on a serial port.
//!
//! ```bash
//! export TEST_PORT=/dev/ttyUSB0   # or COM3 on Windows
//! export TEST_BAUD=115200         # optional, default: 115200
//! cargo test --features hardware-tests -- --ignored
//! ```
