//! Command vocabulary sent to the device.

/// Report current temperatures.
pub const REQUEST_TEMPERATURE: &str = "M105";
/// Report firmware name and capabilities.
pub const REQUEST_FIRMWARE_INFO: &str = "M115";
/// Ask the firmware to push temperatures every 2 seconds on its own.
pub const ENABLE_TEMPERATURE_AUTOREPORT: &str = "M155 S2";
pub const BED_HEATER_OFF: &str = "M140 S0";
pub const HOTEND_HEATER_OFF: &str = "M104 S0";
pub const FAN_OFF: &str = "M107";
pub const DISABLE_STEPPERS: &str = "M84";
/// Homes X and Y only. Z stays put so the nozzle cannot be driven into a
/// finished print on printers that home at the bottom.
pub const HOME_XY: &str = "G28 X Y";

/// Capability flag announcing automatic temperature reports.
pub const CAP_AUTOREPORT_TEMP: &str = "AUTOREPORT_TEMP";

/// Commands sent whenever a print ends, in order: heaters off, fan off, park
/// the head with `home_command`, release the motors.
pub fn safety_sequence(home_command: &str) -> [&str; 5] {
    [
        BED_HEATER_OFF,
        HOTEND_HEATER_OFF,
        FAN_OFF,
        home_command,
        DISABLE_STEPPERS,
    ]
}
