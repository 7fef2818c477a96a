//! Line framing for exported G-code.

/// Split exported G-code into the lines worth sending.
///
/// Strips `;` comments and surrounding whitespace and drops lines left empty,
/// so the device only acknowledges real commands and the line count used for
/// progress matches what is streamed.
pub fn prepare_lines(gcode: &str) -> Vec<String> {
    gcode
        .lines()
        .filter_map(|raw| {
            let code = match raw.find(';') {
                Some(at) => &raw[..at],
                None => raw,
            };
            let code = code.trim();
            (!code.is_empty()).then(|| code.to_string())
        })
        .collect()
}
