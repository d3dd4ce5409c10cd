//! Suffixed duration parsing, shared by task timeouts, sub-workflow
//! timeouts, and circuit breaker overrides.
//!
//! One parser used from every timeout call site rather than duplicating the
//! logic per caller; the grammar is a plain `ms`/`s`/`m`/`h` numeric suffix
//! form.

use std::time::Duration;

/// Parse a suffixed duration string (`"500ms"`, `"30s"`, `"5m"`, `"1h"`).
/// The numeric part may be fractional (`"1.5s"`).
pub fn parse(input: &str) -> Result<Duration, String> {
    let trimmed = input.trim();
    let (digits, unit) = split_suffix(trimmed)
        .ok_or_else(|| format!("'{input}' has no recognized ms/s/m/h suffix"))?;
    let value: f64 = digits
        .parse()
        .map_err(|_| format!("'{input}' has a non-numeric magnitude"))?;
    if value < 0.0 {
        return Err(format!("'{input}' must not be negative"));
    }
    let millis = match unit {
        "ms" => value,
        "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        other => return Err(format!("unsupported duration suffix '{other}' in '{input}'")),
    };
    Ok(Duration::from_millis(millis as u64))
}

fn split_suffix(s: &str) -> Option<(&str, &str)> {
    for suffix in ["ms", "s", "m", "h"] {
        if let Some(digits) = s.strip_suffix(suffix) {
            if !digits.is_empty() {
                return Some((digits, suffix));
            }
        }
    }
    None
}
