//! Canonical identifier naming.
//!
//! Topics, measurement names, broker resource names and dashboard queries
//! all derive their identifiers through [`sanitize`], so the write path and
//! the read path agree on every name.

/// Lowercase `raw` and drop every character outside `[a-z0-9]`.
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Canonical measurement name `<short>_<name>`.
///
/// Returns `None` when either sanitized component is empty.
pub fn measurement_name(short_name: &str, name: &str) -> Option<String> {
    let short = sanitize(short_name);
    let clean = sanitize(name);
    if short.is_empty() || clean.is_empty() {
        return None;
    }
    Some(format!("{}_{}", short, clean))
}

/// MQTT topic a device publishes one characteristic to.
pub fn mqtt_topic(
    prefix: &str,
    experiment_id: &str,
    sensor_name: &str,
    mac_address: &str,
    characteristic: &str,
) -> String {
    format!(
        "{}/{}/{}/{}/{}",
        prefix,
        experiment_id,
        sensor_name,
        sanitize(mac_address),
        sanitize(characteristic)
    )
}
