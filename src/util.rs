//! Utility functions shared across modules.

/// Generate an MQTT client id for a tenant's connection.
///
/// Combines the tenant id with a timestamp-based hash so that a restarted
/// runner does not collide with a broker session left over from its
/// predecessor.
#[must_use]
pub fn generate_client_id(tenant_id: i64) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let hash = timestamp ^ (timestamp >> 32);
    format!("mqtt-bridge-{}-{:08x}", tenant_id, hash as u32)
}

/// Format a payload for human-readable log output (truncated, hex for binary).
#[must_use]
pub fn format_payload_preview(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(s) if s.len() <= 120 => s.to_string(),
        Ok(s) => format!("{}...", &s[..120]),
        Err(_) if data.len() <= 60 => data
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" "),
        Err(_) => {
            let hex: String = data[..60]
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ");
            format!("{}...", hex)
        }
    }
}
