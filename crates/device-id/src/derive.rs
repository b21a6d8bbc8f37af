//! Identifier Derivation

use std::io::Cursor;

/// Prefix of a custom device group entity ID
pub const GROUP_PREFIX: &str = "CUSTOM_DEVICE_GROUP-";
/// Prefix of a custom device entity ID
pub const DEVICE_PREFIX: &str = "CUSTOM_DEVICE-";

/// Namespace mixed into the group hash. Dynatrace uses an empty one for
/// custom devices pushed through the API.
const NAMESPACE: &str = "";

/// Identifiers of a custom device and the group it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIds {
    /// `CUSTOM_DEVICE_GROUP-...`
    pub group_id: String,
    /// `CUSTOM_DEVICE-...`
    pub device_id: String,
}

/// Derive the group and device entity IDs for `device_name` inside `group_name`.
///
/// The group hash covers `namespace ++ len(namespace) ++ group ++ len(group)`
/// with 32-bit big-endian lengths. The device hash covers the 8-byte
/// big-endian group hash followed by `device ++ len(device)`.
pub fn derive(group_name: &str, device_name: &str) -> DeviceIds {
    let mut group_bytes = Vec::with_capacity(NAMESPACE.len() + group_name.len() + 8);
    group_bytes.extend_from_slice(NAMESPACE.as_bytes());
    group_bytes.extend_from_slice(&length_prefix(NAMESPACE));
    group_bytes.extend_from_slice(group_name.as_bytes());
    group_bytes.extend_from_slice(&length_prefix(group_name));
    let group_hash = murmur_h1(&group_bytes);

    let mut device_bytes = Vec::with_capacity(8 + device_name.len() + 4);
    device_bytes.extend_from_slice(&group_hash.to_be_bytes());
    device_bytes.extend_from_slice(device_name.as_bytes());
    device_bytes.extend_from_slice(&length_prefix(device_name));
    let device_hash = murmur_h1(&device_bytes);

    DeviceIds {
        group_id: format!("{}{}", GROUP_PREFIX, render_hex(group_hash)),
        device_id: format!("{}{}", DEVICE_PREFIX, render_hex(device_hash)),
    }
}

/// Render a hash the way Dynatrace prints entity IDs: uppercase hex without
/// leading zero nibbles. Zero renders as `"0"`, never as an empty string.
pub fn render_hex(value: u64) -> String {
    format!("{:X}", value)
}

fn length_prefix(value: &str) -> [u8; 4] {
    (value.len() as u32).to_be_bytes()
}

/// First 64-bit half of MurmurHash3 x64/128 with seed 0.
fn murmur_h1(data: &[u8]) -> u64 {
    // Reading from an in-memory cursor cannot fail.
    murmur3::murmur3_x64_128(&mut Cursor::new(data), 0)
        .map(|hash| hash as u64)
        .unwrap_or_default()
}
