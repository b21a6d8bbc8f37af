//! Custom Device Identifiers
//!
//! Derives the entity identifiers Dynatrace assigns to custom devices and
//! custom device groups, so a device can be addressed locally without asking
//! the API which ID it ended up with.

mod derive;

pub use derive::{derive, render_hex, DeviceIds, DEVICE_PREFIX, GROUP_PREFIX};
