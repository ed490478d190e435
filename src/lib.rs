// Host-side firmware update tool for Holtek/CYKB-family keyboard bootloaders.
// Protocol definitions, device registry, and HID communication.

pub mod codec;
pub mod crc;
pub mod devices;
pub mod driver;
pub mod error;
pub mod extract;
pub mod firmware;
pub mod lifecycle;
pub mod orchestrate;
pub mod protocol_a;
pub mod protocol_b;
pub mod transport;

pub use devices::{device_registry, DeviceClass, DeviceRegistry, Family};
pub use driver::{Driver, FlashProgress, Phase, SilentProgress};
