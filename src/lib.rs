//! # zigtuya
//!
//! Bridge between Tuya Zigbee devices and a host capability store. Decodes
//! the manufacturer-specific 0xEF00 datapoint protocol, binds standard ZCL
//! attribute reports to the same capability surface and keeps IAS zone
//! alarms working on firmware that refuses to bind.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use zigtuya::{DeviceBuilder, catalog};
//! # async fn run(endpoint: Arc<dyn zigtuya::ZclEndpoint>, host: Arc<dyn zigtuya::CapabilityHost>) -> zigtuya::Result<()> {
//! let class = Arc::new(catalog::by_name("lock")?);
//! let device = DeviceBuilder::new("lock-1", class, endpoint, host).build();
//! device.init().await?;
//! device.set_capability("locked", true).await?;
//! # Ok(())
//! # }
//! ```
//!
#[macro_use]
pub mod macros;
pub mod battery;
pub mod capability;
pub mod catalog;
pub mod class;
pub mod cluster;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod driver;
pub mod error;
pub mod fallback;
pub mod host;
pub mod protocol;
pub mod publish;
pub mod session;
pub mod value;

pub use battery::BatteryType;
pub use class::DeviceClass;
pub use config::DeviceSettings;
pub use device::{Device, DeviceBuilder};
pub use driver::Driver;
pub use error::{BridgeError, Result};
pub use fallback::AlarmState;
pub use host::{CapabilityHost, ZclEndpoint, ZclEvent};
pub use protocol::{DataType, TuyaCommand};
pub use publish::CapabilityEvent;
pub use value::{CapabilityValue, DpValue};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn version() -> &'static str {
    VERSION
}
