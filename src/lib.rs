//! Drivers for BLE coffee scales.
//!
//! A [`Scanner`] finds nearby peripherals, a [`PluginRegistry`] picks the
//! driver that speaks the peripheral's protocol, and the resulting
//! [`RemoteScales`] streams weight readings and accepts commands such as tare.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use futures::StreamExt;
//! use remote_scales::scales::eclair::EclairPlugin;
//! use remote_scales::{PluginRegistry, RemoteScales, ScanConfig, Scanner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     pretty_env_logger::init();
//!
//!     let mut registry = PluginRegistry::new();
//!     EclairPlugin::apply(&mut registry);
//!     let registry = Arc::new(registry);
//!
//!     // Only report devices that some plugin can drive
//!     let config = ScanConfig::default()
//!         .filter_by_registry(registry.clone())
//!         .stop_after_first_match()
//!         .stop_after_timeout(Duration::from_secs(20));
//!
//!     let mut scanner = Scanner::new();
//!     let mut devices = scanner.device_stream();
//!     scanner.start(config).await?;
//!
//!     let device = devices.next().await.ok_or("no scale found")?;
//!     let mut scales = registry.create(&device)?;
//!
//!     if scales.connect().await {
//!         scales.tare().await;
//!         loop {
//!             scales.update().await;
//!             println!("{:.1} g", scales.weight());
//!             tokio::time::sleep(Duration::from_secs(1)).await;
//!         }
//!     }
//!
//!     Ok(())
//! }
//!```

#![warn(clippy::all, future_incompatible, nonstandard_style, rust_2018_idioms)]

pub use btleplug::api::BDAddr;

pub use characteristic::Characteristic;
pub use device::{BtleLink, DiscoveredDevice};
pub use error::{FrameError, Result, ScaleError};
pub use link::{Link, Notification, WriteKind};
pub use registry::{PluginRegistry, ScalesPlugin};
pub use scales::{ConnectionState, RemoteScales};
pub use scanner::{DeviceEvent, ScanConfig, Scanner};
pub use service::Service;

mod characteristic;
mod device;
mod error;
mod scanner;
mod service;

pub mod frame;
pub mod link;
pub mod mock;
pub mod registry;
pub mod scales;
