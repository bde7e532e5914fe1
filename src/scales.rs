//! The protocol-agnostic surface every scale driver implements.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicI32, AtomicU16, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use btleplug::api::BDAddr;

use crate::DiscoveredDevice;

pub mod eclair;

pub type LogCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type WeightCallback = Arc<dyn Fn(f32) + Send + Sync>;

/// Outside the range of a reported battery byte.
const NO_BATTERY: u16 = u16::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    HandshakeInProgress,
    Subscribing,
    Streaming,
}

/// State shared between a driver and its notification listener.
///
/// The listener is the only writer of the readings; the host reads them
/// through the driver at any time.
pub struct ScalesCore {
    device: DiscoveredDevice,
    /// Last weight in thousandths of a gram.
    weight: AtomicI32,
    /// Battery byte as reported, or [`NO_BATTERY`].
    battery: AtomicU16,
    log_callback: RwLock<Option<LogCallback>>,
    weight_callback: RwLock<Option<WeightCallback>>,
}

impl ScalesCore {
    pub fn new(device: DiscoveredDevice) -> Self {
        Self {
            device,
            weight: AtomicI32::new(0),
            battery: AtomicU16::new(NO_BATTERY),
            log_callback: RwLock::new(None),
            weight_callback: RwLock::new(None),
        }
    }

    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    pub fn weight(&self) -> f32 {
        grams(self.weight.load(Ordering::Acquire))
    }

    pub fn weight_raw(&self) -> i32 {
        self.weight.load(Ordering::Acquire)
    }

    pub fn set_weight_raw(&self, raw: i32) {
        self.weight.store(raw, Ordering::Release);

        let callback = self
            .weight_callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            let weight = grams(raw);
            if catch_unwind(AssertUnwindSafe(|| callback(weight))).is_err() {
                log::warn!("Weight callback panicked");
            }
        }
    }

    pub fn battery(&self) -> Option<u8> {
        u8::try_from(self.battery.load(Ordering::Acquire)).ok()
    }

    pub fn set_battery(&self, percent: u8) {
        self.battery.store(u16::from(percent), Ordering::Release);
    }

    pub fn set_log_callback(&self, callback: Option<LogCallback>) {
        *self
            .log_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    pub fn set_weight_callback(&self, callback: Option<WeightCallback>) {
        *self
            .weight_callback
            .write()
            .unwrap_or_else(PoisonError::into_inner) = callback;
    }

    /// Diagnostics sink. Nothing that happens in here can fail the caller.
    pub fn log(&self, args: fmt::Arguments<'_>) {
        log::debug!("[{}] {}", self.device.name(), args);

        let callback = self
            .log_callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            let message = args.to_string();
            if catch_unwind(AssertUnwindSafe(|| callback(&message))).is_err() {
                log::warn!("Log callback panicked");
            }
        }
    }
}

/// Thousandths of a gram to grams.
pub fn grams(raw: i32) -> f32 {
    raw as f32 / 1000.0
}

/// A connected (or connectable) scale.
///
/// Connection-level failures are reported as `false` and detailed through
/// the logging sink; nothing here returns an error or panics.
#[async_trait]
pub trait RemoteScales: Send + Sync {
    fn core(&self) -> &ScalesCore;

    fn state(&self) -> ConnectionState;

    /// Connect and complete the protocol handshake. Returns `true` right away
    /// when already connected. On failure every acquired resource is released
    /// and the driver can be connected again.
    async fn connect(&mut self) -> bool;

    async fn disconnect(&mut self);

    async fn is_connected(&self) -> bool;

    /// Periodic housekeeping. Call at least once a second.
    async fn update(&mut self);

    /// Ask the scale to zero itself. `true` means the command was sent, not
    /// that the scale acknowledged it.
    async fn tare(&mut self) -> bool;

    fn name(&self) -> &str {
        self.core().device().name()
    }

    fn address(&self) -> BDAddr {
        self.core().device().address()
    }

    /// Last validated weight in grams, 0 before the first weight frame.
    fn weight(&self) -> f32 {
        self.core().weight()
    }

    fn battery(&self) -> Option<u8> {
        self.core().battery()
    }

    fn set_weight_updated_callback(&self, callback: WeightCallback) {
        self.core().set_weight_callback(Some(callback));
    }

    fn set_log_callback(&self, callback: LogCallback) {
        self.core().set_log_callback(Some(callback));
    }

    fn log(&self, message: &str) {
        self.core().log(format_args!("{}", message));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::mock::MockLink;

    fn core() -> ScalesCore {
        ScalesCore::new(DiscoveredDevice::new(
            "Eclair-123",
            BDAddr::from([1, 2, 3, 4, 5, 6]),
            Arc::new(MockLink::new()),
        ))
    }

    #[test]
    fn readings_start_empty() {
        let core = core();
        assert_eq!(core.weight(), 0.0);
        assert_eq!(core.battery(), None);
    }

    #[test]
    fn weight_is_stored_in_milligrams() {
        let core = core();
        core.set_weight_raw(12345);
        assert_eq!(core.weight(), 12.345);
        core.set_weight_raw(-500);
        assert_eq!(core.weight(), -0.5);
        assert_eq!(core.weight_raw(), -500);
    }

    #[test]
    fn battery_is_stored_as_reported() {
        let core = core();
        core.set_battery(42);
        assert_eq!(core.battery(), Some(42));
        core.set_battery(250);
        assert_eq!(core.battery(), Some(250));
        core.set_battery(0xFF);
        assert_eq!(core.battery(), Some(0xFF));
        core.set_battery(0);
        assert_eq!(core.battery(), Some(0));
    }

    #[test]
    fn grams_from_milligrams() {
        assert_eq!(grams(12345), 12.345);
        assert_eq!(grams(-500), -0.5);
        assert_eq!(grams(0), 0.0);
    }

    #[test]
    fn weight_callback_sees_grams() {
        let core = core();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        core.set_weight_callback(Some(Arc::new(move |grams: f32| {
            sink.lock().unwrap().push(grams)
        })));

        core.set_weight_raw(1500);
        assert_eq!(*seen.lock().unwrap(), vec![1.5]);
    }

    #[test]
    fn panicking_log_callback_is_contained() {
        let core = core();
        core.set_log_callback(Some(Arc::new(|_: &str| panic!("sink is broken"))));
        core.log(format_args!("hello {}", 1));
        core.set_weight_raw(7000);
        assert_eq!(core.weight(), 7.0);
    }
}
