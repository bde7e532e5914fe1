//! This example finds the first supported scale, tares it and prints the
//! weight once a second.

use std::sync::Arc;
use std::time::Duration;

use remote_scales::scales::eclair::EclairPlugin;
use remote_scales::{PluginRegistry, RemoteScales, Result, ScanConfig, Scanner};
use tokio::time::sleep;

const SCAN_TIMEOUT: Duration = Duration::from_secs(20);

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let mut registry = PluginRegistry::new();
    EclairPlugin::apply(&mut registry);
    let registry = Arc::new(registry);

    let mut scanner = Scanner::new();

    loop {
        let config = ScanConfig::default()
            .filter_by_registry(registry.clone())
            .stop_after_first_match()
            .stop_after_timeout(SCAN_TIMEOUT);
        scanner.start(config).await?;

        // The scan stops by itself on the first match or on timeout.
        while scanner.is_scanning() {
            sleep(Duration::from_millis(100)).await;
        }
        scanner.stop().await;

        let Some(device) = scanner.discovered().into_iter().next() else {
            println!("No scale found within {:?}", SCAN_TIMEOUT);
            return Ok(());
        };
        println!("Discovered device: {} [{}]", device.name(), device.address());

        let mut scales = registry.create(&device)?;
        scales.set_weight_updated_callback(Arc::new(|grams: f32| {
            println!("Weight updated: {:.2} g", grams)
        }));
        scales.set_log_callback(Arc::new(|message: &str| log::info!("{}", message)));

        if !scales.connect().await {
            println!("Failed to connect, restarting scan");
            continue;
        }
        println!("Connected to {}", scales.name());

        if scales.tare().await {
            println!("Tare command sent");
        }

        while scales.is_connected().await {
            scales.update().await;
            sleep(Duration::from_secs(1)).await;
        }

        println!("Connection lost, restarting scan");
    }
}
