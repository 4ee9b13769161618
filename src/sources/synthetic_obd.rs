//! Synthetic OBD source for test mode: engine warming toward operating
//! temperature with slow fuel burn.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;

use crate::event::{EventBus, EventKind};
use crate::sources::{ObdReceiver, SensorSource};
use crate::workers::WorkerRegistry;

const AMBIENT_TEMP_F: f64 = 68.0;
const OPERATING_TEMP_F: f64 = 205.0;
const WARMUP_RATE: f64 = 0.01;
const STARTING_FUEL_PERCENT: f64 = 75.0;
/// One percent of fuel every five minutes.
const FUEL_SECONDS_PER_PERCENT: f64 = 300.0;

pub struct SyntheticObdSource {
    receiver: Arc<dyn ObdReceiver>,
    event_bus: EventBus,
    update_interval: Duration,
}

impl SyntheticObdSource {
    pub fn new(
        receiver: Arc<dyn ObdReceiver>,
        event_bus: EventBus,
        update_interval: Duration,
    ) -> Self {
        Self {
            receiver,
            event_bus,
            update_interval,
        }
    }
}

#[async_trait]
impl SensorSource for SyntheticObdSource {
    fn name(&self) -> &'static str {
        "SyntheticObdSource"
    }

    async fn start(&self, workers: &mut WorkerRegistry) -> Result<()> {
        let receiver = self.receiver.clone();
        let event_bus = self.event_bus.clone();
        let update_interval = self.update_interval;

        workers.spawn(self.name(), move |token| {
            run_synthetic_obd(receiver, event_bus, update_interval, token)
        });
        Ok(())
    }
}

async fn run_synthetic_obd(
    receiver: Arc<dyn ObdReceiver>,
    event_bus: EventBus,
    update_interval: Duration,
    token: CancellationToken,
) -> Result<()> {
    info!("starting synthetic OBD source");
    event_bus.emit(EventKind::ObdConnected);

    let start = Instant::now();
    let mut ticker = interval(update_interval);

    loop {
        tokio::select! {
            () = token.cancelled() => {
                info!("synthetic OBD source stopped");
                break;
            }
            _ = ticker.tick() => {
                let elapsed = start.elapsed().as_secs_f64();

                let mut temp_f = AMBIENT_TEMP_F
                    + (OPERATING_TEMP_F - AMBIENT_TEMP_F) * (1.0 - (-WARMUP_RATE * elapsed).exp());
                temp_f += 5.0 * (elapsed * 0.1).sin();
                let temp_f = temp_f.clamp(AMBIENT_TEMP_F, 220.0) as i32;

                let fuel = (STARTING_FUEL_PERCENT - elapsed / FUEL_SECONDS_PER_PERCENT)
                    .clamp(0.0, 100.0) as u8;

                receiver.set_temp_f(temp_f);
                receiver.set_fuel_percent_remaining(fuel);
                debug!("synthetic OBD: temp={temp_f}F, fuel={fuel}%");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingReceiver {
        temps: Mutex<Vec<i32>>,
        fuel: Mutex<Vec<u8>>,
    }

    impl crate::sources::TemperatureReceiver for CapturingReceiver {
        fn set_temp_f(&self, temperature: i32) {
            self.temps.lock().unwrap().push(temperature);
        }
    }

    impl crate::sources::FuelLevelReceiver for CapturingReceiver {
        fn set_fuel_percent_remaining(&self, percent: u8) {
            self.fuel.lock().unwrap().push(percent);
        }
    }

    #[tokio::test]
    async fn pushes_plausible_vehicle_data() {
        let receiver = Arc::new(CapturingReceiver::default());
        let bus = EventBus::new();
        let mut workers = WorkerRegistry::new();

        let source =
            SyntheticObdSource::new(receiver.clone(), bus, Duration::from_millis(5));
        source.start(&mut workers).await.unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        workers.shutdown_all().await.unwrap();

        let temps = receiver.temps.lock().unwrap();
        assert!(!temps.is_empty());
        for temp in temps.iter() {
            assert!((68..=220).contains(temp));
        }

        let fuel = receiver.fuel.lock().unwrap();
        assert!(fuel.iter().all(|f| *f <= 75));
    }
}
