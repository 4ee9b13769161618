//! Synthetic GPS source for test mode: a vehicle driving a circle around
//! the Bay Area at 20–40 mph.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, info};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::event::{EventBus, EventKind};
use crate::sources::{GpsReceiver, SensorSource};
use crate::workers::WorkerRegistry;

const CENTER_LAT: f64 = 37.7749;
const CENTER_LONG: f64 = -122.4194;
/// ~1 km radius in degrees.
const RADIUS: f64 = 0.01;
const ANGULAR_VELOCITY: f64 = 0.1;

pub struct SyntheticGpsSource {
    receiver: Arc<dyn GpsReceiver>,
    event_bus: EventBus,
    update_interval: Duration,
}

impl SyntheticGpsSource {
    pub fn new(
        receiver: Arc<dyn GpsReceiver>,
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
impl SensorSource for SyntheticGpsSource {
    fn name(&self) -> &'static str {
        "SyntheticGpsSource"
    }

    async fn start(&self, workers: &mut WorkerRegistry) -> Result<()> {
        let receiver = self.receiver.clone();
        let event_bus = self.event_bus.clone();
        let update_interval = self.update_interval;

        workers.spawn(self.name(), move |token| {
            run_synthetic_gps(receiver, event_bus, update_interval, token)
        });
        Ok(())
    }
}

async fn run_synthetic_gps(
    receiver: Arc<dyn GpsReceiver>,
    event_bus: EventBus,
    update_interval: Duration,
    token: CancellationToken,
) -> Result<()> {
    info!("starting synthetic GPS source");
    event_bus.emit(EventKind::GpsConnected);

    let mut ticker = interval(update_interval);
    let mut angle: f64 = 0.0;

    loop {
        tokio::select! {
            () = token.cancelled() => {
                info!("synthetic GPS source stopped");
                break;
            }
            _ = ticker.tick() => {
                angle += ANGULAR_VELOCITY;
                if angle > 2.0 * PI {
                    angle -= 2.0 * PI;
                }

                let lat = CENTER_LAT + RADIUS * angle.sin();
                let long = CENTER_LONG + RADIUS * angle.cos();
                let heading = (angle * 180.0 / PI + 90.0) % 360.0;
                let speed = (30.0 + 10.0 * (angle * 0.5).sin()) as u32;
                let tstamp = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                let gdop = 1.5 + 0.5 * (angle * 2.0).sin();
                let pdop = 1.2 + 0.3 * (angle * 3.0).sin();

                receiver.set_gps_position(lat, long, heading, tstamp, speed, gdop, pdop);
                debug!("synthetic GPS: lat={lat:.6}, long={long:.6}, heading={heading:.0}, speed={speed}mph");
            }
        }
    }
    Ok(())
}
