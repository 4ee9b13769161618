//! Onboard CPU temperature source, read from the sysfs thermal zone.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

use crate::gatt::NotifyActivation;
use crate::sources::CelsiusReceiver;

const THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

/// Polls the SoC temperature and pushes Celsius samples to its receiver.
///
/// The poller is not started at boot: the thermometer characteristic's
/// first StartNotify invokes [`start`], an explicit and idempotent
/// lifecycle method, so thread ownership stays visible. A read failure is
/// logged and retried on the next tick.
///
/// [`start`]: Self::start
pub struct CpuThermalSource {
    receiver: Arc<dyn CelsiusReceiver>,
    zone_path: PathBuf,
    poll_interval: Duration,
    shutdown: CancellationToken,
    started: AtomicBool,
}

impl CpuThermalSource {
    pub fn new(
        receiver: Arc<dyn CelsiusReceiver>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            receiver,
            zone_path: PathBuf::from(THERMAL_ZONE),
            poll_interval,
            shutdown,
            started: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn with_zone_path(mut self, path: PathBuf) -> Self {
        self.zone_path = path;
        self
    }

    /// Starts the polling task; repeat calls are no-ops.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("starting CPU thermal poller");

        let receiver = self.receiver.clone();
        let zone_path = self.zone_path.clone();
        let poll_interval = self.poll_interval;
        let token = self.shutdown.child_token();

        tokio::spawn(async move {
            let mut ticker = interval(poll_interval);
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        info!("CPU thermal poller stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match read_zone_celsius(&zone_path) {
                            Ok(celsius) => receiver.set_temp_c(celsius),
                            Err(e) => warn!("CPU temperature read failed: {e}"),
                        }
                    }
                }
            }
        });
    }
}

impl NotifyActivation for CpuThermalSource {
    fn on_first_notify(&self) {
        self.start();
    }
}

/// Sysfs thermal zones report millidegrees Celsius as ASCII.
fn read_zone_celsius(path: &std::path::Path) -> Result<f64> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let millidegrees: f64 = raw
        .trim()
        .parse()
        .with_context(|| format!("parsing thermal zone value {raw:?}"))?;
    Ok(millidegrees / 1000.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::sync::Mutex;

    struct CapturingReceiver {
        samples: Mutex<Vec<f64>>,
    }

    impl CelsiusReceiver for CapturingReceiver {
        fn set_temp_c(&self, celsius: f64) {
            self.samples.lock().unwrap().push(celsius);
        }
    }

    #[test]
    fn zone_value_is_millidegrees() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "48250").unwrap();
        assert_eq!(read_zone_celsius(file.path()).unwrap(), 48.25);
    }

    #[test]
    fn malformed_zone_value_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not-a-number").unwrap();
        assert!(read_zone_celsius(file.path()).is_err());
    }

    #[tokio::test]
    async fn start_is_idempotent_and_pushes_samples() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "51000").unwrap();

        let receiver = Arc::new(CapturingReceiver {
            samples: Mutex::new(Vec::new()),
        });
        let token = CancellationToken::new();
        let source = CpuThermalSource::new(
            receiver.clone(),
            Duration::from_millis(5),
            token.clone(),
        )
        .with_zone_path(file.path().to_path_buf());

        source.start();
        source.start(); // second call must not spawn another poller

        tokio::time::sleep(Duration::from_millis(30)).await;
        token.cancel();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let samples = receiver.samples.lock().unwrap();
        assert!(!samples.is_empty());
        assert!(samples.iter().all(|c| (*c - 51.0).abs() < f64::EPSILON));
    }
}
