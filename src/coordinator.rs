//! Control loop owning the D-Bus connection and every protocol-visible
//! mutation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use zbus::{Connection, MatchRule, MessageStream, message};
use zvariant::OwnedValue;

use crate::{
    advertising::AdvertisingController,
    bluez::BluezAdvertisingBackend,
    bridge::{NotificationBridge, flush_notification},
    config::Config,
    event::{EventBus, EventKind},
    gatt::{Advertisement, Characteristic, DBUS_PROP_IFACE, DEVICE_IFACE, GattApplication},
    services::{DeviceStatusService, GpsService, ObdService, ThermometerService},
    sources::{CpuThermalSource, SensorSource, SyntheticGpsSource, SyntheticObdSource},
    workers::WorkerRegistry,
};

/// Messages the control loop sends itself; today only the debounced
/// advertising-restart firing.
enum ControlMsg {
    RestartAdvertising,
}

/// Owns the bus connection, the GATT tree, the advertising controller and
/// the worker registry, and runs the single-threaded control loop every
/// protocol mutation goes through.
///
/// Sensor workers never see any of this: they reach the loop through the
/// event bus and the notification bridge only.
pub struct Coordinator {
    config: Config,
    event_bus: EventBus,
    bridge: NotificationBridge,
    workers: WorkerRegistry,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    control_rx: Option<mpsc::UnboundedReceiver<ControlMsg>>,
    notify_rx: Option<mpsc::UnboundedReceiver<Arc<Characteristic>>>,
    connection: Option<Connection>,
    gatt: Option<Arc<GattApplication>>,
    controller: Option<AdvertisingController>,
    device_stream: Option<MessageStream>,
    gps: Option<Arc<GpsService>>,
    obd: Option<Arc<ObdService>>,
    // Held so the status handlers' bus registrations and the poller wiring
    // live exactly as long as the served tree.
    #[allow(dead_code)]
    device_status: Option<Arc<DeviceStatusService>>,
    #[allow(dead_code)]
    thermometer: Option<Arc<ThermometerService>>,
}

impl Coordinator {
    pub fn new(config: Config) -> Self {
        let (bridge, notify_rx) = NotificationBridge::new();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        Self {
            config,
            event_bus: EventBus::new(),
            bridge,
            workers: WorkerRegistry::new(),
            control_tx,
            control_rx: Some(control_rx),
            notify_rx: Some(notify_rx),
            connection: None,
            gatt: None,
            controller: None,
            device_stream: None,
            gps: None,
            obd: None,
            device_status: None,
            thermometer: None,
        }
    }

    /// Connects to the system bus, builds and serves the GATT tree, wires
    /// the advertisement and subscribes to device connectivity signals.
    pub async fn initialize(&mut self) -> Result<()> {
        info!("initializing application");

        let connection = Connection::system()
            .await
            .context("failed to connect to the system bus")?;

        // Service indices fix the serviceN paths; registration order is the
        // advertised order.
        let mut gatt = GattApplication::new()?;

        let gps = Arc::new(GpsService::new(
            gatt.next_service_index(),
            self.bridge.clone(),
        )?);
        gatt.add_service(gps.service());

        let obd = Arc::new(ObdService::new(
            gatt.next_service_index(),
            self.bridge.clone(),
        )?);
        gatt.add_service(obd.service());

        let device_status = Arc::new(DeviceStatusService::new(
            gatt.next_service_index(),
            &self.event_bus,
            self.bridge.clone(),
        )?);
        gatt.add_service(device_status.service());

        let thermometer = Arc::new(ThermometerService::new(
            gatt.next_service_index(),
            self.bridge.clone(),
        )?);
        gatt.add_service(thermometer.service());

        let poller = Arc::new(CpuThermalSource::new(
            thermometer.clone(),
            Duration::from_secs(self.config.thermometer_poll_seconds),
            self.workers.shutdown_token(),
        ));
        thermometer.attach_poller(poller);

        let gatt = Arc::new(gatt);
        gatt.serve(&connection)
            .await
            .context("failed to serve the GATT tree")?;

        info!("registering GATT application");
        gatt.register(&connection).await?;

        let advertisement = Advertisement::new(
            0,
            &self.config.local_name,
            vec![crate::services::gps::GPS_SERVICE_UUID.to_string()],
        )?;
        let advertisement_path = advertisement.path().clone();
        connection
            .object_server()
            .at(&advertisement_path, advertisement)
            .await
            .context("failed to serve the advertisement")?;

        let backend = Arc::new(BluezAdvertisingBackend::new(
            connection.clone(),
            advertisement_path,
            self.config.adapter.clone(),
        ));
        let mut controller = AdvertisingController::new(
            backend,
            Duration::from_millis(self.config.advertising_restart_ms),
        );
        controller.start_advertising().await;

        // Only org.bluez.Device1 property changes reach the loop; the
        // Connected boolean inside them drives the controller.
        let rule = MatchRule::builder()
            .msg_type(message::Type::Signal)
            .interface(DBUS_PROP_IFACE)?
            .member("PropertiesChanged")?
            .arg(0, DEVICE_IFACE)?
            .build();
        let device_stream = MessageStream::for_match_rule(rule, &connection, Some(64))
            .await
            .context("failed to subscribe to device signals")?;

        self.connection = Some(connection);
        self.gatt = Some(gatt);
        self.controller = Some(controller);
        self.device_stream = Some(device_stream);
        self.gps = Some(gps);
        self.obd = Some(obd);
        // Owning the status service keeps its handler registrations alive.
        self.device_status = Some(device_status);
        self.thermometer = Some(thermometer);

        info!("BLE service is now running");
        Ok(())
    }

    /// Starts the in-process sensor sources. In test mode these are the
    /// synthetic readers; with real hardware the receivers are fed from
    /// outside this daemon.
    pub async fn start_sources(&mut self) -> Result<()> {
        if !self.config.test_mode {
            info!("no synthetic sources started, expecting external sensor readers");
            return Ok(());
        }

        info!("*** running in test mode with synthetic data ***");
        let gps = self
            .gps
            .as_ref()
            .context("coordinator not initialized")?
            .clone();
        let obd = self
            .obd
            .as_ref()
            .context("coordinator not initialized")?
            .clone();

        let gps_source = SyntheticGpsSource::new(
            gps,
            self.event_bus.clone(),
            Duration::from_secs(self.config.synthetic_gps_interval_seconds),
        );
        gps_source.start(&mut self.workers).await?;

        let obd_source = SyntheticObdSource::new(
            obd,
            self.event_bus.clone(),
            Duration::from_secs(self.config.synthetic_obd_interval_seconds),
        );
        obd_source.start(&mut self.workers).await?;

        Ok(())
    }

    /// The control loop: SIGINT, coalesced notification flushes, device
    /// connectivity signals and internal timer firings, all on one task.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let connection = self
            .connection
            .clone()
            .context("coordinator not initialized")?;
        let mut notify_rx = self
            .notify_rx
            .take()
            .context("main loop already consumed")?;
        let mut control_rx = self
            .control_rx
            .take()
            .context("main loop already consumed")?;
        let mut device_stream = self
            .device_stream
            .take()
            .context("coordinator not initialized")?;

        info!("starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            info!("received Ctrl+C, shutting down");
                            self.shutdown().await?;
                            break;
                        }
                        Err(e) => bail!("failed to listen for shutdown signal: {e}"),
                    }
                }

                Some(chrc) = notify_rx.recv() => {
                    if let Err(e) = flush_notification(&connection, &chrc).await {
                        error!("notification flush failed: {e}");
                    }
                }

                Some(message) = device_stream.next() => {
                    match message {
                        Ok(message) => self.handle_device_signal(&message).await?,
                        Err(e) => warn!("device signal stream error: {e}"),
                    }
                }

                Some(msg) = control_rx.recv() => {
                    match msg {
                        ControlMsg::RestartAdvertising => {
                            self.controller_mut()?.restart_if_idle().await;
                        }
                    }
                }
            }
        }

        info!("main event loop terminated");
        Ok(())
    }

    /// Applies one `PropertiesChanged` signal from a device object.
    async fn handle_device_signal(&mut self, message: &zbus::Message) -> Result<()> {
        let header = message.header();
        let Some(path) = header.path() else {
            return Ok(());
        };
        let device_path = path.to_string();

        let body = message.body();
        let (interface, changed, _invalidated): (String, HashMap<String, OwnedValue>, Vec<String>) =
            match body.deserialize() {
                Ok(parts) => parts,
                Err(e) => {
                    debug!("undecodable properties signal from {device_path}: {e}");
                    return Ok(());
                }
            };

        if interface != DEVICE_IFACE {
            debug!("property changed: {interface} on {device_path}");
            return Ok(());
        }

        let Some(connected) = changed
            .get("Connected")
            .and_then(|value| bool::try_from(value.clone()).ok())
        else {
            debug!("device property changed on {device_path}: {:?}", changed.keys());
            return Ok(());
        };

        if connected {
            self.controller_mut()?.device_connected(&device_path).await;
        } else if let Some(delay) = self.controller_mut()?.device_disconnected(&device_path) {
            self.arm_restart_timer(delay);
        }
        Ok(())
    }

    /// Schedules a restart firing. The timer is never cancelled; the firing
    /// re-checks the connected set, so a reconnect inside the window simply
    /// turns it into a no-op.
    fn arm_restart_timer(&self, delay: Duration) {
        let control_tx = self.control_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = control_tx.send(ControlMsg::RestartAdvertising);
        });
    }

    fn controller_mut(&mut self) -> Result<&mut AdvertisingController> {
        self.controller
            .as_mut()
            .context("coordinator not initialized")
    }

    /// Graceful teardown: notify the bus, stop workers, withdraw the
    /// advertisement and the application registration.
    async fn shutdown(&mut self) -> Result<()> {
        info!("initiating graceful shutdown");

        self.event_bus.emit(EventKind::ExitApplication);

        if let Err(e) = self.workers.shutdown_all().await {
            error!("error during worker shutdown: {e}");
        }

        if let Some(controller) = self.controller.as_mut() {
            controller.stop_advertising().await;
        }

        if let (Some(gatt), Some(connection)) = (&self.gatt, &self.connection) {
            if let Err(e) = gatt.unregister(connection).await {
                warn!("failed to unregister application: {e}");
            }
        }

        info!("shutdown complete");
        Ok(())
    }

    /// Event bus handle, mainly for wiring and tests.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Bridge handle for external sensor readers.
    pub fn bridge(&self) -> &NotificationBridge {
        &self.bridge
    }
}
