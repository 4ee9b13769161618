//! # lemonpi_bled
//!
//! A Linux daemon exposing in-car telemetry over Bluetooth Low Energy,
//! acting as a BLE GATT peripheral through the BlueZ D-Bus APIs.
//!
//! ## Features
//!
//! - **GATT Object Model**: protocol-compliant Service/Characteristic/
//!   Descriptor tree with stable, deterministic object paths
//! - **Event-Driven**: sensor readers and characteristics communicate via
//!   an injected EventBus
//! - **Notification Bridge**: coalesces cross-thread value updates into
//!   single-flight PropertiesChanged emissions on the control loop
//! - **Connection-Aware Advertising**: advertising stops on the first
//!   connected central and resumes, debounced, once the last one leaves
//! - **Domain Services**: GPS position, engine temperature, fuel level,
//!   device status and an onboard thermometer
//!
//! ## Architecture
//!
//! - [`Coordinator`](coordinator::Coordinator) - control loop owning the
//!   D-Bus connection and all protocol-visible mutation
//! - [`EventBus`](event::EventBus) - synchronous publish/subscribe registry
//! - [`NotificationBridge`](bridge::NotificationBridge) - worker-to-loop
//!   value-changed handoff
//! - [`AdvertisingController`](advertising::AdvertisingController) -
//!   connection-driven visibility state machine
//!
//! ## Example
//!
//! ```no_run
//! use lemonpi_bled::{application::Application, config::Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     Application::builder()
//!         .with_config(config)
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```

pub mod advertising;
pub mod application;
pub mod bluez;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod event;
pub mod gatt;
pub mod services;
pub mod sources;
pub mod workers;
