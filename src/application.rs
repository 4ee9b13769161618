//! Application entry point and builder pattern implementation.

use crate::{config::Config, coordinator::Coordinator};
use anyhow::Result;

/// Main application structure orchestrating the daemon lifecycle.
///
/// # Example
///
/// ```no_run
/// use lemonpi_bled::application::Application;
/// use lemonpi_bled::config::Config;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::load(None)?;
/// let mut app = Application::builder()
///     .with_config(config)
///     .build()?;
///
/// app.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Application {
    coordinator: Coordinator,
}

impl Application {
    /// Creates a new ApplicationBuilder for constructing Application instances.
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Runs the complete daemon lifecycle: initialize, start the sensor
    /// sources, then hand control to the main loop.
    pub async fn run(&mut self) -> Result<()> {
        self.coordinator.initialize().await?;

        self.coordinator.start_sources().await?;

        self.coordinator.run_main_loop().await?;

        Ok(())
    }
}

/// Builder for [`Application`] instances.
pub struct ApplicationBuilder {
    config: Option<Config>,
}

impl ApplicationBuilder {
    fn new() -> Self {
        Self { config: None }
    }

    /// Sets the configuration for the application.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Builds the Application instance with the provided configuration.
    pub fn build(self) -> Result<Application> {
        let config = self
            .config
            .ok_or_else(|| anyhow::anyhow!("Configuration is required"))?;

        Ok(Application {
            coordinator: Coordinator::new(config),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_a_config() {
        assert!(Application::builder().build().is_err());
    }

    #[test]
    fn builder_accepts_a_config() {
        let app = Application::builder()
            .with_config(Config::default())
            .build();
        assert!(app.is_ok());
    }
}
