//! Console configuration with builder pattern

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pricing::PricingRates;
use crate::schedule::TimeWindow;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Time the external call takes to bring up the trainer VM
    pub provision_delay_ms: u64,
    /// Time to clone the trainer VM for all participants
    pub clone_delay_ms: u64,
    pub cloud_adda_delay_ms: u64,
    pub company_admin_delay_ms: u64,
    /// Buffered workflow events per subscriber
    pub event_capacity: usize,
    pub pricing: PricingRates,
    pub default_window: TimeWindow,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            provision_delay_ms: 3000,
            clone_delay_ms: 5000,
            cloud_adda_delay_ms: 2000,
            company_admin_delay_ms: 4000,
            event_capacity: 64,
            pricing: PricingRates::default(),
            default_window: TimeWindow::default(),
        }
    }
}

impl ConsoleConfig {
    pub fn builder() -> ConsoleConfigBuilder {
        ConsoleConfigBuilder::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> crate::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.event_capacity == 0 {
            return Err(crate::Error::Config("event_capacity must be at least 1".into()));
        }
        self.default_window
            .validate()
            .map_err(|e| crate::Error::Config(format!("default_window: {}", e)))?;
        Ok(())
    }

    pub fn provision_delay(&self) -> Duration {
        Duration::from_millis(self.provision_delay_ms)
    }

    pub fn clone_delay(&self) -> Duration {
        Duration::from_millis(self.clone_delay_ms)
    }

    pub fn cloud_adda_delay(&self) -> Duration {
        Duration::from_millis(self.cloud_adda_delay_ms)
    }

    pub fn company_admin_delay(&self) -> Duration {
        Duration::from_millis(self.company_admin_delay_ms)
    }
}

#[derive(Default)]
pub struct ConsoleConfigBuilder {
    config: ConsoleConfig,
}

impl ConsoleConfigBuilder {
    pub fn provision_delay(mut self, delay: Duration) -> Self {
        self.config.provision_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn clone_delay(mut self, delay: Duration) -> Self {
        self.config.clone_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn approval_delays(mut self, cloud_adda: Duration, company_admin: Duration) -> Self {
        self.config.cloud_adda_delay_ms = cloud_adda.as_millis() as u64;
        self.config.company_admin_delay_ms = company_admin.as_millis() as u64;
        self
    }

    /// Zero every simulated delay.
    pub fn instant(mut self) -> Self {
        self.config.provision_delay_ms = 0;
        self.config.clone_delay_ms = 0;
        self.config.cloud_adda_delay_ms = 0;
        self.config.company_admin_delay_ms = 0;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn pricing(mut self, rates: PricingRates) -> Self {
        self.config.pricing = rates;
        self
    }

    pub fn default_window(mut self, window: TimeWindow) -> Self {
        self.config.default_window = window;
        self
    }

    pub fn build(self) -> ConsoleConfig {
        self.config
    }
}
