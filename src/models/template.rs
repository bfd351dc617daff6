//! VM template model - base images a batch's lab VMs are built from

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered VM template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VmTemplate {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Operating system image
    pub os: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl VmTemplate {
    pub fn new(name: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            id: format!("tmpl-{}", uuid::Uuid::new_v4()),
            name: name.into(),
            os: os.into(),
            description: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }
}
