//! Batch Console
//!
//! Workflow core for an admin console that runs training batches and their
//! VM lab environments.
//!
//! # Key Features
//!
//! - **Batch store** - batches, students and VM configs updated atomically
//! - **VM workflow** - provision a trainer VM, configure it, clone it per participant
//! - **Approval gate** - two independent sign-offs before a batch goes active
//! - **Pricing** - deterministic rental estimate for a VM lab
//! - **Suggestions** - prioritized "next action" prompts for the current view
//!
//! # Example
//!
//! ```no_run
//! use batch_console::models::*;
//! use batch_console::{Console, ConsoleConfig, Location};
//! use chrono::NaiveDate;
//!
//! # async fn run() -> batch_console::Result<()> {
//! let console = Console::new(ConsoleConfig::default())?;
//!
//! let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//! let end = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
//! let id = console.add_batch(NewBatch::new("Rust 101", BatchSchedule::new(start, end)))?;
//!
//! console.update_vm_config(
//!     &id,
//!     VmConfigPatch::new()
//!         .templates(vec![TemplateAssignment::new("tmpl-ubuntu", "rust-lab")])
//!         .participants(10)
//!         .dates(start, end),
//! )?;
//! console.provision_admin(&id)?;
//!
//! for suggestion in console.navigate(Location::batch(&id)) {
//!     println!("{} ({})", suggestion.title, suggestion.action);
//! }
//!
//! console.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod config;
pub mod console;
pub mod error;
pub mod events;
pub mod models;
pub mod pricing;
pub mod provisioning;
pub mod schedule;
pub mod store;
pub mod suggestions;
mod tasks;
pub mod wizard;

pub use approval::{Approver, SimulatedApprover};
pub use config::ConsoleConfig;
pub use console::{BatchSummary, Console};
pub use error::{Error, Result};
pub use events::WorkflowEvent;
pub use pricing::{PricingBreakdown, PricingInput, PricingRates};
pub use provisioning::{ConsoleSession, Provisioner, SimulatedProvisioner};
pub use store::EntityStore;
pub use suggestions::{Location, Navigation, Suggestion, SuggestionPanel};
pub use wizard::{BatchWizard, DetailsForm, WizardStep};
