//! Typed view locations and the suggestion action contract

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};

use crate::{Error, Result};

/// A console view the operator can be on
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Location {
    #[default]
    Dashboard,
    Batches,
    CreateBatch,
    BatchDetails { batch_id: String },
    Courses,
    VmTemplates,
    Settings,
}

impl Location {
    pub fn batch(batch_id: impl Into<String>) -> Self {
        Location::BatchDetails {
            batch_id: batch_id.into(),
        }
    }

    pub fn batch_id(&self) -> Option<&str> {
        match self {
            Location::BatchDetails { batch_id } => Some(batch_id),
            _ => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Dashboard => write!(f, "/"),
            Location::Batches => write!(f, "/batches"),
            Location::CreateBatch => write!(f, "/batches/new"),
            Location::BatchDetails { batch_id } => write!(f, "/batches/{}", batch_id),
            Location::Courses => write!(f, "/courses"),
            Location::VmTemplates => write!(f, "/vm-templates"),
            Location::Settings => write!(f, "/settings"),
        }
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let path = s.trim();
        let path = path.split(['?', '#']).next().unwrap_or_default();
        let trimmed = path.trim_end_matches('/');
        if !trimmed.is_empty() && !trimmed.starts_with('/') {
            return Err(Error::Validation(format!("route must start with '/': {}", s)));
        }

        let segments: Vec<&str> = trimmed.split('/').skip(1).collect();
        match segments.as_slice() {
            [] => Ok(Location::Dashboard),
            ["batches"] => Ok(Location::Batches),
            ["batches", "new"] => Ok(Location::CreateBatch),
            ["batches", id] if !id.is_empty() => Ok(Location::batch(*id)),
            ["courses"] => Ok(Location::Courses),
            ["vm-templates"] => Ok(Location::VmTemplates),
            ["settings"] => Ok(Location::Settings),
            _ => Err(Error::Validation(format!("unknown route: {}", s))),
        }
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Tabs of the batch details view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchTab {
    Overview,
    Students,
    Vms,
    Course,
    Schedule,
    Approval,
}

impl fmt::Display for BatchTab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = match self {
            BatchTab::Overview => "overview",
            BatchTab::Students => "students",
            BatchTab::Vms => "vms",
            BatchTab::Course => "course",
            BatchTab::Schedule => "schedule",
            BatchTab::Approval => "approval",
        };
        f.write_str(key)
    }
}

impl FromStr for BatchTab {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "overview" => Ok(BatchTab::Overview),
            "students" => Ok(BatchTab::Students),
            "vms" => Ok(BatchTab::Vms),
            "course" => Ok(BatchTab::Course),
            "schedule" => Ok(BatchTab::Schedule),
            "approval" => Ok(BatchTab::Approval),
            other => Err(Error::Validation(format!("unknown tab: {}", other))),
        }
    }
}

/// What selecting a suggestion does.
///
/// Renders as `none`, `tab:<key>`, or a route path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuggestionAction {
    None,
    Tab(BatchTab),
    Navigate(Location),
}

impl fmt::Display for SuggestionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuggestionAction::None => write!(f, "none"),
            SuggestionAction::Tab(tab) => write!(f, "tab:{}", tab),
            SuggestionAction::Navigate(location) => write!(f, "{}", location),
        }
    }
}

impl FromStr for SuggestionAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "none" {
            return Ok(SuggestionAction::None);
        }
        if let Some(tab) = s.strip_prefix("tab:") {
            return Ok(SuggestionAction::Tab(tab.parse()?));
        }
        Ok(SuggestionAction::Navigate(s.parse()?))
    }
}

impl Serialize for SuggestionAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
