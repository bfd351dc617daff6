//! Batch model - a cohort of students sharing a schedule and a VM lab

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{Student, VmConfig};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    #[default]
    Online,
    Offline,
    Hybrid,
}

impl std::fmt::Display for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Medium::Online => write!(f, "online"),
            Medium::Offline => write!(f, "offline"),
            Medium::Hybrid => write!(f, "hybrid"),
        }
    }
}

impl std::str::FromStr for Medium {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "online" => Ok(Medium::Online),
            "offline" => Ok(Medium::Offline),
            "hybrid" => Ok(Medium::Hybrid),
            other => Err(Error::Validation(format!("unknown medium: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    #[default]
    Draft,
    AwaitingApproval,
    Active,
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchStatus::Draft => write!(f, "Draft"),
            BatchStatus::AwaitingApproval => write!(f, "AwaitingApproval"),
            BatchStatus::Active => write!(f, "Active"),
        }
    }
}

/// Course dates. Evaluation may run past the end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSchedule {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub evaluation_end_date: Option<NaiveDate>,
}

impl BatchSchedule {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            start_date,
            end_date,
            evaluation_end_date: None,
        }
    }

    pub fn with_evaluation_end(mut self, date: NaiveDate) -> Self {
        self.evaluation_end_date = Some(date);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.start_date > self.end_date {
            return Err(Error::Validation(format!(
                "start date {} is after end date {}",
                self.start_date, self.end_date
            )));
        }
        if let Some(eval_end) = self.evaluation_end_date {
            if self.end_date > eval_end {
                return Err(Error::Validation(format!(
                    "evaluation end {} is before end date {}",
                    eval_end, self.end_date
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    pub self_enrollment: bool,
    pub certificates: bool,
    pub attendance_tracking: bool,
    pub vm_access_outside_schedule: bool,
}

/// A training batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub schedule: BatchSchedule,
    pub seat_count: u32,
    pub medium: Medium,
    pub settings: BatchSettings,
    pub students: Vec<Student>,
    pub vm_config: Option<VmConfig>,
    pub course_id: Option<String>,
    pub status: BatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Batch {
    pub fn new(draft: NewBatch) -> Result<Self> {
        let now = Utc::now();
        let batch = Self {
            id: format!("batch-{}", uuid::Uuid::new_v4()),
            name: draft.name.trim().to_string(),
            description: draft.description,
            schedule: draft.schedule,
            seat_count: draft.seat_count,
            medium: draft.medium,
            settings: draft.settings,
            students: Vec::new(),
            vm_config: None,
            course_id: draft.course_id,
            status: BatchStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        batch.validate()?;
        Ok(batch)
    }

    /// Check every record-level invariant, including owned students and VM config.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("batch name is required".into()));
        }
        if self.seat_count < 1 {
            return Err(Error::Validation("seat count must be at least 1".into()));
        }
        self.schedule.validate()?;
        if self.students.len() > self.seat_count as usize {
            return Err(Error::Validation(format!(
                "batch has {} seats but {} students",
                self.seat_count,
                self.students.len()
            )));
        }
        for student in &self.students {
            student.validate()?;
        }
        if let Some(config) = &self.vm_config {
            config.validate()?;
        }
        Ok(())
    }

    pub fn student(&self, student_id: &str) -> Option<&Student> {
        self.students.iter().find(|s| s.id == student_id)
    }

    pub fn has_students(&self) -> bool {
        !self.students.is_empty()
    }

    pub fn has_course(&self) -> bool {
        self.course_id.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn vm_config(&self) -> Result<&VmConfig> {
        self.vm_config
            .as_ref()
            .ok_or_else(|| Error::VmConfigMissing(self.id.clone()))
    }

    pub fn vm_config_mut(&mut self) -> Result<&mut VmConfig> {
        let id = self.id.clone();
        self.vm_config.as_mut().ok_or(Error::VmConfigMissing(id))
    }

    /// Both approval gates are `approved`.
    pub fn is_activatable(&self) -> bool {
        self.vm_config
            .as_ref()
            .is_some_and(|c| c.approval.is_approved())
    }

    pub fn apply(&mut self, patch: BatchPatch) {
        if let Some(name) = patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(schedule) = patch.schedule {
            self.schedule = schedule;
        }
        if let Some(seats) = patch.seat_count {
            self.seat_count = seats;
        }
        if let Some(medium) = patch.medium {
            self.medium = medium;
        }
        if let Some(settings) = patch.settings {
            self.settings = settings;
        }
        if let Some(course_id) = patch.course_id {
            self.course_id = course_id;
        }
    }
}

/// Input for creating a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBatch {
    pub name: String,
    pub description: Option<String>,
    pub schedule: BatchSchedule,
    pub seat_count: u32,
    pub medium: Medium,
    pub settings: BatchSettings,
    pub course_id: Option<String>,
}

impl NewBatch {
    pub fn new(name: impl Into<String>, schedule: BatchSchedule) -> Self {
        Self {
            name: name.into(),
            description: None,
            schedule,
            seat_count: 30,
            medium: Medium::Online,
            settings: BatchSettings::default(),
            course_id: None,
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn seats(mut self, seats: u32) -> Self {
        self.seat_count = seats;
        self
    }

    pub fn medium(mut self, medium: Medium) -> Self {
        self.medium = medium;
        self
    }

    pub fn settings(mut self, settings: BatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = Some(course_id.into());
        self
    }
}

/// Partial update for batch details
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub schedule: Option<BatchSchedule>,
    pub seat_count: Option<u32>,
    pub medium: Option<Medium>,
    pub settings: Option<BatchSettings>,
    pub course_id: Option<Option<String>>,
}

impl BatchPatch {
    pub fn course(mut self, course_id: impl Into<String>) -> Self {
        self.course_id = Some(Some(course_id.into()));
        self
    }

    pub fn schedule(mut self, schedule: BatchSchedule) -> Self {
        self.schedule = Some(schedule);
        self
    }
}
