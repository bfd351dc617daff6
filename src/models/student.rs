//! Student model - owned by exactly one batch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// State of the lab VM assigned to a student
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentVmStatus {
    Running,
    Stopped,
    Error,
    /// No VM assigned yet
    #[default]
    Unset,
}

impl std::fmt::Display for StudentVmStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StudentVmStatus::Running => write!(f, "running"),
            StudentVmStatus::Stopped => write!(f, "stopped"),
            StudentVmStatus::Error => write!(f, "error"),
            StudentVmStatus::Unset => write!(f, "unset"),
        }
    }
}

/// Sessions attended out of sessions held
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Attendance {
    pub present: u32,
    pub total: u32,
}

impl Attendance {
    pub fn new(present: u32, total: u32) -> Result<Self> {
        let attendance = Self { present, total };
        attendance.validate()?;
        Ok(attendance)
    }

    pub fn validate(&self) -> Result<()> {
        if self.present > self.total {
            return Err(Error::Validation(format!(
                "attendance present ({}) exceeds total ({})",
                self.present, self.total
            )));
        }
        Ok(())
    }

    /// Whole percentage, rounded half-up. Zero sessions reads as 0%.
    pub fn percentage(&self) -> u8 {
        if self.total == 0 {
            return 0;
        }
        let pct = (f64::from(self.present) * 100.0 / f64::from(self.total)).round();
        pct.clamp(0.0, 100.0) as u8
    }
}

/// An enrolled student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Course progress, 0-100
    pub progress: u8,
    pub attendance: Attendance,
    pub vm_status: StudentVmStatus,
    pub last_active: Option<DateTime<Utc>>,
    pub enrolled_at: DateTime<Utc>,
}

impl Student {
    pub fn new(new: NewStudent) -> Result<Self> {
        let student = Self {
            id: format!("student-{}", uuid::Uuid::new_v4()),
            name: new.name.trim().to_string(),
            email: new.email.trim().to_string(),
            progress: 0,
            attendance: Attendance::default(),
            vm_status: StudentVmStatus::Unset,
            last_active: None,
            enrolled_at: Utc::now(),
        };
        student.validate()?;
        Ok(student)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::Validation("student name is required".into()));
        }
        if self.email.is_empty() {
            return Err(Error::Validation("student email is required".into()));
        }
        if !self.email.contains('@') {
            return Err(Error::Validation(format!("invalid email: {}", self.email)));
        }
        if self.progress > 100 {
            return Err(Error::Validation(format!(
                "progress must be within 0-100, got {}",
                self.progress
            )));
        }
        self.attendance.validate()
    }

    pub fn apply(&mut self, patch: StudentPatch) {
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if let Some(attendance) = patch.attendance {
            self.attendance = attendance;
        }
        if let Some(status) = patch.vm_status {
            self.vm_status = status;
        }
        if let Some(at) = patch.last_active {
            self.last_active = Some(at);
        }
    }
}

/// Enrolment form
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewStudent {
    pub name: String,
    pub email: String,
}

impl NewStudent {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// Partial update for a student; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentPatch {
    pub progress: Option<u8>,
    pub attendance: Option<Attendance>,
    pub vm_status: Option<StudentVmStatus>,
    pub last_active: Option<DateTime<Utc>>,
}

impl StudentPatch {
    pub fn progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn attendance(mut self, present: u32, total: u32) -> Self {
        self.attendance = Some(Attendance { present, total });
        self
    }

    pub fn vm_status(mut self, status: StudentVmStatus) -> Self {
        self.vm_status = Some(status);
        self
    }

    pub fn last_active(mut self, at: DateTime<Utc>) -> Self {
        self.last_active = Some(at);
        self
    }
}
