//! In-memory entity store for batches and the VM template catalog
//!
//! Every mutation goes through [`EntityStore::update`] or
//! [`EntityStore::apply_if`]: the closure edits a private copy of the batch,
//! and the copy only replaces the stored record once it is complete and valid.
//! Readers never observe a half-applied change.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;

use crate::models::*;
use crate::schedule::{DaySchedule, TimeWindow};
use crate::{Error, Result};

/// Arena of batches keyed by id. Construct one per console (or per test).
pub struct EntityStore {
    batches: RwLock<HashMap<String, Batch>>,
    templates: RwLock<HashMap<String, VmTemplate>>,
    default_window: TimeWindow,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::with_default_window(TimeWindow::default())
    }

    pub fn with_default_window(default_window: TimeWindow) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            templates: RwLock::new(HashMap::new()),
            default_window,
        }
    }

    pub fn default_window(&self) -> TimeWindow {
        self.default_window
    }

    // ===== Batches =====

    /// Create a batch in `Draft` status and return its id.
    pub fn add_batch(&self, draft: NewBatch) -> Result<String> {
        let batch = Batch::new(draft)?;
        let mut batches = self.batches.write();
        ensure_unique_name(&batches, &batch)?;

        let id = batch.id.clone();
        tracing::info!(batch = %id, name = %batch.name, "Batch created");
        batches.insert(id.clone(), batch);
        Ok(id)
    }

    pub fn get_batch(&self, id: &str) -> Result<Batch> {
        self.batches
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::BatchNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.batches.read().contains_key(id)
    }

    /// All batches, oldest first.
    pub fn list_batches(&self) -> Vec<Batch> {
        let mut batches: Vec<_> = self.batches.read().values().cloned().collect();
        batches.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        batches
    }

    pub fn batch_count(&self) -> usize {
        self.batches.read().len()
    }

    /// Replace a batch with an edited, validated copy.
    ///
    /// If `f` fails or the edited copy violates an invariant, the stored
    /// record is left untouched and the error is returned.
    pub fn update<F>(&self, id: &str, f: F) -> Result<Batch>
    where
        F: FnOnce(&mut Batch) -> Result<()>,
    {
        let mut batches = self.batches.write();
        let current = batches
            .get(id)
            .ok_or_else(|| Error::BatchNotFound(id.to_string()))?;

        let mut next = current.clone();
        f(&mut next)?;
        next.validate()?;
        if next.name != current.name {
            ensure_unique_name(&batches, &next)?;
        }
        next.updated_at = Utc::now();

        batches.insert(id.to_string(), next.clone());
        Ok(next)
    }

    /// Guarded variant of [`update`](Self::update) for async completions.
    ///
    /// `f` returns `false` when its guard fails. A missing batch, a failed
    /// guard, or an invalid result all leave the store unchanged and return
    /// `false`; none of them is an error.
    pub fn apply_if<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut Batch) -> bool,
    {
        let mut batches = self.batches.write();
        let Some(current) = batches.get(id) else {
            return false;
        };

        let mut next = current.clone();
        if !f(&mut next) {
            return false;
        }
        if let Err(e) = next.validate() {
            tracing::warn!(batch = %id, error = %e, "Discarding invalid completion");
            return false;
        }
        next.updated_at = Utc::now();
        batches.insert(id.to_string(), next);
        true
    }

    pub fn update_batch(&self, id: &str, patch: BatchPatch) -> Result<Batch> {
        self.update(id, |batch| {
            batch.apply(patch);
            Ok(())
        })
    }

    // ===== Students =====

    pub fn add_student(&self, batch_id: &str, new: NewStudent) -> Result<String> {
        let student = Student::new(new)?;
        let student_id = student.id.clone();

        self.update(batch_id, |batch| {
            if batch
                .students
                .iter()
                .any(|s| s.email.eq_ignore_ascii_case(&student.email))
            {
                return Err(Error::Validation(format!(
                    "{} is already enrolled in this batch",
                    student.email
                )));
            }
            if batch.students.len() >= batch.seat_count as usize {
                return Err(Error::Validation(format!(
                    "batch is full ({} seats)",
                    batch.seat_count
                )));
            }
            batch.students.push(student);
            Ok(())
        })?;

        tracing::info!(batch = %batch_id, student = %student_id, "Student enrolled");
        Ok(student_id)
    }

    pub fn remove_student(&self, batch_id: &str, student_id: &str) -> Result<()> {
        self.update(batch_id, |batch| {
            let before = batch.students.len();
            batch.students.retain(|s| s.id != student_id);
            if batch.students.len() == before {
                return Err(Error::StudentNotFound(student_id.to_string()));
            }
            if let Some(config) = batch.vm_config.as_mut() {
                for instance in config.instances.iter_mut() {
                    if instance.student_id.as_deref() == Some(student_id) {
                        instance.student_id = None;
                    }
                }
            }
            Ok(())
        })?;

        tracing::info!(batch = %batch_id, student = %student_id, "Student removed");
        Ok(())
    }

    pub fn update_student(&self, batch_id: &str, student_id: &str, patch: StudentPatch) -> Result<Student> {
        let batch = self.update(batch_id, |batch| {
            let student = batch
                .students
                .iter_mut()
                .find(|s| s.id == student_id)
                .ok_or_else(|| Error::StudentNotFound(student_id.to_string()))?;
            student.apply(patch);
            Ok(())
        })?;

        batch
            .student(student_id)
            .cloned()
            .ok_or_else(|| Error::StudentNotFound(student_id.to_string()))
    }

    // ===== VM configuration =====

    /// Merge a partial VM config, creating the config on first use.
    ///
    /// The catalog stays read-locked until the batch is written so template
    /// references cannot go stale. Lock order is templates, then batches.
    pub fn update_vm_config(&self, batch_id: &str, patch: VmConfigPatch) -> Result<VmConfig> {
        let templates = self.templates.read();
        if let Some(assignments) = &patch.templates {
            check_template_refs(&templates, assignments)?;
        }

        let batch = self.update(batch_id, |batch| {
            batch.vm_config.get_or_insert_with(VmConfig::default).apply(patch)
        })?;
        drop(templates);
        batch.vm_config().cloned()
    }

    /// Set the VM usage window for one date inside the VM rental range.
    pub fn set_day_window(&self, batch_id: &str, date: NaiveDate, window: TimeWindow) -> Result<()> {
        self.update(batch_id, |batch| {
            let config = batch.vm_config_mut()?;
            let (start, end) = vm_range(config)?;
            if date < start || date > end {
                return Err(Error::Validation(format!(
                    "{} is outside the VM rental range {} to {}",
                    date, start, end
                )));
            }
            config.day_windows.set(date, window)
        })?;
        Ok(())
    }

    /// Copy one date's window (or the default) to every date in range.
    pub fn apply_window_to_all(&self, batch_id: &str, source: NaiveDate) -> Result<()> {
        let default = self.default_window;
        self.update(batch_id, |batch| {
            let config = batch.vm_config_mut()?;
            let range = vm_range(config)?;
            config.day_windows.apply_to_all(source, range, default);
            Ok(())
        })?;
        Ok(())
    }

    /// One resolved entry per date in the VM rental range.
    pub fn day_schedules(&self, batch_id: &str) -> Result<Vec<DaySchedule>> {
        let batch = self.get_batch(batch_id)?;
        let config = batch.vm_config()?;
        match (config.vm_start_date, config.vm_end_date) {
            (Some(start), Some(end)) => Ok(config.day_windows.resolve(start, end, self.default_window)),
            _ => Ok(Vec::new()),
        }
    }

    // ===== Templates =====

    pub fn register_template(&self, template: VmTemplate) -> Result<String> {
        let mut templates = self.templates.write();
        if templates.values().any(|t| t.name == template.name) {
            return Err(Error::Validation(format!(
                "a template named '{}' already exists",
                template.name
            )));
        }
        let id = template.id.clone();
        tracing::info!(template = %id, name = %template.name, "Template registered");
        templates.insert(id.clone(), template);
        Ok(id)
    }

    pub fn get_template(&self, id: &str) -> Result<VmTemplate> {
        self.templates
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound(id.to_string()))
    }

    pub fn templates(&self) -> Vec<VmTemplate> {
        let mut templates: Vec<_> = self.templates.read().values().cloned().collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        templates
    }

    pub fn template_count(&self) -> usize {
        self.templates.read().len()
    }

    /// Ids of templates referenced by any batch.
    pub fn templates_in_use(&self) -> HashSet<String> {
        self.batches
            .read()
            .values()
            .filter_map(|b| b.vm_config.as_ref())
            .flat_map(|c| c.templates.iter().map(|t| t.template_id.clone()))
            .collect()
    }
}

fn check_template_refs(templates: &HashMap<String, VmTemplate>, assignments: &[TemplateAssignment]) -> Result<()> {
    if templates.is_empty() {
        return Ok(());
    }
    for assignment in assignments {
        let id = assignment.template_id.trim();
        if !id.is_empty() && !templates.contains_key(id) {
            return Err(Error::TemplateNotFound(id.to_string()));
        }
    }
    Ok(())
}

/// Batch names are unique ignoring ASCII case; `batch` itself is skipped.
fn ensure_unique_name(batches: &HashMap<String, Batch>, batch: &Batch) -> Result<()> {
    let taken = batches
        .values()
        .any(|b| b.id != batch.id && b.name.eq_ignore_ascii_case(&batch.name));
    if taken {
        return Err(Error::Validation(format!(
            "a batch named '{}' already exists",
            batch.name
        )));
    }
    Ok(())
}

fn vm_range(config: &VmConfig) -> Result<(NaiveDate, NaiveDate)> {
    match (config.vm_start_date, config.vm_end_date) {
        (Some(start), Some(end)) => Ok((start, end)),
        _ => Err(Error::Validation("VM start and end dates are required".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn store_with_batch() -> (EntityStore, String) {
        let store = EntityStore::new();
        let id = store
            .add_batch(NewBatch::new("Cloud 101", BatchSchedule::new(date(1), date(10))).seats(2))
            .unwrap();
        (store, id)
    }

    #[test]
    fn test_add_batch() {
        let (store, id) = store_with_batch();
        assert_eq!(store.batch_count(), 1);
        assert_eq!(store.get_batch(&id).unwrap().name, "Cloud 101");
    }

    #[test]
    fn test_duplicate_batch_name() {
        let (store, _) = store_with_batch();
        let result = store.add_batch(NewBatch::new("cloud 101", BatchSchedule::new(date(1), date(2))));
        assert!(result.unwrap_err().is_validation());
    }

    #[test]
    fn test_rename_to_taken_name() {
        let (store, _) = store_with_batch();
        let other = store
            .add_batch(NewBatch::new("Cloud 201", BatchSchedule::new(date(1), date(2))))
            .unwrap();

        let rename = BatchPatch {
            name: Some("CLOUD 101".into()),
            ..Default::default()
        };
        assert!(store.update_batch(&other, rename).unwrap_err().is_validation());
        assert_eq!(store.get_batch(&other).unwrap().name, "Cloud 201");

        // Changing only the case of its own name is allowed
        let recase = BatchPatch {
            name: Some("cloud 201".into()),
            ..Default::default()
        };
        assert_eq!(store.update_batch(&other, recase).unwrap().name, "cloud 201");
    }

    #[test]
    fn test_not_found() {
        let store = EntityStore::new();
        assert!(matches!(store.get_batch("nope"), Err(Error::BatchNotFound(_))));
        assert!(matches!(
            store.add_student("nope", NewStudent::new("a", "a@example.com")),
            Err(Error::BatchNotFound(_))
        ));
    }

    #[test]
    fn test_student_lifecycle() {
        let (store, id) = store_with_batch();
        let sid = store
            .add_student(&id, NewStudent::new("Grace", "grace@example.com"))
            .unwrap();
        assert!(store.get_batch(&id).unwrap().has_students());

        let updated = store
            .update_student(&id, &sid, StudentPatch::default().attendance(8, 10))
            .unwrap();
        assert_eq!(updated.attendance.percentage(), 80);

        store.remove_student(&id, &sid).unwrap();
        assert!(!store.get_batch(&id).unwrap().has_students());
        assert!(matches!(store.remove_student(&id, &sid), Err(Error::StudentNotFound(_))));
    }

    #[test]
    fn test_student_validation_leaves_batch_unchanged() {
        let (store, id) = store_with_batch();
        let before = store.get_batch(&id).unwrap();

        assert!(store.add_student(&id, NewStudent::new("No Email", "")).is_err());
        store.add_student(&id, NewStudent::new("A", "a@example.com")).unwrap();
        assert!(store.add_student(&id, NewStudent::new("A2", "A@example.com")).is_err());
        store.add_student(&id, NewStudent::new("B", "b@example.com")).unwrap();
        // Two seats
        assert!(store.add_student(&id, NewStudent::new("C", "c@example.com")).is_err());

        let after = store.get_batch(&id).unwrap();
        assert_eq!(after.students.len(), 2);
        assert_eq!(before.students.len(), 0);
    }

    #[test]
    fn test_invalid_attendance_rejected() {
        let (store, id) = store_with_batch();
        let sid = store.add_student(&id, NewStudent::new("A", "a@example.com")).unwrap();
        let err = store
            .update_student(&id, &sid, StudentPatch::default().attendance(5, 4))
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.get_batch(&id).unwrap().students[0].attendance.total, 0);
    }

    #[test]
    fn test_update_vm_config_creates_and_merges() {
        let (store, id) = store_with_batch();
        let config = store
            .update_vm_config(&id, VmConfigPatch::new().participants(10))
            .unwrap();
        assert_eq!(config.participant_count, 10);
        assert_eq!(config.admin_count, 1);

        let config = store
            .update_vm_config(&id, VmConfigPatch::new().dates(date(1), date(5)))
            .unwrap();
        assert_eq!(config.participant_count, 10);
        assert_eq!(config.vm_start_date, Some(date(1)));
    }

    #[test]
    fn test_failed_update_is_atomic() {
        let (store, id) = store_with_batch();
        store.update_vm_config(&id, VmConfigPatch::new().participants(3)).unwrap();

        let patch = VmConfigPatch::new().participants(0).admins(4);
        assert!(store.update_vm_config(&id, patch).is_err());

        let config = store.get_batch(&id).unwrap().vm_config.unwrap();
        assert_eq!(config.participant_count, 3);
        assert_eq!(config.admin_count, 1);
    }

    #[test]
    fn test_template_refs_checked_against_catalog() {
        let (store, id) = store_with_batch();
        let tid = store
            .register_template(VmTemplate::new("ubuntu", "Ubuntu 22.04"))
            .unwrap();

        let bad = VmConfigPatch::new().templates(vec![TemplateAssignment::new("tmpl-missing", "lab")]);
        assert!(matches!(store.update_vm_config(&id, bad), Err(Error::TemplateNotFound(_))));

        let good = VmConfigPatch::new().templates(vec![TemplateAssignment::new(&tid, "lab")]);
        assert!(store.update_vm_config(&id, good).unwrap().is_complete());
        assert!(store.templates_in_use().contains(&tid));
    }

    #[test]
    fn test_concurrent_catalog_and_config_updates() {
        let (store, id) = store_with_batch();
        let store = std::sync::Arc::new(store);
        let seed = store.register_template(VmTemplate::new("seed", "Debian 12")).unwrap();

        let registrar = {
            let store = store.clone();
            std::thread::spawn(move || {
                for n in 0..200 {
                    store
                        .register_template(VmTemplate::new(format!("img-{}", n), "Ubuntu"))
                        .unwrap();
                }
            })
        };
        for _ in 0..200 {
            let patch = VmConfigPatch::new().templates(vec![TemplateAssignment::new(&seed, "lab")]);
            store.update_vm_config(&id, patch).unwrap();
        }
        registrar.join().unwrap();

        assert_eq!(store.template_count(), 201);
        let config = store.get_batch(&id).unwrap().vm_config.unwrap();
        assert!(config
            .templates
            .iter()
            .all(|t| store.get_template(&t.template_id).is_ok()));
    }

    #[test]
    fn test_day_windows() {
        let (store, id) = store_with_batch();
        store
            .update_vm_config(&id, VmConfigPatch::new().dates(date(1), date(3)))
            .unwrap();

        let custom = TimeWindow::from_hm((10, 0), (14, 30)).unwrap();
        store.set_day_window(&id, date(2), custom).unwrap();
        assert!(store.set_day_window(&id, date(9), custom).is_err());

        let days = store.day_schedules(&id).unwrap();
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].window, TimeWindow::default());
        assert_eq!(days[1].window, custom);

        store.apply_window_to_all(&id, date(2)).unwrap();
        assert!(store.day_schedules(&id).unwrap().iter().all(|d| d.window == custom));
    }

    #[test]
    fn test_apply_if_guard() {
        let (store, id) = store_with_batch();
        assert!(!store.apply_if(&id, |_| false));
        assert!(!store.apply_if("missing", |_| true));
        assert!(store.apply_if(&id, |b| {
            b.course_id = Some("course-1".into());
            true
        }));
        assert!(store.get_batch(&id).unwrap().has_course());

        // Invalid result is discarded
        assert!(!store.apply_if(&id, |b| {
            b.seat_count = 0;
            true
        }));
        assert_eq!(store.get_batch(&id).unwrap().seat_count, 2);
    }
}
