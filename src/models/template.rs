use std::sync::Arc;

use async_graphql::{InputObject, MaybeUndefined, SimpleObject};

use crate::config::CapacityLimits;
use crate::db::{Store, TemplateGroup};
use crate::error::{BookingError, BookingResult};
use crate::models::interval::TimeRange;
use crate::models::schedule::overlapping_template;
use crate::models::{CalendarDate, TimeOfDay};

/// A recurring weekly block of hours a staff member is available
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityTemplate {
    /// The ID of the template
    pub id: i64,
    /// The staff member these hours belong to
    pub staff_id: i64,
    /// The day these hours repeat on, from 1 (Monday) to 7 (Sunday)
    pub day_of_week: i16,
    /// Which occurrence of the weekday in a month this applies to (1-5),
    /// or every week when empty
    pub week_of_month: Option<i16>,
    /// When the hours start
    pub start_time: TimeOfDay,
    /// When the hours end
    pub end_time: TimeOfDay,
    /// How many regular appointments can be taken in this block
    pub max_regular_capacity: i32,
    /// How many emergency appointments can be squeezed in
    pub max_emergency_capacity: i32,
    /// Whether emergency appointments are taken at all
    pub allow_emergency: bool,
    /// Inactive templates are kept but never open any time
    pub is_active: bool,
    /// The first date these hours apply
    pub valid_from: Option<CalendarDate>,
    /// The last date these hours apply
    pub valid_to: Option<CalendarDate>,
}

impl AvailabilityTemplate {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn group(&self) -> TemplateGroup {
        TemplateGroup {
            staff_id: self.staff_id,
            day_of_week: self.day_of_week,
            week_of_month: self.week_of_month,
        }
    }

    /// Whether this template opens any hours on the given date.
    pub fn applies_on(&self, date: CalendarDate) -> bool {
        self.is_active
            && self.day_of_week == date.day_of_week()
            && self
                .week_of_month
                .map(|week| week == date.week_of_month())
                .unwrap_or(true)
            && self.valid_from.map(|from| from <= date).unwrap_or(true)
            && self.valid_to.map(|to| date <= to).unwrap_or(true)
    }

    fn validate(&self) -> BookingResult<()> {
        if !(1..=7).contains(&self.day_of_week) {
            return Err(BookingError::validation(format!(
                "Day of week must be between 1 (Monday) and 7 (Sunday), got {}",
                self.day_of_week
            )));
        }
        if let Some(week) = self.week_of_month {
            if !(1..=5).contains(&week) {
                return Err(BookingError::validation(format!(
                    "Week of month must be between 1 and 5, got {}",
                    week
                )));
            }
        }
        TimeRange::new(self.start_time, self.end_time)?;
        if let (Some(from), Some(to)) = (self.valid_from, self.valid_to) {
            if from > to {
                return Err(BookingError::validation(format!(
                    "Valid from date {} must not be after valid to date {}",
                    from, to
                )));
            }
        }

        Ok(())
    }

    fn clamp_capacities(&mut self, limits: &CapacityLimits) {
        self.max_regular_capacity = limits.clamp_regular(self.max_regular_capacity);
        self.max_emergency_capacity = limits.clamp_emergency(self.max_emergency_capacity);
    }
}

#[derive(InputObject, Clone, Debug)]
pub struct NewTemplate {
    pub day_of_week: i16,
    pub week_of_month: Option<i16>,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    #[graphql(default = 1)]
    pub max_regular_capacity: i32,
    #[graphql(default)]
    pub max_emergency_capacity: i32,
    #[graphql(default)]
    pub allow_emergency: bool,
    #[graphql(default = true)]
    pub is_active: bool,
    pub valid_from: Option<CalendarDate>,
    pub valid_to: Option<CalendarDate>,
}

impl NewTemplate {
    fn into_template(self, staff_id: i64) -> AvailabilityTemplate {
        AvailabilityTemplate {
            id: 0,
            staff_id,
            day_of_week: self.day_of_week,
            week_of_month: self.week_of_month,
            start_time: self.start_time,
            end_time: self.end_time,
            max_regular_capacity: self.max_regular_capacity,
            max_emergency_capacity: self.max_emergency_capacity,
            allow_emergency: self.allow_emergency,
            is_active: self.is_active,
            valid_from: self.valid_from,
            valid_to: self.valid_to,
        }
    }
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct TemplateUpdate {
    pub day_of_week: Option<i16>,
    pub week_of_month: MaybeUndefined<i16>,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    pub max_regular_capacity: Option<i32>,
    pub max_emergency_capacity: Option<i32>,
    pub allow_emergency: Option<bool>,
    pub is_active: Option<bool>,
    pub valid_from: MaybeUndefined<CalendarDate>,
    pub valid_to: MaybeUndefined<CalendarDate>,
}

impl TemplateUpdate {
    fn apply_to(self, template: &mut AvailabilityTemplate) {
        if let Some(day_of_week) = self.day_of_week {
            template.day_of_week = day_of_week;
        }
        patch(&mut template.week_of_month, self.week_of_month);
        if let Some(start_time) = self.start_time {
            template.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            template.end_time = end_time;
        }
        if let Some(capacity) = self.max_regular_capacity {
            template.max_regular_capacity = capacity;
        }
        if let Some(capacity) = self.max_emergency_capacity {
            template.max_emergency_capacity = capacity;
        }
        if let Some(allow_emergency) = self.allow_emergency {
            template.allow_emergency = allow_emergency;
        }
        if let Some(is_active) = self.is_active {
            template.is_active = is_active;
        }
        patch(&mut template.valid_from, self.valid_from);
        patch(&mut template.valid_to, self.valid_to);
    }
}

fn patch<T>(field: &mut Option<T>, value: MaybeUndefined<T>) {
    match value {
        MaybeUndefined::Undefined => {}
        MaybeUndefined::Null => *field = None,
        MaybeUndefined::Value(value) => *field = Some(value),
    }
}

/// Owns every staff member's recurring weekly hours.
pub struct TemplateStore {
    db: Arc<dyn Store>,
    limits: CapacityLimits,
}

impl TemplateStore {
    pub fn new(db: Arc<dyn Store>, limits: CapacityLimits) -> Self {
        Self { db, limits }
    }

    pub async fn create(
        &self,
        staff_id: i64,
        new_template: NewTemplate,
    ) -> BookingResult<AvailabilityTemplate> {
        let mut template = new_template.into_template(staff_id);
        template.validate()?;
        template.clamp_capacities(&self.limits);

        let candidate = template.clone();
        let created = self
            .db
            .insert_template(&template, &move |siblings: &[AvailabilityTemplate]| {
                ensure_no_overlap(&candidate, siblings)
            })
            .await?;

        tracing::info!(
            template_id = created.id,
            staff_id,
            day_of_week = created.day_of_week,
            "created availability template"
        );
        Ok(created)
    }

    pub async fn with_id(&self, id: i64) -> BookingResult<AvailabilityTemplate> {
        self.db
            .template_with_id(id)
            .await?
            .ok_or(BookingError::NotFound("availability template"))
    }

    pub async fn find_by_staff(
        &self,
        staff_id: i64,
        day_of_week: Option<i16>,
    ) -> BookingResult<Vec<AvailabilityTemplate>> {
        self.db.templates_for_staff(staff_id, day_of_week).await
    }

    /// Applies a partial update, re-checking the merged template against its
    /// siblings in whatever group it ends up in.
    pub async fn update(
        &self,
        id: i64,
        owner_id: i64,
        update: TemplateUpdate,
    ) -> BookingResult<AvailabilityTemplate> {
        let mut template = self.owned(id, owner_id).await?;
        update.apply_to(&mut template);
        template.validate()?;
        template.clamp_capacities(&self.limits);

        let candidate = template.clone();
        let updated = self
            .db
            .save_template(&template, &move |siblings: &[AvailabilityTemplate]| {
                ensure_no_overlap(&candidate, siblings)
            })
            .await?;

        tracing::info!(template_id = id, staff_id = owner_id, "updated availability template");
        Ok(updated)
    }

    pub async fn delete(&self, id: i64, owner_id: i64) -> BookingResult<()> {
        self.owned(id, owner_id).await?;
        if !self.db.delete_template(id).await? {
            return Err(BookingError::NotFoundOrUnauthorized("availability template"));
        }

        tracing::info!(template_id = id, staff_id = owner_id, "deleted availability template");
        Ok(())
    }

    async fn owned(&self, id: i64, owner_id: i64) -> BookingResult<AvailabilityTemplate> {
        self.db
            .template_with_id(id)
            .await?
            .filter(|template| template.staff_id == owner_id)
            .ok_or(BookingError::NotFoundOrUnauthorized("availability template"))
    }
}

fn ensure_no_overlap(
    candidate: &AvailabilityTemplate,
    siblings: &[AvailabilityTemplate],
) -> BookingResult<()> {
    if !candidate.is_active {
        return Ok(());
    }

    let exclude = (candidate.id != 0).then(|| candidate.id);
    match overlapping_template(siblings, &candidate.range(), exclude) {
        Some(existing) => Err(BookingError::Overlap(format!(
            "These hours overlap with template {} ({} to {}) on the same day",
            existing.id, existing.start_time, existing.end_time
        ))),
        None => Ok(()),
    }
}
