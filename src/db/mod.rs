//! Persistence for templates, exceptions and appointments.
//!
//! Everything above this module talks to a [`Store`]. Writes that must not
//! race (a booking and the check that allowed it, a template and the overlap
//! check against its siblings) are handed to the store together with the
//! check, and the store runs both under one lock.

use async_trait::async_trait;

use crate::error::BookingResult;
use crate::models::appointment::{
    Appointment, AppointmentFilter, AppointmentStatus, ParticipantRole,
};
use crate::models::exception::{AvailabilityException, ExceptionFilter};
use crate::models::template::AvailabilityTemplate;
use crate::models::{CalendarDate, TimeOfDay, Timestamp};

pub mod memory;
pub mod postgres;

/// Runs against a template's siblings in its group before it is written.
pub type TemplateCheck<'a> =
    &'a (dyn Fn(&[AvailabilityTemplate]) -> BookingResult<()> + Send + Sync);

/// Runs against the staff member's day before an appointment is written.
pub type BookingCheck<'a> = &'a (dyn Fn(&DaySnapshot) -> BookingResult<()> + Send + Sync);

/// Templates that must not overlap one another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TemplateGroup {
    pub staff_id: i64,
    pub day_of_week: i16,
    pub week_of_month: Option<i16>,
}

impl TemplateGroup {
    pub fn lock_key(&self) -> String {
        match self.week_of_month {
            Some(week) => format!("template:{}:{}:{}", self.staff_id, self.day_of_week, week),
            None => format!("template:{}:{}:*", self.staff_id, self.day_of_week),
        }
    }
}

/// Everything that decides whether a staff member can be booked on one date.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DaySnapshot {
    /// Active templates for the date's weekday, in any week or validity range
    pub templates: Vec<AvailabilityTemplate>,
    /// Exceptions dated on the day
    pub exceptions: Vec<AvailabilityException>,
    /// Appointments on the day that still hold their slot
    pub appointments: Vec<Appointment>,
}

pub fn booking_lock_key(appointee_id: i64, date: CalendarDate) -> String {
    format!("appointment:{}:{}", appointee_id, date)
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn templates_for_staff(
        &self,
        staff_id: i64,
        day_of_week: Option<i16>,
    ) -> BookingResult<Vec<AvailabilityTemplate>>;

    async fn templates_in_group(
        &self,
        group: TemplateGroup,
    ) -> BookingResult<Vec<AvailabilityTemplate>>;

    async fn template_with_id(&self, id: i64) -> BookingResult<Option<AvailabilityTemplate>>;

    /// Inserts `template` (its id is ignored) if `check` passes against the
    /// other templates in its group.
    async fn insert_template(
        &self,
        template: &AvailabilityTemplate,
        check: TemplateCheck<'_>,
    ) -> BookingResult<AvailabilityTemplate>;

    /// Overwrites the stored template if `check` passes against the other
    /// templates in the group it now belongs to.
    async fn save_template(
        &self,
        template: &AvailabilityTemplate,
        check: TemplateCheck<'_>,
    ) -> BookingResult<AvailabilityTemplate>;

    async fn delete_template(&self, id: i64) -> BookingResult<bool>;

    async fn exceptions_for_staff(
        &self,
        staff_id: i64,
        filter: &ExceptionFilter,
    ) -> BookingResult<Vec<AvailabilityException>>;

    async fn exception_with_id(&self, id: i64) -> BookingResult<Option<AvailabilityException>>;

    async fn insert_exception(
        &self,
        exception: &AvailabilityException,
    ) -> BookingResult<AvailabilityException>;

    async fn save_exception(
        &self,
        exception: &AvailabilityException,
    ) -> BookingResult<AvailabilityException>;

    async fn delete_exception(&self, id: i64) -> BookingResult<bool>;

    async fn day_snapshot(
        &self,
        staff_id: i64,
        date: CalendarDate,
        exclude_appointment: Option<i64>,
    ) -> BookingResult<DaySnapshot>;

    /// Soft-deleted appointments are never returned.
    async fn appointment_with_id(&self, id: i64) -> BookingResult<Option<Appointment>>;

    async fn appointments_for_participant(
        &self,
        user_id: i64,
        role: ParticipantRole,
        filter: &AppointmentFilter,
    ) -> BookingResult<Vec<Appointment>>;

    /// Inserts `appointment` (its id is ignored) if `check` passes against a
    /// snapshot of the appointee's day taken under the day's lock.
    async fn insert_appointment(
        &self,
        appointment: &Appointment,
        check: BookingCheck<'_>,
    ) -> BookingResult<Appointment>;

    /// Overwrites the stored appointment as long as it is still in `expected`
    /// status. With a `check`, the appointee's (new) day is locked and
    /// checked first, leaving this appointment out of the snapshot.
    async fn save_appointment(
        &self,
        appointment: &Appointment,
        expected: AppointmentStatus,
        check: Option<BookingCheck<'_>>,
    ) -> BookingResult<Appointment>;

    async fn soft_delete_appointment(&self, id: i64, at: Timestamp) -> BookingResult<bool>;

    /// Accepted appointments whose end is at or before `time` on `date`.
    async fn accepted_ended_by(
        &self,
        date: CalendarDate,
        time: TimeOfDay,
    ) -> BookingResult<Vec<Appointment>>;
}
