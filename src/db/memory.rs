use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::db::{BookingCheck, DaySnapshot, Store, TemplateCheck, TemplateGroup};
use crate::error::{BookingError, BookingResult};
use crate::models::appointment::{
    Appointment, AppointmentFilter, AppointmentStatus, ParticipantRole,
};
use crate::models::exception::{AvailabilityException, ExceptionFilter};
use crate::models::template::AvailabilityTemplate;
use crate::models::{CalendarDate, TimeOfDay, Timestamp};

/// A [`Store`] that keeps everything in memory behind one async mutex.
///
/// Holding the mutex for a whole check-then-write gives the same guarantee
/// the Postgres store gets from its advisory locks.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    last_id: i64,
    templates: BTreeMap<i64, AvailabilityTemplate>,
    exceptions: BTreeMap<i64, AvailabilityException>,
    appointments: BTreeMap<i64, Appointment>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }

    fn group(&self, group: TemplateGroup, exclude: Option<i64>) -> Vec<AvailabilityTemplate> {
        self.templates
            .values()
            .filter(|template| template.group() == group && Some(template.id) != exclude)
            .cloned()
            .collect()
    }

    fn snapshot(
        &self,
        staff_id: i64,
        date: CalendarDate,
        exclude_appointment: Option<i64>,
    ) -> DaySnapshot {
        DaySnapshot {
            templates: self
                .templates
                .values()
                .filter(|template| {
                    template.staff_id == staff_id
                        && template.day_of_week == date.day_of_week()
                        && template.is_active
                })
                .cloned()
                .collect(),
            exceptions: self
                .exceptions
                .values()
                .filter(|exception| {
                    exception.staff_id == staff_id && exception.exception_date == date
                })
                .cloned()
                .collect(),
            appointments: self
                .appointments
                .values()
                .filter(|appointment| {
                    appointment.appointee_id == staff_id
                        && appointment.appointment_date == date
                        && appointment.deleted_at.is_none()
                        && appointment.status.holds_slot()
                        && Some(appointment.id) != exclude_appointment
                })
                .cloned()
                .collect(),
        }
    }
}

fn by_date_and_time(appointments: &mut [Appointment]) {
    appointments.sort_by_key(|appointment| {
        (
            appointment.appointment_date,
            appointment.start_time,
            appointment.id,
        )
    });
}

#[async_trait]
impl Store for MemoryStore {
    async fn templates_for_staff(
        &self,
        staff_id: i64,
        day_of_week: Option<i16>,
    ) -> BookingResult<Vec<AvailabilityTemplate>> {
        let state = self.state.lock().await;
        let mut templates: Vec<AvailabilityTemplate> = state
            .templates
            .values()
            .filter(|template| {
                template.staff_id == staff_id
                    && day_of_week.map(|day| day == template.day_of_week).unwrap_or(true)
            })
            .cloned()
            .collect();
        templates.sort_by_key(|template| (template.day_of_week, template.start_time, template.id));

        Ok(templates)
    }

    async fn templates_in_group(
        &self,
        group: TemplateGroup,
    ) -> BookingResult<Vec<AvailabilityTemplate>> {
        Ok(self.state.lock().await.group(group, None))
    }

    async fn template_with_id(&self, id: i64) -> BookingResult<Option<AvailabilityTemplate>> {
        Ok(self.state.lock().await.templates.get(&id).cloned())
    }

    async fn insert_template(
        &self,
        template: &AvailabilityTemplate,
        check: TemplateCheck<'_>,
    ) -> BookingResult<AvailabilityTemplate> {
        let mut state = self.state.lock().await;
        check(&state.group(template.group(), None))?;

        let id = state.next_id();
        let created = AvailabilityTemplate {
            id,
            ..template.clone()
        };
        state.templates.insert(id, created.clone());

        Ok(created)
    }

    async fn save_template(
        &self,
        template: &AvailabilityTemplate,
        check: TemplateCheck<'_>,
    ) -> BookingResult<AvailabilityTemplate> {
        let mut state = self.state.lock().await;
        if !state.templates.contains_key(&template.id) {
            return Err(BookingError::NotFound("availability template"));
        }
        check(&state.group(template.group(), Some(template.id)))?;

        state.templates.insert(template.id, template.clone());
        Ok(template.clone())
    }

    async fn delete_template(&self, id: i64) -> BookingResult<bool> {
        Ok(self.state.lock().await.templates.remove(&id).is_some())
    }

    async fn exceptions_for_staff(
        &self,
        staff_id: i64,
        filter: &ExceptionFilter,
    ) -> BookingResult<Vec<AvailabilityException>> {
        let state = self.state.lock().await;
        let mut exceptions: Vec<AvailabilityException> = state
            .exceptions
            .values()
            .filter(|exception| exception.staff_id == staff_id && filter.matches(exception))
            .cloned()
            .collect();
        exceptions.sort_by_key(|exception| {
            (exception.exception_date, exception.start_time, exception.id)
        });

        Ok(exceptions)
    }

    async fn exception_with_id(&self, id: i64) -> BookingResult<Option<AvailabilityException>> {
        Ok(self.state.lock().await.exceptions.get(&id).cloned())
    }

    async fn insert_exception(
        &self,
        exception: &AvailabilityException,
    ) -> BookingResult<AvailabilityException> {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        let created = AvailabilityException {
            id,
            ..exception.clone()
        };
        state.exceptions.insert(id, created.clone());

        Ok(created)
    }

    async fn save_exception(
        &self,
        exception: &AvailabilityException,
    ) -> BookingResult<AvailabilityException> {
        let mut state = self.state.lock().await;
        match state.exceptions.get_mut(&exception.id) {
            Some(stored) => {
                *stored = exception.clone();
                Ok(exception.clone())
            }
            None => Err(BookingError::NotFound("availability exception")),
        }
    }

    async fn delete_exception(&self, id: i64) -> BookingResult<bool> {
        Ok(self.state.lock().await.exceptions.remove(&id).is_some())
    }

    async fn day_snapshot(
        &self,
        staff_id: i64,
        date: CalendarDate,
        exclude_appointment: Option<i64>,
    ) -> BookingResult<DaySnapshot> {
        Ok(self
            .state
            .lock()
            .await
            .snapshot(staff_id, date, exclude_appointment))
    }

    async fn appointment_with_id(&self, id: i64) -> BookingResult<Option<Appointment>> {
        Ok(self
            .state
            .lock()
            .await
            .appointments
            .get(&id)
            .filter(|appointment| appointment.deleted_at.is_none())
            .cloned())
    }

    async fn appointments_for_participant(
        &self,
        user_id: i64,
        role: ParticipantRole,
        filter: &AppointmentFilter,
    ) -> BookingResult<Vec<Appointment>> {
        let state = self.state.lock().await;
        let mut appointments: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|appointment| {
                let participant = match role {
                    ParticipantRole::Requester => appointment.requester_id,
                    ParticipantRole::Appointee => appointment.appointee_id,
                };
                participant == user_id && filter.matches(appointment)
            })
            .cloned()
            .collect();
        by_date_and_time(&mut appointments);

        Ok(appointments)
    }

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
        check: BookingCheck<'_>,
    ) -> BookingResult<Appointment> {
        let mut state = self.state.lock().await;
        check(&state.snapshot(
            appointment.appointee_id,
            appointment.appointment_date,
            None,
        ))?;

        let id = state.next_id();
        let created = Appointment {
            id,
            ..appointment.clone()
        };
        state.appointments.insert(id, created.clone());

        Ok(created)
    }

    async fn save_appointment(
        &self,
        appointment: &Appointment,
        expected: AppointmentStatus,
        check: Option<BookingCheck<'_>>,
    ) -> BookingResult<Appointment> {
        let mut state = self.state.lock().await;
        let stored_status = state
            .appointments
            .get(&appointment.id)
            .filter(|stored| stored.deleted_at.is_none())
            .map(|stored| stored.status)
            .ok_or(BookingError::NotFound("appointment"))?;
        if stored_status != expected {
            return Err(BookingError::InvalidTransition {
                from: stored_status,
                to: appointment.status,
            });
        }

        if let Some(check) = check {
            check(&state.snapshot(
                appointment.appointee_id,
                appointment.appointment_date,
                Some(appointment.id),
            ))?;
        }

        state
            .appointments
            .insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn soft_delete_appointment(&self, id: i64, at: Timestamp) -> BookingResult<bool> {
        let mut state = self.state.lock().await;
        match state.appointments.get_mut(&id) {
            Some(appointment) if appointment.deleted_at.is_none() => {
                appointment.deleted_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn accepted_ended_by(
        &self,
        date: CalendarDate,
        time: TimeOfDay,
    ) -> BookingResult<Vec<Appointment>> {
        let state = self.state.lock().await;
        let mut appointments: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|appointment| {
                appointment.status == AppointmentStatus::Accepted
                    && appointment.deleted_at.is_none()
                    && (appointment.appointment_date < date
                        || (appointment.appointment_date == date && appointment.end_time <= time))
            })
            .cloned()
            .collect();
        by_date_and_time(&mut appointments);

        Ok(appointments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::mock::{date, mock_appointment, mock_template, time, MONDAY, STAFF_ID};

    fn allow_all(_snapshot: &DaySnapshot) -> BookingResult<()> {
        Ok(())
    }

    #[tokio::test]
    async fn failed_checks_write_nothing() {
        let store = MemoryStore::new();
        let reject = |_snapshot: &DaySnapshot| -> BookingResult<()> {
            Err(BookingError::SlotUnavailable)
        };
        let result = store
            .insert_appointment(&mock_appointment(0, MONDAY, "10:00", "10:30"), &reject)
            .await;

        assert!(matches!(result, Err(BookingError::SlotUnavailable)));
        let snapshot = store.day_snapshot(STAFF_ID, date(MONDAY), None).await.unwrap();
        assert!(snapshot.appointments.is_empty());
    }

    #[tokio::test]
    async fn status_saves_compare_against_the_stored_status() {
        let store = MemoryStore::new();
        let created = store
            .insert_appointment(&mock_appointment(0, MONDAY, "10:00", "10:30"), &allow_all)
            .await
            .unwrap();

        let mut declined = created.clone();
        declined.status = AppointmentStatus::Declined;
        store
            .save_appointment(&declined, AppointmentStatus::Pending, None)
            .await
            .unwrap();

        let mut accepted = created.clone();
        accepted.status = AppointmentStatus::Accepted;
        let result = store
            .save_appointment(&accepted, AppointmentStatus::Pending, None)
            .await;
        assert!(matches!(
            result,
            Err(BookingError::InvalidTransition {
                from: AppointmentStatus::Declined,
                to: AppointmentStatus::Accepted,
            })
        ));
    }

    #[tokio::test]
    async fn snapshots_leave_out_dead_and_excluded_appointments() {
        let store = MemoryStore::new();
        store
            .insert_template(&mock_template(0, 1, "09:00", "12:00"), &|_siblings: &[_]| Ok(()))
            .await
            .unwrap();
        let kept = store
            .insert_appointment(&mock_appointment(0, MONDAY, "09:00", "09:30"), &allow_all)
            .await
            .unwrap();
        let excluded = store
            .insert_appointment(&mock_appointment(0, MONDAY, "10:00", "10:30"), &allow_all)
            .await
            .unwrap();
        let deleted = store
            .insert_appointment(&mock_appointment(0, MONDAY, "11:00", "11:30"), &allow_all)
            .await
            .unwrap();
        assert!(store
            .soft_delete_appointment(deleted.id, crate::util::current_time())
            .await
            .unwrap());

        let snapshot = store
            .day_snapshot(STAFF_ID, date(MONDAY), Some(excluded.id))
            .await
            .unwrap();
        assert_eq!(snapshot.templates.len(), 1);
        assert_eq!(snapshot.appointments, vec![kept]);
    }

    #[tokio::test]
    async fn elapsed_means_ended_by_the_given_time() {
        let store = MemoryStore::new();
        for (start, end) in [("09:00", "09:30"), ("09:30", "10:00"), ("10:00", "10:30")] {
            let mut appointment = mock_appointment(0, MONDAY, start, end);
            appointment.status = AppointmentStatus::Accepted;
            store.insert_appointment(&appointment, &allow_all).await.unwrap();
        }

        let elapsed = store
            .accepted_ended_by(date(MONDAY), time("10:00"))
            .await
            .unwrap();
        assert_eq!(elapsed.len(), 2);
    }
}
