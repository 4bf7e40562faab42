use std::fmt;
use std::sync::Arc;

use async_graphql::{ComplexObject, Enum, InputObject, SimpleObject};

use crate::db::{BookingCheck, DaySnapshot, Store};
use crate::error::{BookingError, BookingResult};
use crate::models::interval::TimeRange;
use crate::models::schedule::{ensure_slot_is_free, ConflictValidator};
use crate::models::{CalendarDate, TimeOfDay, Timestamp};
use crate::util::current_time;

/// Where an appointment is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Enum, sqlx::Type)]
#[sqlx(type_name = "appointment_status", rename_all = "snake_case")]
pub enum AppointmentStatus {
    /// Requested, waiting on the staff member
    Pending,
    /// The staff member agreed to meet
    Accepted,
    /// The staff member turned the request down
    Declined,
    /// The meeting happened
    Completed,
    /// One of the participants called it off
    Cancelled,
    /// The staff member proposed a different time
    Rescheduled,
}

impl AppointmentStatus {
    /// The only place that decides which status changes are legal.
    pub fn allowed_transitions(self) -> &'static [AppointmentStatus] {
        use AppointmentStatus::*;

        match self {
            Pending => &[Accepted, Declined, Rescheduled, Cancelled],
            Rescheduled => &[Accepted, Declined],
            Accepted => &[Completed, Cancelled],
            Declined | Completed | Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        self.allowed_transitions().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_transitions().is_empty()
    }

    /// Whether an appointment in this state keeps its time blocked.
    pub fn holds_slot(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Pending
                | AppointmentStatus::Accepted
                | AppointmentStatus::Rescheduled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Accepted => "accepted",
            AppointmentStatus::Declined => "declined",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Rescheduled => "rescheduled",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which side of an appointment a user is on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum)]
pub enum ParticipantRole {
    /// The user who asked for the meeting
    Requester,
    /// The staff member being met
    Appointee,
}

/// A meeting between a requester and a staff member
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug, PartialEq, Eq)]
#[graphql(complex)]
pub struct Appointment {
    /// The ID of the appointment
    pub id: i64,
    /// The user who asked for the meeting
    pub requester_id: i64,
    /// The staff member being met
    pub appointee_id: i64,
    /// The day of the meeting
    pub appointment_date: CalendarDate,
    /// When the meeting starts
    pub start_time: TimeOfDay,
    /// When the meeting ends
    pub end_time: TimeOfDay,
    /// Where the appointment is in its lifecycle
    pub status: AppointmentStatus,
    /// What the requester wants to talk about
    pub reason: String,
    /// Where the meeting takes place
    pub location: Option<String>,
    /// When the request was made
    pub requested_at: Timestamp,
    /// When the staff member answered
    pub responded_at: Option<Timestamp>,
    /// When the meeting was marked as done
    pub completed_at: Option<Timestamp>,
    /// When the meeting was called off
    pub cancelled_at: Option<Timestamp>,
    /// Why the meeting was called off
    pub cancellation_reason: Option<String>,
    /// Who called the meeting off
    pub cancelled_by: Option<i64>,

    #[graphql(skip)]
    pub deleted_at: Option<Timestamp>,
}

#[ComplexObject]
impl Appointment {
    /// The date and start time together, as `YYYY-MM-DDTHH:MM:SS`
    async fn appointment_time(&self) -> String {
        format!("{}T{}", self.appointment_date, self.start_time)
    }
}

impl Appointment {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn involves(&self, user_id: i64) -> bool {
        self.requester_id == user_id || self.appointee_id == user_id
    }
}

#[derive(InputObject, Clone, Debug)]
pub struct NewAppointment {
    pub appointee_id: i64,
    pub appointment_date: CalendarDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub reason: String,
    pub location: Option<String>,
}

/// Extra details that go along with a status change
#[derive(InputObject, Clone, Debug, Default)]
pub struct TransitionMeta {
    /// Move the appointment to this date
    pub new_date: Option<CalendarDate>,
    /// Move the appointment to start at this time
    pub new_start_time: Option<TimeOfDay>,
    /// Move the appointment to end at this time
    pub new_end_time: Option<TimeOfDay>,
    pub cancellation_reason: Option<String>,
    #[graphql(skip)]
    pub cancelled_by: Option<i64>,
}

impl TransitionMeta {
    fn moves(&self) -> bool {
        self.new_date.is_some() || self.new_start_time.is_some() || self.new_end_time.is_some()
    }
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct AppointmentFilter {
    pub status: Option<AppointmentStatus>,
    /// Only appointments on or after this date
    pub from: Option<CalendarDate>,
    /// Only appointments on or before this date
    pub to: Option<CalendarDate>,
    #[graphql(default)]
    pub include_deleted: bool,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        (self.include_deleted || appointment.deleted_at.is_none())
            && self.status.map(|status| status == appointment.status).unwrap_or(true)
            && self.from.map(|from| from <= appointment.appointment_date).unwrap_or(true)
            && self.to.map(|to| appointment.appointment_date <= to).unwrap_or(true)
    }
}

/// Creates appointments and walks them through their lifecycle.
pub struct AppointmentManager {
    db: Arc<dyn Store>,
    validator: ConflictValidator,
}

impl AppointmentManager {
    pub fn new(db: Arc<dyn Store>) -> Self {
        Self {
            validator: ConflictValidator::new(db.clone()),
            db,
        }
    }

    /// Books a new pending appointment.
    ///
    /// The slot is checked once up front and again under the store's lock
    /// for the staff member's day, so two racing requests can't both win.
    pub async fn create(
        &self,
        requester_id: i64,
        new_appointment: NewAppointment,
    ) -> BookingResult<Appointment> {
        let reason = new_appointment.reason.trim();
        if reason.is_empty() {
            return Err(BookingError::validation("A reason for the appointment is required"));
        }
        let range = TimeRange::new(new_appointment.start_time, new_appointment.end_time)?;
        let date = new_appointment.appointment_date;
        let appointee_id = new_appointment.appointee_id;

        if !self
            .validator
            .is_bookable(appointee_id, date, range.start, range.end, None)
            .await?
        {
            return Err(BookingError::SlotUnavailable);
        }

        let appointment = Appointment {
            id: 0,
            requester_id,
            appointee_id,
            appointment_date: date,
            start_time: range.start,
            end_time: range.end,
            status: AppointmentStatus::Pending,
            reason: reason.to_owned(),
            location: new_appointment
                .location
                .map(|location| location.trim().to_owned())
                .filter(|location| !location.is_empty()),
            requested_at: current_time(),
            responded_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            cancelled_by: None,
            deleted_at: None,
        };

        let check: BookingCheck<'_> =
            &move |snapshot: &DaySnapshot| ensure_slot_is_free(snapshot, date, &range, None);
        let created = self
            .db
            .insert_appointment(&appointment, check)
            .await
            .map_err(|err| {
                if matches!(err, BookingError::SlotUnavailable) {
                    tracing::warn!(appointee_id, %date, "lost a race for an appointment slot");
                }
                err
            })?;

        tracing::info!(
            appointment_id = created.id,
            requester_id,
            appointee_id,
            %date,
            "created appointment"
        );
        Ok(created)
    }

    pub async fn with_id(&self, id: i64) -> BookingResult<Appointment> {
        self.db
            .appointment_with_id(id)
            .await?
            .ok_or(BookingError::NotFound("appointment"))
    }

    /// Moves an appointment to `new_status`, stamping the matching time.
    ///
    /// Accepting or rescheduling may also move the appointment; the new time
    /// must be bookable on its own, ignoring the appointment's current slot.
    pub async fn update_status(
        &self,
        id: i64,
        new_status: AppointmentStatus,
        meta: TransitionMeta,
    ) -> BookingResult<Appointment> {
        let current = self.with_id(id).await?;
        if !current.status.can_transition_to(new_status) {
            return Err(BookingError::InvalidTransition {
                from: current.status,
                to: new_status,
            });
        }

        let moves = meta.moves();
        if moves
            && !matches!(
                new_status,
                AppointmentStatus::Accepted | AppointmentStatus::Rescheduled
            )
        {
            return Err(BookingError::validation(format!(
                "An appointment can't be moved while it is being {}",
                new_status
            )));
        }
        if new_status == AppointmentStatus::Rescheduled && !moves {
            return Err(BookingError::validation(
                "Rescheduling needs a new date or time",
            ));
        }

        let now = current_time();
        let mut updated = current.clone();
        updated.status = new_status;
        match new_status {
            AppointmentStatus::Accepted
            | AppointmentStatus::Declined
            | AppointmentStatus::Rescheduled => updated.responded_at = Some(now),
            AppointmentStatus::Completed => updated.completed_at = Some(now),
            AppointmentStatus::Cancelled => {
                updated.cancelled_at = Some(now);
                updated.cancelled_by = meta.cancelled_by;
                updated.cancellation_reason = meta
                    .cancellation_reason
                    .as_deref()
                    .map(str::trim)
                    .filter(|reason| !reason.is_empty())
                    .map(str::to_owned);
            }
            AppointmentStatus::Pending => {}
        }

        let saved = if moves {
            updated.appointment_date = meta.new_date.unwrap_or(current.appointment_date);
            updated.start_time = meta.new_start_time.unwrap_or(current.start_time);
            updated.end_time = meta.new_end_time.unwrap_or(current.end_time);
            let range = TimeRange::new(updated.start_time, updated.end_time)?;
            let date = updated.appointment_date;

            if !self
                .validator
                .is_bookable(current.appointee_id, date, range.start, range.end, Some(id))
                .await?
            {
                return Err(BookingError::SlotUnavailable);
            }

            let check: BookingCheck<'_> = &move |snapshot: &DaySnapshot| {
                ensure_slot_is_free(snapshot, date, &range, Some(id))
            };
            self.db
                .save_appointment(&updated, current.status, Some(check))
                .await?
        } else {
            self.db
                .save_appointment(&updated, current.status, None)
                .await?
        };

        tracing::info!(
            appointment_id = id,
            from = %current.status,
            to = %new_status,
            "appointment status changed"
        );
        Ok(saved)
    }

    pub async fn cancel(
        &self,
        id: i64,
        cancelled_by: i64,
        reason: Option<String>,
    ) -> BookingResult<Appointment> {
        self.update_status(
            id,
            AppointmentStatus::Cancelled,
            TransitionMeta {
                cancellation_reason: reason,
                cancelled_by: Some(cancelled_by),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn list_by_participant(
        &self,
        user_id: i64,
        role: ParticipantRole,
        filter: &AppointmentFilter,
    ) -> BookingResult<Vec<Appointment>> {
        self.db
            .appointments_for_participant(user_id, role, filter)
            .await
    }

    /// Hides an appointment from every read and frees its slot.
    pub async fn delete(&self, id: i64, user_id: i64) -> BookingResult<()> {
        let appointment = self
            .db
            .appointment_with_id(id)
            .await?
            .filter(|appointment| appointment.involves(user_id))
            .ok_or(BookingError::NotFoundOrUnauthorized("appointment"))?;

        if !self
            .db
            .soft_delete_appointment(appointment.id, current_time())
            .await?
        {
            return Err(BookingError::NotFoundOrUnauthorized("appointment"));
        }

        tracing::info!(appointment_id = id, user_id, "deleted appointment");
        Ok(())
    }

    /// Marks every accepted appointment that ended by `date` at `time` as
    /// completed, returning the ones that changed.
    pub async fn complete_elapsed(
        &self,
        date: CalendarDate,
        time: TimeOfDay,
    ) -> BookingResult<Vec<Appointment>> {
        let elapsed = self.db.accepted_ended_by(date, time).await?;
        let mut completed = Vec::with_capacity(elapsed.len());

        for appointment in elapsed {
            match self
                .update_status(
                    appointment.id,
                    AppointmentStatus::Completed,
                    TransitionMeta::default(),
                )
                .await
            {
                Ok(appointment) => completed.push(appointment),
                Err(BookingError::InvalidTransition { from, .. }) => {
                    tracing::warn!(
                        appointment_id = appointment.id,
                        status = %from,
                        "appointment changed before it could be completed"
                    );
                }
                Err(BookingError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        Ok(completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_go_nowhere() {
        for status in [
            AppointmentStatus::Declined,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
            assert!(!status.holds_slot());
        }
    }

    #[test]
    fn live_states_hold_their_slot() {
        for status in [
            AppointmentStatus::Pending,
            AppointmentStatus::Accepted,
            AppointmentStatus::Rescheduled,
        ] {
            assert!(!status.is_terminal());
            assert!(status.holds_slot());
        }
    }

    #[test]
    fn transition_table() {
        use AppointmentStatus::*;

        assert!(Pending.can_transition_to(Accepted));
        assert!(Pending.can_transition_to(Declined));
        assert!(Pending.can_transition_to(Rescheduled));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));

        assert!(Accepted.can_transition_to(Completed));
        assert!(Accepted.can_transition_to(Cancelled));
        assert!(!Accepted.can_transition_to(Declined));

        assert!(Rescheduled.can_transition_to(Accepted));
        assert!(!Rescheduled.can_transition_to(Cancelled));

        assert!(!Completed.can_transition_to(Pending));
        assert!(!Declined.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
    }
}
