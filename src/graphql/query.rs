use async_graphql::{Context, ErrorExtensions, Object, Result, ResultExt};

use crate::error::BookingError;
use crate::graphql::guards::{Caller, LoggedIn};
use crate::graphql::visible_appointment;
use crate::models::appointment::{Appointment, AppointmentFilter, ParticipantRole};
use crate::models::exception::{AvailabilityException, ExceptionFilter};
use crate::models::interval::TimeRange;
use crate::models::schedule::OpenInterval;
use crate::models::template::AvailabilityTemplate;
use crate::models::{CalendarDate, TimeOfDay};
use crate::scheduler::Scheduler;
use crate::util::local_now;

pub struct QueryRoot;

#[Object]
impl QueryRoot {
    /// A staff member's recurring weekly hours
    #[graphql(guard = "LoggedIn")]
    pub async fn templates(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        day_of_week: Option<i16>,
    ) -> Result<Vec<AvailabilityTemplate>> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        scheduler
            .templates
            .find_by_staff(staff_id, day_of_week)
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn exceptions(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        #[graphql(default)] filter: ExceptionFilter,
    ) -> Result<Vec<AvailabilityException>> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        scheduler
            .exceptions
            .get_by_staff(staff_id, &filter)
            .await
            .extend()
    }

    /// Exceptions from today through the next `daysAhead` days
    #[graphql(guard = "LoggedIn")]
    pub async fn upcoming_exceptions(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        #[graphql(default = 30)] days_ahead: u32,
    ) -> Result<Vec<AvailabilityException>> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let (today, _) = local_now();
        scheduler
            .exceptions
            .get_upcoming(staff_id, days_ahead, today)
            .await
            .extend()
    }

    /// The hours a staff member is open on the given date, after exceptions
    #[graphql(guard = "LoggedIn")]
    pub async fn availability(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        date: CalendarDate,
    ) -> Result<Vec<OpenInterval>> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        scheduler
            .validator
            .resolve_effective_availability(staff_id, date)
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn is_bookable(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        date: CalendarDate,
        start_time: TimeOfDay,
        end_time: TimeOfDay,
        exclude_appointment_id: Option<i64>,
    ) -> Result<bool> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        scheduler
            .validator
            .is_bookable(staff_id, date, start_time, end_time, exclude_appointment_id)
            .await
            .extend()
    }

    /// Free back-to-back slots of `slotMinutes` on the given date
    #[graphql(guard = "LoggedIn")]
    pub async fn available_slots(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        date: CalendarDate,
        #[graphql(default = 30)] slot_minutes: u32,
    ) -> Result<Vec<TimeRange>> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        scheduler
            .validator
            .available_slots(staff_id, date, slot_minutes)
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn appointment(&self, ctx: &Context<'_>, id: i64) -> Result<Appointment> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();

        visible_appointment(scheduler, caller, id).await
    }

    /// Appointments where the caller (or, for admins, `userId`) is on the
    /// given side, ordered by date and start time
    #[graphql(guard = "LoggedIn")]
    pub async fn appointments(
        &self,
        ctx: &Context<'_>,
        role: ParticipantRole,
        user_id: Option<i64>,
        #[graphql(default)] filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        let user_id = user_id.unwrap_or(caller.user_id);
        if user_id != caller.user_id && !caller.is_admin {
            return Err(BookingError::NotFoundOrUnauthorized("user").extend());
        }

        scheduler
            .appointments
            .list_by_participant(user_id, role, &filter)
            .await
            .extend()
    }
}
