use async_graphql::{Context, ErrorExtensions, Object, Result, ResultExt};

use crate::error::BookingError;
use crate::graphql::guards::{Caller, LoggedIn};
use crate::graphql::{visible_appointment, SUCCESS_MESSAGE};
use crate::models::appointment::{
    Appointment, AppointmentStatus, NewAppointment, TransitionMeta,
};
use crate::models::exception::{AvailabilityException, ExceptionUpdate, NewException};
use crate::models::template::{AvailabilityTemplate, NewTemplate, TemplateUpdate};
use crate::scheduler::Scheduler;

pub struct MutationRoot;

#[Object]
impl MutationRoot {
    /// Adds recurring weekly hours for a staff member
    #[graphql(guard = "LoggedIn")]
    pub async fn create_template(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        template: NewTemplate,
    ) -> Result<AvailabilityTemplate> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        caller.ensure_manages(staff_id, "staff member")?;

        scheduler.templates.create(staff_id, template).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn update_template(
        &self,
        ctx: &Context<'_>,
        id: i64,
        update: TemplateUpdate,
    ) -> Result<AvailabilityTemplate> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        let staff_id = template_owner(scheduler, caller, id).await?;

        scheduler.templates.update(id, staff_id, update).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn delete_template(&self, ctx: &Context<'_>, id: i64) -> Result<&'static str> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        let staff_id = template_owner(scheduler, caller, id).await?;
        scheduler.templates.delete(id, staff_id).await.extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// Marks a single date as off, or as having different hours
    #[graphql(guard = "LoggedIn")]
    pub async fn create_exception(
        &self,
        ctx: &Context<'_>,
        staff_id: i64,
        exception: NewException,
    ) -> Result<AvailabilityException> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        caller.ensure_manages(staff_id, "staff member")?;

        scheduler.exceptions.create(staff_id, exception).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn update_exception(
        &self,
        ctx: &Context<'_>,
        id: i64,
        update: ExceptionUpdate,
    ) -> Result<AvailabilityException> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        let staff_id = exception_owner(scheduler, caller, id).await?;

        scheduler.exceptions.update(id, staff_id, update).await.extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn delete_exception(&self, ctx: &Context<'_>, id: i64) -> Result<&'static str> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        let staff_id = exception_owner(scheduler, caller, id).await?;
        scheduler.exceptions.delete(id, staff_id).await.extend()?;

        Ok(SUCCESS_MESSAGE)
    }

    /// Requests a meeting with a staff member on behalf of the caller
    #[graphql(guard = "LoggedIn")]
    pub async fn create_appointment(
        &self,
        ctx: &Context<'_>,
        appointment: NewAppointment,
    ) -> Result<Appointment> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();

        scheduler
            .appointments
            .create(caller.user_id, appointment)
            .await
            .extend()
    }

    /// Moves an appointment through its lifecycle
    ///
    /// The staff member answers requests and marks them completed; the
    /// requester answers a proposed new time.
    #[graphql(guard = "LoggedIn")]
    pub async fn transition_appointment(
        &self,
        ctx: &Context<'_>,
        id: i64,
        status: AppointmentStatus,
        #[graphql(default)] meta: TransitionMeta,
    ) -> Result<Appointment> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        let current = visible_appointment(scheduler, caller, id).await?;

        if status == AppointmentStatus::Cancelled {
            return scheduler
                .appointments
                .cancel(id, caller.user_id, meta.cancellation_reason)
                .await
                .extend();
        }

        let may_answer = caller.is_admin
            || current.appointee_id == caller.user_id
            || (current.status == AppointmentStatus::Rescheduled
                && current.requester_id == caller.user_id);
        if !may_answer {
            return Err(BookingError::NotFoundOrUnauthorized("appointment").extend());
        }

        scheduler
            .appointments
            .update_status(
                id,
                status,
                TransitionMeta {
                    cancelled_by: None,
                    ..meta
                },
            )
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn cancel_appointment(
        &self,
        ctx: &Context<'_>,
        id: i64,
        reason: Option<String>,
    ) -> Result<Appointment> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        visible_appointment(scheduler, caller, id).await?;

        scheduler
            .appointments
            .cancel(id, caller.user_id, reason)
            .await
            .extend()
    }

    #[graphql(guard = "LoggedIn")]
    pub async fn delete_appointment(&self, ctx: &Context<'_>, id: i64) -> Result<&'static str> {
        let scheduler: &Scheduler = ctx.data_unchecked();
        let caller = ctx.data_unchecked::<Caller>();
        scheduler
            .appointments
            .delete(id, caller.user_id)
            .await
            .extend()?;

        Ok(SUCCESS_MESSAGE)
    }
}

async fn template_owner(scheduler: &Scheduler, caller: &Caller, id: i64) -> Result<i64> {
    match scheduler.templates.with_id(id).await {
        Ok(template) if caller.can_manage(template.staff_id) => Ok(template.staff_id),
        Ok(_) | Err(BookingError::NotFound(_)) => {
            Err(BookingError::NotFoundOrUnauthorized("availability template").extend())
        }
        Err(err) => Err(err.extend()),
    }
}

async fn exception_owner(scheduler: &Scheduler, caller: &Caller, id: i64) -> Result<i64> {
    match scheduler.exceptions.with_id(id).await {
        Ok(exception) if caller.can_manage(exception.staff_id) => Ok(exception.staff_id),
        Ok(_) | Err(BookingError::NotFound(_)) => {
            Err(BookingError::NotFoundOrUnauthorized("availability exception").extend())
        }
        Err(err) => Err(err.extend()),
    }
}
