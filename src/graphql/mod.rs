use async_graphql::{EmptySubscription, ErrorExtensions, Result, Schema};

use crate::error::BookingError;
use crate::graphql::guards::Caller;
use crate::graphql::mutation::MutationRoot;
use crate::graphql::query::QueryRoot;
use crate::models::appointment::Appointment;
use crate::scheduler::Scheduler;

pub mod guards;
pub mod mutation;
pub mod query;

pub const SUCCESS_MESSAGE: &str = "success";

pub type OfficeHoursSchema = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(scheduler: Scheduler) -> OfficeHoursSchema {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(scheduler)
        .finish()
}

/// The appointment, if the caller is one of its participants or an admin.
///
/// Appointments the caller can't see are reported the same way as ones that
/// don't exist.
pub(crate) async fn visible_appointment(
    scheduler: &Scheduler,
    caller: &Caller,
    id: i64,
) -> Result<Appointment> {
    match scheduler.appointments.with_id(id).await {
        Ok(appointment) if caller.is_admin || appointment.involves(caller.user_id) => {
            Ok(appointment)
        }
        Ok(_) | Err(BookingError::NotFound(_)) => {
            Err(BookingError::NotFoundOrUnauthorized("appointment").extend())
        }
        Err(err) => Err(err.extend()),
    }
}
