use std::fmt;
use std::sync::Arc;

use async_graphql::{Enum, InputObject, MaybeUndefined, SimpleObject};

use crate::db::Store;
use crate::error::{BookingError, BookingResult};
use crate::models::interval::TimeRange;
use crate::models::{CalendarDate, TimeOfDay};

/// How an exception changes a staff member's hours for its date
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Enum, sqlx::Type)]
#[sqlx(type_name = "availability_exception_type", rename_all = "snake_case")]
pub enum ExceptionType {
    /// Closed for the whole day, or for the given window only
    Unavailable,
    /// The given window replaces the usual hours
    ModifiedHours,
    /// The given window is open on top of the usual hours
    ExtraHours,
}

impl ExceptionType {
    pub fn requires_window(self) -> bool {
        matches!(self, ExceptionType::ModifiedHours | ExceptionType::ExtraHours)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionType::Unavailable => "unavailable",
            ExceptionType::ModifiedHours => "modified_hours",
            ExceptionType::ExtraHours => "extra_hours",
        }
    }
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A one-off change to a staff member's hours on a single date
#[derive(SimpleObject, sqlx::FromRow, Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityException {
    /// The ID of the exception
    pub id: i64,
    /// The staff member whose hours change
    pub staff_id: i64,
    /// The date the change applies to
    pub exception_date: CalendarDate,
    /// What kind of change this is
    pub exception_type: ExceptionType,
    /// When the affected window starts
    pub start_time: Option<TimeOfDay>,
    /// When the affected window ends
    pub end_time: Option<TimeOfDay>,
    /// Why the hours changed
    pub reason: String,
}

impl AvailabilityException {
    pub fn window(&self) -> Option<TimeRange> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start < end => Some(TimeRange { start, end }),
            _ => None,
        }
    }

    fn validate(&self) -> BookingResult<()> {
        let window = TimeRange::from_optional(self.start_time, self.end_time)?;
        if self.exception_type.requires_window() && window.is_none() {
            return Err(BookingError::validation(format!(
                "A {} exception needs both a start and an end time",
                self.exception_type
            )));
        }

        Ok(())
    }
}

#[derive(InputObject, Clone, Debug)]
pub struct NewException {
    pub exception_date: CalendarDate,
    pub exception_type: ExceptionType,
    pub start_time: Option<TimeOfDay>,
    pub end_time: Option<TimeOfDay>,
    #[graphql(default)]
    pub reason: String,
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct ExceptionUpdate {
    pub exception_date: Option<CalendarDate>,
    pub exception_type: Option<ExceptionType>,
    pub start_time: MaybeUndefined<TimeOfDay>,
    pub end_time: MaybeUndefined<TimeOfDay>,
    pub reason: Option<String>,
}

#[derive(InputObject, Clone, Debug, Default)]
pub struct ExceptionFilter {
    /// Only exceptions on or after this date
    pub from: Option<CalendarDate>,
    /// Only exceptions on or before this date
    pub to: Option<CalendarDate>,
    pub exception_type: Option<ExceptionType>,
}

impl ExceptionFilter {
    pub fn matches(&self, exception: &AvailabilityException) -> bool {
        self.from.map(|from| from <= exception.exception_date).unwrap_or(true)
            && self.to.map(|to| exception.exception_date <= to).unwrap_or(true)
            && self
                .exception_type
                .map(|exception_type| exception_type == exception.exception_type)
                .unwrap_or(true)
    }
}

/// Owns the date-specific overrides to staff hours.
pub struct ExceptionStore {
    db: Arc<dyn Store>,
}

impl ExceptionStore {
    pub fn new(db: Arc<dyn Store>) -> Self {
        Self { db }
    }

    pub async fn create(
        &self,
        staff_id: i64,
        new_exception: NewException,
    ) -> BookingResult<AvailabilityException> {
        let exception = AvailabilityException {
            id: 0,
            staff_id,
            exception_date: new_exception.exception_date,
            exception_type: new_exception.exception_type,
            start_time: new_exception.start_time,
            end_time: new_exception.end_time,
            reason: new_exception.reason.trim().to_owned(),
        };
        exception.validate()?;

        let created = self.db.insert_exception(&exception).await?;
        tracing::info!(
            exception_id = created.id,
            staff_id,
            date = %created.exception_date,
            exception_type = %created.exception_type,
            "created availability exception"
        );

        Ok(created)
    }

    pub async fn with_id(&self, id: i64) -> BookingResult<AvailabilityException> {
        self.db
            .exception_with_id(id)
            .await?
            .ok_or(BookingError::NotFound("availability exception"))
    }

    pub async fn get_by_staff(
        &self,
        staff_id: i64,
        filter: &ExceptionFilter,
    ) -> BookingResult<Vec<AvailabilityException>> {
        if let (Some(from), Some(to)) = (filter.from, filter.to) {
            if from > to {
                return Err(BookingError::validation(format!(
                    "Date range starts ({}) after it ends ({})",
                    from, to
                )));
            }
        }

        self.db.exceptions_for_staff(staff_id, filter).await
    }

    /// Exceptions dated from `today` through `days_ahead` days later.
    pub async fn get_upcoming(
        &self,
        staff_id: i64,
        days_ahead: u32,
        today: CalendarDate,
    ) -> BookingResult<Vec<AvailabilityException>> {
        let until = today
            .checked_add_days(i64::from(days_ahead))
            .ok_or_else(|| BookingError::validation("Too many days ahead"))?;

        self.get_by_staff(
            staff_id,
            &ExceptionFilter {
                from: Some(today),
                to: Some(until),
                exception_type: None,
            },
        )
        .await
    }

    pub async fn update(
        &self,
        id: i64,
        staff_id: i64,
        update: ExceptionUpdate,
    ) -> BookingResult<AvailabilityException> {
        let mut exception = self.owned(id, staff_id).await?;
        if let Some(exception_date) = update.exception_date {
            exception.exception_date = exception_date;
        }
        if let Some(exception_type) = update.exception_type {
            exception.exception_type = exception_type;
        }
        match update.start_time {
            MaybeUndefined::Undefined => {}
            MaybeUndefined::Null => exception.start_time = None,
            MaybeUndefined::Value(start_time) => exception.start_time = Some(start_time),
        }
        match update.end_time {
            MaybeUndefined::Undefined => {}
            MaybeUndefined::Null => exception.end_time = None,
            MaybeUndefined::Value(end_time) => exception.end_time = Some(end_time),
        }
        if let Some(reason) = update.reason {
            exception.reason = reason.trim().to_owned();
        }
        exception.validate()?;

        let updated = self.db.save_exception(&exception).await?;
        tracing::info!(exception_id = id, staff_id, "updated availability exception");

        Ok(updated)
    }

    pub async fn delete(&self, id: i64, staff_id: i64) -> BookingResult<()> {
        self.owned(id, staff_id).await?;
        if !self.db.delete_exception(id).await? {
            return Err(BookingError::NotFoundOrUnauthorized("availability exception"));
        }

        tracing::info!(exception_id = id, staff_id, "deleted availability exception");
        Ok(())
    }

    async fn owned(&self, id: i64, staff_id: i64) -> BookingResult<AvailabilityException> {
        self.db
            .exception_with_id(id)
            .await?
            .filter(|exception| exception.staff_id == staff_id)
            .ok_or(BookingError::NotFoundOrUnauthorized("availability exception"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::tests::mock::{date, time};

    fn store() -> ExceptionStore {
        ExceptionStore::new(Arc::new(MemoryStore::new()))
    }

    fn new_exception(
        on: &str,
        exception_type: ExceptionType,
        window: Option<(&str, &str)>,
    ) -> NewException {
        NewException {
            exception_date: date(on),
            exception_type,
            start_time: window.map(|(start, _)| time(start)),
            end_time: window.map(|(_, end)| time(end)),
            reason: "conference".to_owned(),
        }
    }

    #[tokio::test]
    async fn hour_changes_need_a_window() {
        let exceptions = store();

        let modified = exceptions
            .create(7, new_exception("2024-01-01", ExceptionType::ModifiedHours, None))
            .await;
        let extra = exceptions
            .create(7, new_exception("2024-01-01", ExceptionType::ExtraHours, None))
            .await;
        let closed = exceptions
            .create(7, new_exception("2024-01-01", ExceptionType::Unavailable, None))
            .await;

        assert!(matches!(modified, Err(BookingError::Validation(_))));
        assert!(matches!(extra, Err(BookingError::Validation(_))));
        assert!(closed.is_ok());
    }

    #[tokio::test]
    async fn windows_must_be_ordered_and_complete() {
        let exceptions = store();
        let mut half_window = new_exception("2024-01-01", ExceptionType::Unavailable, None);
        half_window.start_time = Some(time("10:00"));

        let backwards = exceptions
            .create(
                7,
                new_exception(
                    "2024-01-01",
                    ExceptionType::ExtraHours,
                    Some(("19:00", "17:00")),
                ),
            )
            .await;

        assert!(backwards.is_err());
        assert!(exceptions.create(7, half_window).await.is_err());
    }

    #[tokio::test]
    async fn upcoming_covers_today_through_the_horizon() {
        let exceptions = store();
        for on in ["2023-12-31", "2024-01-01", "2024-01-08", "2024-01-09"] {
            exceptions
                .create(7, new_exception(on, ExceptionType::Unavailable, None))
                .await
                .unwrap();
        }

        let upcoming = exceptions
            .get_upcoming(7, 7, date("2024-01-01"))
            .await
            .unwrap();

        let dates: Vec<String> = upcoming
            .iter()
            .map(|exception| exception.exception_date.to_string())
            .collect();
        assert_eq!(dates, vec!["2024-01-01", "2024-01-08"]);
    }

    #[tokio::test]
    async fn get_by_staff_filters_by_type() {
        let exceptions = store();
        exceptions
            .create(7, new_exception("2024-01-01", ExceptionType::Unavailable, None))
            .await
            .unwrap();
        exceptions
            .create(
                7,
                new_exception("2024-01-02", ExceptionType::ExtraHours, Some(("17:00", "19:00"))),
            )
            .await
            .unwrap();

        let extra = exceptions
            .get_by_staff(
                7,
                &ExceptionFilter {
                    exception_type: Some(ExceptionType::ExtraHours),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(extra.len(), 1);
        assert_eq!(extra[0].exception_date, date("2024-01-02"));
    }

    #[tokio::test]
    async fn only_the_owner_can_change_an_exception() {
        let exceptions = store();
        let created = exceptions
            .create(7, new_exception("2024-01-01", ExceptionType::Unavailable, None))
            .await
            .unwrap();

        let stranger = exceptions
            .update(created.id, 8, ExceptionUpdate::default())
            .await;
        assert!(matches!(stranger, Err(BookingError::NotFoundOrUnauthorized(_))));

        let updated = exceptions
            .update(
                created.id,
                7,
                ExceptionUpdate {
                    exception_type: Some(ExceptionType::ModifiedHours),
                    start_time: MaybeUndefined::Value(time("10:00")),
                    end_time: MaybeUndefined::Value(time("12:00")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.window().map(|window| window.minutes()), Some(120));

        assert!(exceptions.delete(created.id, 8).await.is_err());
        exceptions.delete(created.id, 7).await.unwrap();
        assert!(matches!(
            exceptions.delete(created.id, 7).await,
            Err(BookingError::NotFoundOrUnauthorized(_))
        ));
    }
}
