use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;

use crate::db::{booking_lock_key, BookingCheck, DaySnapshot, Store, TemplateCheck, TemplateGroup};
use crate::error::{BookingError, BookingResult};
use crate::models::appointment::{
    Appointment, AppointmentFilter, AppointmentStatus, ParticipantRole,
};
use crate::models::exception::{AvailabilityException, ExceptionFilter};
use crate::models::template::AvailabilityTemplate;
use crate::models::{CalendarDate, TimeOfDay, Timestamp};

/// A [`Store`] backed by Postgres.
///
/// Check-then-write operations run in one transaction that first takes a
/// transaction-scoped advisory lock on the template group or the appointee's
/// day, so concurrent writers for the same key queue up behind each other.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database and brings its schema up to date.
    pub async fn connect(url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        sqlx::migrate!().run(&pool).await?;

        Ok(Self { pool })
    }
}

async fn advisory_lock(conn: &mut PgConnection, key: &str) -> BookingResult<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(key)
        .execute(conn)
        .await?;

    Ok(())
}

async fn group_members(
    conn: &mut PgConnection,
    group: TemplateGroup,
    exclude: Option<i64>,
) -> BookingResult<Vec<AvailabilityTemplate>> {
    sqlx::query_as::<_, AvailabilityTemplate>(
        "SELECT * FROM availability_template
         WHERE staff_id = $1 AND day_of_week = $2
           AND week_of_month IS NOT DISTINCT FROM $3
           AND ($4::bigint IS NULL OR id <> $4)
         ORDER BY start_time, id",
    )
    .bind(group.staff_id)
    .bind(group.day_of_week)
    .bind(group.week_of_month)
    .bind(exclude)
    .fetch_all(conn)
    .await
    .map_err(Into::into)
}

async fn snapshot(
    conn: &mut PgConnection,
    staff_id: i64,
    date: CalendarDate,
    exclude_appointment: Option<i64>,
) -> BookingResult<DaySnapshot> {
    let templates = sqlx::query_as::<_, AvailabilityTemplate>(
        "SELECT * FROM availability_template
         WHERE staff_id = $1 AND day_of_week = $2 AND is_active
         ORDER BY start_time, id",
    )
    .bind(staff_id)
    .bind(date.day_of_week())
    .fetch_all(&mut *conn)
    .await?;

    let exceptions = sqlx::query_as::<_, AvailabilityException>(
        "SELECT * FROM availability_exception
         WHERE staff_id = $1 AND exception_date = $2
         ORDER BY start_time NULLS FIRST, id",
    )
    .bind(staff_id)
    .bind(date)
    .fetch_all(&mut *conn)
    .await?;

    let appointments = sqlx::query_as::<_, Appointment>(
        "SELECT * FROM appointment
         WHERE appointee_id = $1 AND appointment_date = $2
           AND deleted_at IS NULL
           AND status IN ('pending', 'accepted', 'rescheduled')
           AND ($3::bigint IS NULL OR id <> $3)
         ORDER BY start_time, id",
    )
    .bind(staff_id)
    .bind(date)
    .bind(exclude_appointment)
    .fetch_all(&mut *conn)
    .await?;

    Ok(DaySnapshot {
        templates,
        exceptions,
        appointments,
    })
}

#[async_trait]
impl Store for PgStore {
    async fn templates_for_staff(
        &self,
        staff_id: i64,
        day_of_week: Option<i16>,
    ) -> BookingResult<Vec<AvailabilityTemplate>> {
        sqlx::query_as::<_, AvailabilityTemplate>(
            "SELECT * FROM availability_template
             WHERE staff_id = $1 AND ($2::smallint IS NULL OR day_of_week = $2)
             ORDER BY day_of_week, start_time, id",
        )
        .bind(staff_id)
        .bind(day_of_week)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn templates_in_group(
        &self,
        group: TemplateGroup,
    ) -> BookingResult<Vec<AvailabilityTemplate>> {
        let mut conn = self.pool.acquire().await?;
        group_members(&mut conn, group, None).await
    }

    async fn template_with_id(&self, id: i64) -> BookingResult<Option<AvailabilityTemplate>> {
        sqlx::query_as::<_, AvailabilityTemplate>(
            "SELECT * FROM availability_template WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn insert_template(
        &self,
        template: &AvailabilityTemplate,
        check: TemplateCheck<'_>,
    ) -> BookingResult<AvailabilityTemplate> {
        let group = template.group();
        let mut tx = self.pool.begin().await?;
        advisory_lock(&mut tx, &group.lock_key()).await?;
        check(&group_members(&mut tx, group, None).await?)?;

        let created = sqlx::query_as::<_, AvailabilityTemplate>(
            "INSERT INTO availability_template
                (staff_id, day_of_week, week_of_month, start_time, end_time,
                 max_regular_capacity, max_emergency_capacity, allow_emergency,
                 is_active, valid_from, valid_to)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING *",
        )
        .bind(template.staff_id)
        .bind(template.day_of_week)
        .bind(template.week_of_month)
        .bind(template.start_time)
        .bind(template.end_time)
        .bind(template.max_regular_capacity)
        .bind(template.max_emergency_capacity)
        .bind(template.allow_emergency)
        .bind(template.is_active)
        .bind(template.valid_from)
        .bind(template.valid_to)
        .fetch_one(&mut tx)
        .await?;
        tx.commit().await?;

        Ok(created)
    }

    async fn save_template(
        &self,
        template: &AvailabilityTemplate,
        check: TemplateCheck<'_>,
    ) -> BookingResult<AvailabilityTemplate> {
        let group = template.group();
        let mut tx = self.pool.begin().await?;
        advisory_lock(&mut tx, &group.lock_key()).await?;
        check(&group_members(&mut tx, group, Some(template.id)).await?)?;

        let saved = sqlx::query_as::<_, AvailabilityTemplate>(
            "UPDATE availability_template SET
                day_of_week = $2, week_of_month = $3, start_time = $4, end_time = $5,
                max_regular_capacity = $6, max_emergency_capacity = $7,
                allow_emergency = $8, is_active = $9, valid_from = $10, valid_to = $11,
                updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(template.id)
        .bind(template.day_of_week)
        .bind(template.week_of_month)
        .bind(template.start_time)
        .bind(template.end_time)
        .bind(template.max_regular_capacity)
        .bind(template.max_emergency_capacity)
        .bind(template.allow_emergency)
        .bind(template.is_active)
        .bind(template.valid_from)
        .bind(template.valid_to)
        .fetch_optional(&mut tx)
        .await?
        .ok_or(BookingError::NotFound("availability template"))?;
        tx.commit().await?;

        Ok(saved)
    }

    async fn delete_template(&self, id: i64) -> BookingResult<bool> {
        let result = sqlx::query("DELETE FROM availability_template WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn exceptions_for_staff(
        &self,
        staff_id: i64,
        filter: &ExceptionFilter,
    ) -> BookingResult<Vec<AvailabilityException>> {
        sqlx::query_as::<_, AvailabilityException>(
            "SELECT * FROM availability_exception
             WHERE staff_id = $1
               AND ($2::date IS NULL OR exception_date >= $2)
               AND ($3::date IS NULL OR exception_date <= $3)
               AND ($4::availability_exception_type IS NULL OR exception_type = $4)
             ORDER BY exception_date, start_time NULLS FIRST, id",
        )
        .bind(staff_id)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.exception_type)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn exception_with_id(&self, id: i64) -> BookingResult<Option<AvailabilityException>> {
        sqlx::query_as::<_, AvailabilityException>(
            "SELECT * FROM availability_exception WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn insert_exception(
        &self,
        exception: &AvailabilityException,
    ) -> BookingResult<AvailabilityException> {
        sqlx::query_as::<_, AvailabilityException>(
            "INSERT INTO availability_exception
                (staff_id, exception_date, exception_type, start_time, end_time, reason)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(exception.staff_id)
        .bind(exception.exception_date)
        .bind(exception.exception_type)
        .bind(exception.start_time)
        .bind(exception.end_time)
        .bind(&exception.reason)
        .fetch_one(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn save_exception(
        &self,
        exception: &AvailabilityException,
    ) -> BookingResult<AvailabilityException> {
        sqlx::query_as::<_, AvailabilityException>(
            "UPDATE availability_exception SET
                exception_date = $2, exception_type = $3, start_time = $4,
                end_time = $5, reason = $6, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(exception.id)
        .bind(exception.exception_date)
        .bind(exception.exception_type)
        .bind(exception.start_time)
        .bind(exception.end_time)
        .bind(&exception.reason)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(BookingError::NotFound("availability exception"))
    }

    async fn delete_exception(&self, id: i64) -> BookingResult<bool> {
        let result = sqlx::query("DELETE FROM availability_exception WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn day_snapshot(
        &self,
        staff_id: i64,
        date: CalendarDate,
        exclude_appointment: Option<i64>,
    ) -> BookingResult<DaySnapshot> {
        let mut conn = self.pool.acquire().await?;
        snapshot(&mut conn, staff_id, date, exclude_appointment).await
    }

    async fn appointment_with_id(&self, id: i64) -> BookingResult<Option<Appointment>> {
        sqlx::query_as::<_, Appointment>(
            "SELECT * FROM appointment WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Into::into)
    }

    async fn appointments_for_participant(
        &self,
        user_id: i64,
        role: ParticipantRole,
        filter: &AppointmentFilter,
    ) -> BookingResult<Vec<Appointment>> {
        let column = match role {
            ParticipantRole::Requester => "requester_id",
            ParticipantRole::Appointee => "appointee_id",
        };
        let query = format!(
            "SELECT * FROM appointment
             WHERE {} = $1
               AND ($2::appointment_status IS NULL OR status = $2)
               AND ($3::date IS NULL OR appointment_date >= $3)
               AND ($4::date IS NULL OR appointment_date <= $4)
               AND ($5 OR deleted_at IS NULL)
             ORDER BY appointment_date, start_time, id",
            column
        );

        sqlx::query_as::<_, Appointment>(&query)
            .bind(user_id)
            .bind(filter.status)
            .bind(filter.from)
            .bind(filter.to)
            .bind(filter.include_deleted)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    async fn insert_appointment(
        &self,
        appointment: &Appointment,
        check: BookingCheck<'_>,
    ) -> BookingResult<Appointment> {
        let mut tx = self.pool.begin().await?;
        advisory_lock(
            &mut tx,
            &booking_lock_key(appointment.appointee_id, appointment.appointment_date),
        )
        .await?;
        check(
            &snapshot(
                &mut tx,
                appointment.appointee_id,
                appointment.appointment_date,
                None,
            )
            .await?,
        )?;

        let created = sqlx::query_as::<_, Appointment>(
            "INSERT INTO appointment
                (requester_id, appointee_id, appointment_date, start_time, end_time,
                 status, reason, location, requested_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
        .bind(appointment.requester_id)
        .bind(appointment.appointee_id)
        .bind(appointment.appointment_date)
        .bind(appointment.start_time)
        .bind(appointment.end_time)
        .bind(appointment.status)
        .bind(&appointment.reason)
        .bind(&appointment.location)
        .bind(appointment.requested_at)
        .fetch_one(&mut tx)
        .await?;
        tx.commit().await?;

        Ok(created)
    }

    async fn save_appointment(
        &self,
        appointment: &Appointment,
        expected: AppointmentStatus,
        check: Option<BookingCheck<'_>>,
    ) -> BookingResult<Appointment> {
        let mut tx = self.pool.begin().await?;
        if check.is_some() {
            advisory_lock(
                &mut tx,
                &booking_lock_key(appointment.appointee_id, appointment.appointment_date),
            )
            .await?;
        }

        let stored_status = sqlx::query_scalar::<_, AppointmentStatus>(
            "SELECT status FROM appointment
             WHERE id = $1 AND deleted_at IS NULL
             FOR UPDATE",
        )
        .bind(appointment.id)
        .fetch_optional(&mut tx)
        .await?
        .ok_or(BookingError::NotFound("appointment"))?;
        if stored_status != expected {
            return Err(BookingError::InvalidTransition {
                from: stored_status,
                to: appointment.status,
            });
        }

        if let Some(check) = check {
            check(
                &snapshot(
                    &mut tx,
                    appointment.appointee_id,
                    appointment.appointment_date,
                    Some(appointment.id),
                )
                .await?,
            )?;
        }

        let saved = sqlx::query_as::<_, Appointment>(
            "UPDATE appointment SET
                appointment_date = $2, start_time = $3, end_time = $4, status = $5,
                location = $6, responded_at = $7, completed_at = $8, cancelled_at = $9,
                cancellation_reason = $10, cancelled_by = $11, updated_at = now()
             WHERE id = $1
             RETURNING *",
        )
        .bind(appointment.id)
        .bind(appointment.appointment_date)
        .bind(appointment.start_time)
        .bind(appointment.end_time)
        .bind(appointment.status)
        .bind(&appointment.location)
        .bind(appointment.responded_at)
        .bind(appointment.completed_at)
        .bind(appointment.cancelled_at)
        .bind(&appointment.cancellation_reason)
        .bind(appointment.cancelled_by)
        .fetch_one(&mut tx)
        .await?;
        tx.commit().await?;

        Ok(saved)
    }

    async fn soft_delete_appointment(&self, id: i64, at: Timestamp) -> BookingResult<bool> {
        let result = sqlx::query(
            "UPDATE appointment SET deleted_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn accepted_ended_by(
        &self,
        date: CalendarDate,
        time: TimeOfDay,
    ) -> BookingResult<Vec<Appointment>> {
        sqlx::query_as::<_, Appointment>(
            "SELECT * FROM appointment
             WHERE status = 'accepted' AND deleted_at IS NULL
               AND (appointment_date < $1 OR (appointment_date = $1 AND end_time <= $2))
             ORDER BY appointment_date, start_time, id",
        )
        .bind(date)
        .bind(time)
        .fetch_all(&self.pool)
        .await
        .map_err(Into::into)
    }
}
