use std::sync::Arc;

use async_graphql::{Enum, SimpleObject};

use crate::db::{DaySnapshot, Store, TemplateGroup};
use crate::error::{BookingError, BookingResult};
use crate::models::appointment::Appointment;
use crate::models::exception::{AvailabilityException, ExceptionType};
use crate::models::interval::TimeRange;
use crate::models::template::AvailabilityTemplate;
use crate::models::{CalendarDate, TimeOfDay};

/// How many appointments a block of open hours can take
#[derive(SimpleObject, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Capacity {
    pub max_regular: i32,
    pub max_emergency: i32,
    pub allow_emergency: bool,
}

impl From<&AvailabilityTemplate> for Capacity {
    fn from(template: &AvailabilityTemplate) -> Self {
        Self {
            max_regular: template.max_regular_capacity,
            max_emergency: template.max_emergency_capacity,
            allow_emergency: template.allow_emergency,
        }
    }
}

/// Where a block of open hours came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Enum)]
pub enum IntervalSource {
    /// The staff member's recurring weekly hours
    Template,
    /// Hours that replace the recurring ones for the day
    ModifiedHours,
    /// Hours added on top of the recurring ones
    ExtraHours,
}

/// A stretch of a day in which a staff member can be booked
#[derive(SimpleObject, Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenInterval {
    pub range: TimeRange,
    pub source: IntervalSource,
    /// Capacity limits from the template, if the hours came from one
    pub capacity: Option<Capacity>,
}

/// The hours a staff member is open on `date`, given the templates for that
/// weekday and the exceptions for that date.
///
/// The result is sorted and disjoint; overlapping or back-to-back blocks are
/// merged, keeping the capacity of the earliest block.
pub fn resolve_open_intervals(
    templates: &[AvailabilityTemplate],
    exceptions: &[AvailabilityException],
    date: CalendarDate,
) -> Vec<OpenInterval> {
    let todays_exceptions: Vec<&AvailabilityException> = exceptions
        .iter()
        .filter(|exception| exception.exception_date == date)
        .collect();

    let closed_all_day = todays_exceptions.iter().any(|exception| {
        exception.exception_type == ExceptionType::Unavailable && exception.window().is_none()
    });
    if closed_all_day {
        return Vec::new();
    }

    let windows_of = |exception_type: ExceptionType| {
        todays_exceptions
            .iter()
            .filter(move |exception| exception.exception_type == exception_type)
            .filter_map(|exception| exception.window())
    };

    let mut open: Vec<OpenInterval> = if windows_of(ExceptionType::ModifiedHours).next().is_some() {
        windows_of(ExceptionType::ModifiedHours)
            .map(|range| OpenInterval {
                range,
                source: IntervalSource::ModifiedHours,
                capacity: None,
            })
            .collect()
    } else {
        templates
            .iter()
            .filter(|template| template.applies_on(date))
            .map(|template| OpenInterval {
                range: template.range(),
                source: IntervalSource::Template,
                capacity: Some(Capacity::from(template)),
            })
            .collect()
    };

    open.extend(
        windows_of(ExceptionType::ExtraHours).map(|range| OpenInterval {
            range,
            source: IntervalSource::ExtraHours,
            capacity: None,
        }),
    );

    let mut open = merge(open);
    for closed in windows_of(ExceptionType::Unavailable) {
        open = open
            .into_iter()
            .flat_map(|interval| {
                interval
                    .range
                    .subtract(&closed)
                    .into_iter()
                    .map(move |range| OpenInterval { range, ..interval })
            })
            .collect();
    }

    open
}

fn merge(mut intervals: Vec<OpenInterval>) -> Vec<OpenInterval> {
    intervals.sort_by_key(|interval| (interval.range.start, interval.range.end));

    let mut merged: Vec<OpenInterval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if last.range.touches(&interval.range) => {
                last.range.end = last.range.end.max(interval.range.end);
                if last.capacity.is_none() {
                    last.capacity = interval.capacity;
                }
            }
            _ => merged.push(interval),
        }
    }

    merged
}

/// The first live appointment (other than `exclude`) that collides with `range`.
pub fn conflicting_appointment<'a>(
    appointments: &'a [Appointment],
    range: &TimeRange,
    exclude: Option<i64>,
) -> Option<&'a Appointment> {
    appointments.iter().find(|appointment| {
        Some(appointment.id) != exclude
            && appointment.deleted_at.is_none()
            && appointment.status.holds_slot()
            && appointment.range().overlaps(range)
    })
}

/// The first active template in `siblings` (other than `exclude`) whose
/// hours collide with `range`.
pub fn overlapping_template<'a>(
    siblings: &'a [AvailabilityTemplate],
    range: &TimeRange,
    exclude: Option<i64>,
) -> Option<&'a AvailabilityTemplate> {
    siblings.iter().find(|template| {
        Some(template.id) != exclude && template.is_active && template.range().overlaps(range)
    })
}

/// Whether `range` on `date` fits inside open hours and clashes with nothing.
pub fn slot_is_free(
    snapshot: &DaySnapshot,
    date: CalendarDate,
    range: &TimeRange,
    exclude: Option<i64>,
) -> bool {
    let open = resolve_open_intervals(&snapshot.templates, &snapshot.exceptions, date);
    if !open.iter().any(|interval| interval.range.contains(range)) {
        return false;
    }

    conflicting_appointment(&snapshot.appointments, range, exclude).is_none()
}

/// [`slot_is_free`] as a check the store can run inside its lock.
pub fn ensure_slot_is_free(
    snapshot: &DaySnapshot,
    date: CalendarDate,
    range: &TimeRange,
    exclude: Option<i64>,
) -> BookingResult<()> {
    if slot_is_free(snapshot, date, range, exclude) {
        Ok(())
    } else {
        Err(BookingError::SlotUnavailable)
    }
}

/// Back-to-back slots of `slot_minutes` within the open hours that no live
/// appointment touches.
pub fn free_slots(
    open: &[OpenInterval],
    appointments: &[Appointment],
    slot_minutes: u32,
) -> Vec<TimeRange> {
    let mut slots = Vec::new();
    if slot_minutes == 0 {
        return slots;
    }

    for interval in open.iter().filter(|interval| interval.range.minutes() >= slot_minutes) {
        let mut start = interval.range.start;
        while let Some(end) = start.checked_add_minutes(slot_minutes) {
            if end > interval.range.end {
                break;
            }

            let slot = TimeRange { start, end };
            if conflicting_appointment(appointments, &slot, None).is_none() {
                slots.push(slot);
            }
            start = end;
        }
    }

    slots
}

/// Read-only decisions about when a staff member can be booked.
///
/// Nothing is cached between calls; every answer comes from a fresh read of
/// the store.
pub struct ConflictValidator {
    db: Arc<dyn Store>,
}

impl ConflictValidator {
    pub fn new(db: Arc<dyn Store>) -> Self {
        Self { db }
    }

    pub async fn resolve_effective_availability(
        &self,
        staff_id: i64,
        date: CalendarDate,
    ) -> BookingResult<Vec<OpenInterval>> {
        let snapshot = self.db.day_snapshot(staff_id, date, None).await?;
        Ok(resolve_open_intervals(
            &snapshot.templates,
            &snapshot.exceptions,
            date,
        ))
    }

    pub async fn is_bookable(
        &self,
        staff_id: i64,
        date: CalendarDate,
        start_time: TimeOfDay,
        end_time: TimeOfDay,
        exclude_appointment_id: Option<i64>,
    ) -> BookingResult<bool> {
        let range = match TimeRange::new(start_time, end_time) {
            Ok(range) => range,
            Err(_) => return Ok(false),
        };

        let snapshot = self
            .db
            .day_snapshot(staff_id, date, exclude_appointment_id)
            .await?;
        let bookable = slot_is_free(&snapshot, date, &range, exclude_appointment_id);

        tracing::debug!(
            staff_id,
            %date,
            start = %start_time,
            end = %end_time,
            bookable,
            "checked slot"
        );
        Ok(bookable)
    }

    pub async fn template_overlaps(
        &self,
        staff_id: i64,
        day_of_week: i16,
        start_time: TimeOfDay,
        end_time: TimeOfDay,
        week_of_month: Option<i16>,
        exclude_template_id: Option<i64>,
    ) -> BookingResult<bool> {
        let range = TimeRange::new(start_time, end_time)?;
        let siblings = self
            .db
            .templates_in_group(TemplateGroup {
                staff_id,
                day_of_week,
                week_of_month,
            })
            .await?;

        Ok(overlapping_template(&siblings, &range, exclude_template_id).is_some())
    }

    pub async fn available_slots(
        &self,
        staff_id: i64,
        date: CalendarDate,
        slot_minutes: u32,
    ) -> BookingResult<Vec<TimeRange>> {
        if slot_minutes == 0 {
            return Err(BookingError::validation("Slot length must be at least a minute"));
        }

        let snapshot = self.db.day_snapshot(staff_id, date, None).await?;
        let open = resolve_open_intervals(&snapshot.templates, &snapshot.exceptions, date);

        Ok(free_slots(&open, &snapshot.appointments, slot_minutes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::appointment::AppointmentStatus;
    use crate::tests::mock::{
        date, mock_appointment, mock_exception, mock_template, range, time, MONDAY, TUESDAY,
    };

    fn ranges(open: &[OpenInterval]) -> Vec<TimeRange> {
        open.iter().map(|interval| interval.range).collect()
    }

    #[test]
    fn templates_open_their_hours_on_matching_days() {
        let templates = [mock_template(1, 1, "09:00", "12:00")];

        let monday = resolve_open_intervals(&templates, &[], date(MONDAY));
        let tuesday = resolve_open_intervals(&templates, &[], date(TUESDAY));

        assert_eq!(ranges(&monday), vec![range("09:00", "12:00")]);
        assert_eq!(monday[0].source, IntervalSource::Template);
        assert_eq!(monday[0].capacity.map(|c| c.max_regular), Some(1));
        assert!(tuesday.is_empty());
    }

    #[test]
    fn week_of_month_limits_which_weeks_apply() {
        let mut second_monday_only = mock_template(1, 1, "09:00", "12:00");
        second_monday_only.week_of_month = Some(2);
        let templates = [second_monday_only];

        assert!(resolve_open_intervals(&templates, &[], date("2024-01-01")).is_empty());
        assert_eq!(
            resolve_open_intervals(&templates, &[], date("2024-01-08")).len(),
            1
        );
    }

    #[test]
    fn validity_bounds_are_inclusive_calendar_dates() {
        let mut bounded = mock_template(1, 1, "09:00", "12:00");
        bounded.valid_from = Some(date("2024-01-08"));
        bounded.valid_to = Some(date("2024-01-15"));
        let templates = [bounded];

        assert!(resolve_open_intervals(&templates, &[], date("2024-01-01")).is_empty());
        assert_eq!(resolve_open_intervals(&templates, &[], date("2024-01-08")).len(), 1);
        assert_eq!(resolve_open_intervals(&templates, &[], date("2024-01-15")).len(), 1);
        assert!(resolve_open_intervals(&templates, &[], date("2024-01-22")).is_empty());
    }

    #[test]
    fn inactive_templates_open_nothing() {
        let mut inactive = mock_template(1, 1, "09:00", "12:00");
        inactive.is_active = false;

        assert!(resolve_open_intervals(&[inactive], &[], date(MONDAY)).is_empty());
    }

    #[test]
    fn full_day_unavailability_closes_everything() {
        let templates = [
            mock_template(1, 1, "09:00", "12:00"),
            mock_template(2, 1, "13:00", "17:00"),
        ];
        let exceptions = [
            mock_exception(1, MONDAY, ExceptionType::Unavailable, None),
            mock_exception(2, MONDAY, ExceptionType::ExtraHours, Some(("18:00", "19:00"))),
        ];

        assert!(resolve_open_intervals(&templates, &exceptions, date(MONDAY)).is_empty());
    }

    #[test]
    fn partial_unavailability_is_cut_out() {
        let templates = [mock_template(1, 1, "09:00", "17:00")];
        let exceptions = [mock_exception(
            1,
            MONDAY,
            ExceptionType::Unavailable,
            Some(("12:00", "13:00")),
        )];

        let open = resolve_open_intervals(&templates, &exceptions, date(MONDAY));

        assert_eq!(
            ranges(&open),
            vec![range("09:00", "12:00"), range("13:00", "17:00")]
        );
        assert!(open.iter().all(|interval| interval.capacity.is_some()));
    }

    #[test]
    fn modified_hours_replace_the_template() {
        let templates = [mock_template(1, 1, "09:00", "12:00")];
        let exceptions = [mock_exception(
            1,
            MONDAY,
            ExceptionType::ModifiedHours,
            Some(("14:00", "16:00")),
        )];

        let open = resolve_open_intervals(&templates, &exceptions, date(MONDAY));

        assert_eq!(ranges(&open), vec![range("14:00", "16:00")]);
        assert_eq!(open[0].source, IntervalSource::ModifiedHours);
    }

    #[test]
    fn extra_hours_are_added_and_merged() {
        let templates = [mock_template(1, 2, "09:00", "17:00")];
        let exceptions = [mock_exception(
            1,
            TUESDAY,
            ExceptionType::ExtraHours,
            Some(("17:00", "19:00")),
        )];

        let open = resolve_open_intervals(&templates, &exceptions, date(TUESDAY));

        assert_eq!(ranges(&open), vec![range("09:00", "19:00")]);
        assert_eq!(open[0].source, IntervalSource::Template);
    }

    #[test]
    fn exceptions_for_other_dates_are_ignored() {
        let templates = [mock_template(1, 1, "09:00", "12:00")];
        let exceptions = [mock_exception(1, "2024-01-08", ExceptionType::Unavailable, None)];

        assert_eq!(
            resolve_open_intervals(&templates, &exceptions, date(MONDAY)).len(),
            1
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let templates = [
            mock_template(1, 1, "13:00", "15:00"),
            mock_template(2, 1, "09:00", "12:00"),
        ];
        let exceptions = [mock_exception(
            1,
            MONDAY,
            ExceptionType::Unavailable,
            Some(("10:00", "10:30")),
        )];

        let first = resolve_open_intervals(&templates, &exceptions, date(MONDAY));
        let second = resolve_open_intervals(&templates, &exceptions, date(MONDAY));

        assert_eq!(first, second);
        assert_eq!(
            ranges(&first),
            vec![
                range("09:00", "10:00"),
                range("10:30", "12:00"),
                range("13:00", "15:00")
            ]
        );
    }

    #[test]
    fn slots_must_fit_inside_open_hours() {
        let snapshot = DaySnapshot {
            templates: vec![mock_template(1, 1, "09:00", "12:00")],
            ..Default::default()
        };

        assert!(slot_is_free(&snapshot, date(MONDAY), &range("09:00", "12:00"), None));
        assert!(!slot_is_free(&snapshot, date(MONDAY), &range("11:30", "12:30"), None));
        assert!(!slot_is_free(&snapshot, date(MONDAY), &range("08:00", "08:30"), None));
    }

    #[test]
    fn live_appointments_block_overlapping_slots() {
        let snapshot = DaySnapshot {
            templates: vec![mock_template(1, 1, "09:00", "12:00")],
            appointments: vec![mock_appointment(1, MONDAY, "10:00", "10:30")],
            ..Default::default()
        };

        assert!(!slot_is_free(&snapshot, date(MONDAY), &range("10:15", "10:45"), None));
        assert!(slot_is_free(&snapshot, date(MONDAY), &range("10:30", "11:00"), None));
        assert!(slot_is_free(&snapshot, date(MONDAY), &range("10:15", "10:45"), Some(1)));
    }

    #[test]
    fn finished_appointments_free_their_slot() {
        let mut declined = mock_appointment(1, MONDAY, "10:00", "10:30");
        declined.status = AppointmentStatus::Declined;
        let snapshot = DaySnapshot {
            templates: vec![mock_template(1, 1, "09:00", "12:00")],
            appointments: vec![declined],
            ..Default::default()
        };

        assert!(slot_is_free(&snapshot, date(MONDAY), &range("10:00", "10:30"), None));
    }

    #[test]
    fn template_overlap_ignores_touching_and_excluded() {
        let siblings = [
            mock_template(1, 1, "09:00", "12:00"),
            mock_template(2, 1, "13:00", "15:00"),
        ];

        assert!(overlapping_template(&siblings, &range("11:00", "13:30"), None).is_some());
        assert!(overlapping_template(&siblings, &range("12:00", "13:00"), None).is_none());
        assert!(overlapping_template(&siblings, &range("08:00", "12:00"), Some(1)).is_none());
    }

    #[test]
    fn free_slots_skip_booked_time() {
        let templates = [mock_template(1, 1, "09:00", "11:00")];
        let open = resolve_open_intervals(&templates, &[], date(MONDAY));
        let booked = [mock_appointment(1, MONDAY, "09:30", "10:00")];

        let slots = free_slots(&open, &booked, 30);

        assert_eq!(
            slots,
            vec![
                range("09:00", "09:30"),
                range("10:00", "10:30"),
                range("10:30", "11:00")
            ]
        );
        assert!(free_slots(&open, &booked, 0).is_empty());
        assert!(free_slots(&open, &[], 150).is_empty());
        assert_eq!(
            free_slots(&open, &[], 45),
            vec![range("09:00", "09:45"), range("09:45", "10:30")]
        );
        assert_eq!(time("10:30"), slots[1].end);
    }
}
