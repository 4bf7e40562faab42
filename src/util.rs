//! Clock and logging helpers shared by the binaries and the models.

use time::OffsetDateTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::models::{CalendarDate, TimeOfDay, Timestamp};

pub fn current_time() -> Timestamp {
    Timestamp(OffsetDateTime::now_utc())
}

/// The campus wall clock, split into the date and time appointments use.
///
/// Falls back to UTC when the local offset can't be determined.
pub fn local_now() -> (CalendarDate, TimeOfDay) {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    (CalendarDate(now.date()), TimeOfDay(now.time()))
}

/// Installs the global subscriber. `RUST_LOG` wins over `level` when set.
pub fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
