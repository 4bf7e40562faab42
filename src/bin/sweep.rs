//! Marks accepted appointments whose time has passed as completed.
//!
//! Meant to be run from cron every few minutes.

use std::sync::Arc;

use anyhow::Result;
use office_hours::config::Settings;
use office_hours::db::postgres::PgStore;
use office_hours::scheduler::Scheduler;
use office_hours::util::{init_logging, local_now};

#[tokio::main]
pub async fn main() -> Result<()> {
    let settings = Settings::load()?;
    init_logging(&settings.logging.level);

    let store = PgStore::connect(&settings.database.url, settings.database.max_connections).await?;
    let scheduler = Scheduler::new(Arc::new(store), settings.capacity);

    let (today, now) = local_now();
    let completed = scheduler.appointments.complete_elapsed(today, now).await?;
    tracing::info!(count = completed.len(), %today, %now, "completed elapsed appointments");

    Ok(())
}
