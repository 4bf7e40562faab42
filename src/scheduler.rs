use std::sync::Arc;

use crate::config::CapacityLimits;
use crate::db::Store;
use crate::models::appointment::AppointmentManager;
use crate::models::exception::ExceptionStore;
use crate::models::schedule::ConflictValidator;
use crate::models::template::TemplateStore;

/// The four components wired to one store.
///
/// This is what the GraphQL schema carries as context data and what the
/// binaries build at startup.
pub struct Scheduler {
    pub templates: TemplateStore,
    pub exceptions: ExceptionStore,
    pub validator: ConflictValidator,
    pub appointments: AppointmentManager,
}

impl Scheduler {
    pub fn new(db: Arc<dyn Store>, limits: CapacityLimits) -> Self {
        Self {
            templates: TemplateStore::new(db.clone(), limits),
            exceptions: ExceptionStore::new(db.clone()),
            validator: ConflictValidator::new(db.clone()),
            appointments: AppointmentManager::new(db),
        }
    }
}
