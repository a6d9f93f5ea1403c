use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::error::{AppError, ErrorKind, ErrorReport};
use crate::events::{EventBus, SessionEvent};

/// Session error callback
pub type ErrorHandler = Arc<dyn Fn(ErrorReport) + Send + Sync>;

/// Fan-out point for session errors and events
///
/// Every failure goes through `report`, which logs it, calls the installed
/// error handler and publishes it on the event bus.
#[derive(Clone)]
pub(crate) struct Reporter {
    session_id: String,
    handler: Arc<RwLock<Option<ErrorHandler>>>,
    events: Option<Arc<EventBus>>,
}

impl Reporter {
    pub fn new(session_id: String, events: Option<Arc<EventBus>>) -> Self {
        Self {
            session_id,
            handler: Arc::new(RwLock::new(None)),
            events,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn set_handler(&self, handler: ErrorHandler) {
        *self.handler.write() = Some(handler);
    }

    pub fn report(&self, err: &AppError) -> ErrorReport {
        let report = ErrorReport::from(err);
        match report.kind {
            ErrorKind::MalformedEvent | ErrorKind::Cancelled => {
                warn!("Session {}: {}", self.session_id, report.message)
            }
            _ => error!("Session {}: {}", self.session_id, report.message),
        }

        // Clone out so the handler runs without the lock held
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(report.clone());
        }

        self.publish(SessionEvent::Error {
            session_id: self.session_id.clone(),
            report: report.clone(),
        });
        report
    }

    pub fn publish(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}
