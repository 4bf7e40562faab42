use async_graphql::ErrorExtensions;
use thiserror::Error;

use crate::models::appointment::AppointmentStatus;

/// Everything the booking engine can refuse a request with.
#[derive(Debug, Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Overlap(String),
    #[error("the requested time slot is unavailable, please pick another time")]
    SlotUnavailable,
    #[error("an appointment cannot go from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("no {0} found")]
    NotFound(&'static str),
    #[error("the {0} does not exist or does not belong to the caller")]
    NotFoundOrUnauthorized(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type BookingResult<T> = Result<T, BookingError>;

impl BookingError {
    pub fn validation(message: impl Into<String>) -> Self {
        BookingError::Validation(message.into())
    }

    /// The stable code the GraphQL layer exposes under `extensions.code`.
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::Validation(_) => "VALIDATION_ERROR",
            BookingError::Overlap(_) => "OVERLAP_ERROR",
            BookingError::SlotUnavailable => "SLOT_UNAVAILABLE",
            BookingError::InvalidTransition { .. } => "INVALID_TRANSITION",
            BookingError::NotFound(_) => "NOT_FOUND",
            BookingError::NotFoundOrUnauthorized(_) => "NOT_FOUND_OR_UNAUTHORIZED",
            BookingError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Only a lost booking race is worth re-checking and asking again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BookingError::SlotUnavailable)
    }
}

impl ErrorExtensions for BookingError {
    fn extend(&self) -> async_graphql::Error {
        async_graphql::Error::new(self.to_string()).extend_with(|_err, extensions| {
            extensions.set("code", self.code());
            extensions.set("retryable", self.is_retryable());
            if let BookingError::InvalidTransition { from, to } = self {
                extensions.set("from", from.to_string());
                extensions.set("to", to.to_string());
            }
        })
    }
}
