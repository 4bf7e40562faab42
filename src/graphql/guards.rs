use async_graphql::{Context, ErrorExtensions, Guard, Result};
use axum::http::HeaderMap;

use crate::error::BookingError;

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";

/// Who is making the request, as vouched for by the gateway in front of us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Caller {
    /// Reads the caller from the request headers, if there is one.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, String> {
        let user_id = match headers.get(CALLER_ID_HEADER) {
            Some(value) => value
                .to_str()
                .ok()
                .and_then(|id| id.trim().parse::<i64>().ok())
                .ok_or_else(|| format!("{} must be a numeric user ID", CALLER_ID_HEADER))?,
            None => return Ok(None),
        };
        let is_admin = headers
            .get(CALLER_ROLE_HEADER)
            .and_then(|role| role.to_str().ok())
            .map(|role| role.trim().eq_ignore_ascii_case("admin"))
            .unwrap_or(false);

        Ok(Some(Self { user_id, is_admin }))
    }

    /// Staff members manage their own hours; admins manage everyone's.
    pub fn can_manage(&self, staff_id: i64) -> bool {
        self.is_admin || self.user_id == staff_id
    }

    pub fn ensure_manages(&self, staff_id: i64, resource: &'static str) -> Result<()> {
        if self.can_manage(staff_id) {
            Ok(())
        } else {
            Err(BookingError::NotFoundOrUnauthorized(resource).extend())
        }
    }
}

pub struct LoggedIn;

#[async_trait::async_trait]
impl Guard for LoggedIn {
    async fn check(&self, ctx: &Context<'_>) -> Result<()> {
        if ctx.data_opt::<Caller>().is_some() {
            Ok(())
        } else {
            Err(async_graphql::Error::new("Caller must be identified")
                .extend_with(|_err, extensions| extensions.set("code", "UNAUTHENTICATED")))
        }
    }
}
