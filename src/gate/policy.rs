//! Authorization policy shared by the edge gate and the client guard.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Redirect, Response},
};
use serde_json::json;

use super::routes::{self, RouteClass};

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";
pub const AUTH_REQUIRED: &str = "Authentication required";

/// Outcome of the gate for a single request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RedirectToLogin { target: String },
    Unauthorized,
    RedirectToHome,
}

/// Apply the transition table to a classified request.
#[must_use]
pub fn decide(authenticated: bool, path: &str, class: RouteClass) -> Decision {
    match (authenticated, class) {
        (false, RouteClass::Public | RouteClass::PublicApi) => Decision::Allow,
        (false, RouteClass::Protected) if routes::is_api(path) => Decision::Unauthorized,
        (false, RouteClass::Protected) => Decision::RedirectToLogin {
            target: login_redirect(path),
        },
        (true, RouteClass::Public) if path == HOME_PATH => Decision::Allow,
        (true, RouteClass::Public) => Decision::RedirectToHome,
        (true, RouteClass::PublicApi | RouteClass::Protected) => Decision::Allow,
    }
}

/// Build the login URL that returns to `return_to` after sign-in.
#[must_use]
pub fn login_redirect(return_to: &str) -> String {
    format!("{LOGIN_PATH}?redirect={}", urlencoding::encode(return_to))
}

/// The JSON `401` body used for unauthenticated API calls.
#[must_use]
pub fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": AUTH_REQUIRED })),
    )
        .into_response()
}

impl Decision {
    /// Response for a terminal decision, `None` for [`Decision::Allow`].
    #[must_use]
    pub fn response(self) -> Option<Response> {
        match self {
            Self::Allow => None,
            Self::RedirectToLogin { target } => Some(Redirect::temporary(&target).into_response()),
            Self::Unauthorized => Some(unauthorized()),
            Self::RedirectToHome => Some(Redirect::temporary(HOME_PATH).into_response()),
        }
    }
}
