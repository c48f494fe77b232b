//! Client guard: the in-page counterpart of the edge gate.
//!
//! The edge gate already redirected anonymous visitors, but the page can
//! outlive the session (sign-out in another tab, expired refresh token). The
//! guard watches auth-state events and sends the visitor to the login page
//! when the session disappears, issuing at most one navigation at a time.

use tokio::sync::mpsc;
use tracing::debug;

use crate::gate::{policy, session::AuthUser};

pub const VERIFYING_MESSAGE: &str = "Verifying authentication...";
pub const REDIRECTING_MESSAGE: &str = "Redirecting to login...";

/// Auth state as reported by the subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthSnapshot {
    Loading,
    SignedIn(AuthUser),
    SignedOut,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardState {
    Loading,
    Authenticated(AuthUser),
    Unauthenticated,
}

/// What the page should render.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardView {
    /// Non-blocking indicator with a message.
    Indicator(&'static str),
    /// Render the protected subtree unchanged.
    Protected,
}

/// Performs client-side navigation.
pub trait Navigator {
    fn push(&self, location: &str);
}

pub struct ClientGuard<N: Navigator> {
    navigator: N,
    location: String,
    state: GuardState,
    navigating: bool,
}

impl<N: Navigator> ClientGuard<N> {
    /// A guard mounted at `location` (path plus query of the current page).
    pub fn new(navigator: N, location: impl Into<String>) -> Self {
        Self {
            navigator,
            location: location.into(),
            state: GuardState::Loading,
            navigating: false,
        }
    }

    #[must_use]
    pub fn state(&self) -> &GuardState {
        &self.state
    }

    /// Update the current location after in-app navigation.
    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    /// Apply one auth-state event.
    pub fn apply(&mut self, snapshot: AuthSnapshot) -> GuardView {
        self.state = match snapshot {
            AuthSnapshot::Loading => GuardState::Loading,
            AuthSnapshot::SignedIn(user) => {
                self.navigating = false;
                GuardState::Authenticated(user)
            }
            AuthSnapshot::SignedOut => {
                if !self.navigating {
                    self.navigating = true;
                    let target = policy::login_redirect(&self.location);
                    debug!(location = %target, "Client guard redirecting");
                    self.navigator.push(&target);
                }
                GuardState::Unauthenticated
            }
        };
        self.view()
    }

    #[must_use]
    pub fn view(&self) -> GuardView {
        match self.state {
            GuardState::Loading => GuardView::Indicator(VERIFYING_MESSAGE),
            GuardState::Authenticated(_) => GuardView::Protected,
            GuardState::Unauthenticated => GuardView::Indicator(REDIRECTING_MESSAGE),
        }
    }

    /// Drain a subscription, applying events in the order received. Returns
    /// the last view once the sender side is dropped.
    pub async fn run(&mut self, mut events: mpsc::Receiver<AuthSnapshot>) -> GuardView {
        while let Some(snapshot) = events.recv().await {
            self.apply(snapshot);
        }
        self.view()
    }
}
