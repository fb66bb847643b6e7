//! Session-gated routing
//!
//! A pure decision over the current [`Session`]: nothing is shown while the
//! session is still resolving, signed-out users only reach the login page,
//! and signed-in users are kept away from it.

use core_auth::Session;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";

/// Application location, as far as the guard cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
    /// Any other in-app page, by path
    Page(String),
}

impl Route {
    pub fn from_path(path: &str) -> Self {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        match path {
            "" | HOME_PATH => Route::Home,
            LOGIN_PATH => Route::Login,
            other => Route::Page(other.to_string()),
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Route::Login => LOGIN_PATH,
            Route::Home => HOME_PATH,
            Route::Page(path) => path,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Session still resolving; show the loading screen
    Splash,
    Allow(Route),
    /// Replace the requested location with this one
    Redirect(Route),
}

pub struct RouteGuard;

impl RouteGuard {
    pub fn resolve(session: &Session, requested: &Route) -> RouteDecision {
        if session.is_loading {
            return RouteDecision::Splash;
        }
        match (session.is_authenticated(), requested) {
            (false, Route::Login) => RouteDecision::Allow(Route::Login),
            (false, _) => RouteDecision::Redirect(Route::Login),
            (true, Route::Login) => RouteDecision::Redirect(Route::Home),
            (true, route) => RouteDecision::Allow(route.clone()),
        }
    }
}
