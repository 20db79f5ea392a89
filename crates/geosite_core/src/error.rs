//! User-facing error taxonomy.
//!
//! Each layer keeps its own error enum; this module maps them onto the
//! small set of kinds the UI shell understands.

use serde::Serialize;

/// Classification shared by every user-reachable error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed or unsupported shape; the user must redraw.
    InvalidGeometry,
    /// Referenced project/site is absent or not owned by the actor.
    NotFound,
    /// Re-entrant surface creation. Recovered internally.
    TransientSurfaceConflict,
    /// Storage failure during create/update/delete.
    PersistenceFailure,
    /// Blank names, out-of-range metrics, invalid session transitions.
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidGeometry => "invalid_geometry",
            Self::NotFound => "not_found",
            Self::TransientSurfaceConflict => "transient_surface_conflict",
            Self::PersistenceFailure => "persistence_failure",
            Self::InvalidInput => "invalid_input",
        }
    }

    /// Whether errors of this kind are shown to the user.
    pub fn is_user_visible(self) -> bool {
        !matches!(self, Self::TransientSurfaceConflict)
    }
}

/// Implemented by error types that can reach the UI shell.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// User-facing notification built from a classified error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: ErrorKind,
    pub message: String,
}

impl Notification {
    /// Returns `None` for kinds that are never shown to the user.
    pub fn from_error<E>(err: &E) -> Option<Self>
    where
        E: Classify + std::fmt::Display,
    {
        let kind = err.kind();
        kind.is_user_visible().then(|| Self {
            kind,
            message: err.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Classify, ErrorKind, Notification};
    use std::fmt::{Display, Formatter};

    struct Fixed(ErrorKind);

    impl Display for Fixed {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "fixed {}", self.0.as_str())
        }
    }

    impl Classify for Fixed {
        fn kind(&self) -> ErrorKind {
            self.0
        }
    }

    #[test]
    fn surface_conflicts_never_notify() {
        assert!(Notification::from_error(&Fixed(ErrorKind::TransientSurfaceConflict)).is_none());
    }

    #[test]
    fn persistence_failures_notify_with_message() {
        let notification = Notification::from_error(&Fixed(ErrorKind::PersistenceFailure))
            .expect("persistence failures are user visible");
        assert_eq!(notification.kind, ErrorKind::PersistenceFailure);
        assert_eq!(notification.message, "fixed persistence_failure");
    }
}
