//! Orchestrator error types and the error taxonomy exposed to callers.

use cumulus_agents::AgentError;
use cumulus_cascade::CascadeError;
use cumulus_net::NetError;
use cumulus_placement::PlacementError;
use cumulus_state::StateError;
use thiserror::Error;

/// Coarse classification of failures, used to pick API status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    QuotaExceeded,
    /// Addresses, VRRP ids or hosts ran out.
    Exhausted,
    /// A remote agent call could not be made or failed.
    Dispatch,
    InvalidConfig,
    BadRequest,
    Internal,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("quota exceeded for project {project}: {resource}")]
    QuotaExceeded {
        project: String,
        resource: &'static str,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Placement(#[from] PlacementError),

    #[error(transparent)]
    Cascade(#[from] CascadeError),
}

fn state_kind(e: &StateError) -> ErrorKind {
    match e {
        StateError::NotFound(_) => ErrorKind::NotFound,
        StateError::Conflict(_) => ErrorKind::Conflict,
        _ => ErrorKind::Internal,
    }
}

impl OrchestratorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::NotFound(_) => ErrorKind::NotFound,
            OrchestratorError::Conflict(_) => ErrorKind::Conflict,
            OrchestratorError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            OrchestratorError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            OrchestratorError::BadRequest(_) => ErrorKind::BadRequest,
            OrchestratorError::State(e) => state_kind(e),
            OrchestratorError::Net(e) => match e {
                NetError::AddressExhausted(_) | NetError::VrrpExhausted(_) => ErrorKind::Exhausted,
                NetError::InvalidConfig(_) => ErrorKind::InvalidConfig,
                NetError::DuplicateMac { .. } => ErrorKind::Conflict,
                NetError::State(e) => state_kind(e),
            },
            OrchestratorError::Agent(_) => ErrorKind::Dispatch,
            OrchestratorError::Placement(e) => match e {
                PlacementError::NoHosts(_) | PlacementError::NoZones(_) => ErrorKind::Exhausted,
                PlacementError::State(e) => state_kind(e),
            },
            OrchestratorError::Cascade(CascadeError::State(e)) => state_kind(e),
        }
    }

    /// Whether the error means the addressed resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_errors_keep_their_kind() {
        let missing = OrchestratorError::from(NetError::State(StateError::NotFound("subnet s1".into())));
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let exhausted = OrchestratorError::from(NetError::AddressExhausted("lan".into()));
        assert_eq!(exhausted.kind(), ErrorKind::Exhausted);

        let dispatch = OrchestratorError::from(AgentError::NoEligibleAgent { method: "StartInstance".into() });
        assert_eq!(dispatch.kind(), ErrorKind::Dispatch);

        let io = OrchestratorError::from(StateError::Write("disk full".into()));
        assert_eq!(io.kind(), ErrorKind::Internal);
    }

    #[test]
    fn quota_message_names_resource() {
        let err = OrchestratorError::QuotaExceeded {
            project: "acme".into(),
            resource: "vcpus",
        };
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert_eq!(err.to_string(), "quota exceeded for project acme: vcpus");
    }
}
