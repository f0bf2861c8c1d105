use crate::error::AppError;
use thiserror::Error;

/// Errors raised by the team hierarchy service
#[derive(Error, Debug)]
pub enum TeamServiceError {
    #[error("A team's parent cannot be the team itself")]
    ParentIsSelf,

    #[error("A team's parent cannot be a team's child")]
    ParentIsDescendant,

    #[error("Cannot update the parent of the root team")]
    ParentOfRoot,

    #[error("Cannot generate unique team slug")]
    SlugNotUnique,

    #[error("Team is already part of the hierarchy")]
    AlreadyRegistered,

    #[error("The hierarchy already has a root team")]
    RootExists,

    #[error("Team cannot be deleted because it has {}", .0.join(" and "))]
    NotDeletable(Vec<String>),

    #[error("Expected exactly one root team, found {0}")]
    RootTeamCount(usize),

    #[error("Team {0} not found")]
    TeamNotFound(uuid::Uuid),
}

impl From<TeamServiceError> for AppError {
    fn from(err: TeamServiceError) -> Self {
        match err {
            TeamServiceError::RootTeamCount(_) => AppError::Integrity(err.to_string()),
            TeamServiceError::TeamNotFound(_) => AppError::NotFound(err.to_string()),
            _ => AppError::Domain(err.to_string()),
        }
    }
}
