use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// A member of staff listed in the directory
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Person {
    pub id: Uuid,

    #[validate(length(min = 1, max = 200))]
    pub first_name: String,

    #[validate(length(min = 1, max = 200))]
    pub last_name: String,

    #[validate(email)]
    pub email: String,

    /// Percentage of the profile that has been filled in (0-100)
    #[validate(range(max = 100))]
    pub profile_completion: u8,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}

impl Person {
    pub fn new(
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            email: email.into(),
            profile_completion: 0,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_profile_completion(mut self, completion: u8) -> Self {
        self.profile_completion = completion.min(100);
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn has_complete_profile(&self) -> bool {
        self.profile_completion >= 100
    }
}

/// Links a person to a team with a role
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct TeamMember {
    pub id: Uuid,
    pub person_id: Uuid,
    pub team_id: Uuid,

    #[validate(length(max = 255))]
    pub job_title: String,

    pub head_of_team: bool,

    /// Explicit position among the team's heads; only used with custom ordering
    pub leaders_position: Option<u32>,

    pub is_active: bool,
}

impl TeamMember {
    pub fn new(person_id: Uuid, team_id: Uuid, job_title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            person_id,
            team_id,
            job_title: job_title.into(),
            head_of_team: false,
            leaders_position: None,
            is_active: true,
        }
    }

    pub fn as_head_of_team(mut self, position: Option<u32>) -> Self {
        self.head_of_team = true;
        self.leaders_position = position;
        self
    }

    /// Key that must be unique across all memberships
    pub fn uniqueness_key(&self) -> (Uuid, Uuid, &str, bool) {
        (self.person_id, self.team_id, self.job_title.as_str(), self.head_of_team)
    }

    pub fn conflicts_with(&self, other: &TeamMember) -> bool {
        self.id != other.id && self.uniqueness_key() == other.uniqueness_key()
    }
}
