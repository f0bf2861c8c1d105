use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;
use validator::Validate;

/// An organisational team in the People Finder directory
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct Team {
    /// Unique identifier
    pub id: Uuid,

    /// Full team name
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    /// Optional abbreviation (e.g. "COO")
    #[validate(length(max = 20))]
    pub abbreviation: Option<String>,

    /// Unique URL slug
    #[validate(length(min = 1, max = 130))]
    pub slug: String,

    /// Free text description
    pub description: String,

    /// How the heads of this team are ordered
    pub leaders_ordering: LeadersOrdering,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// Create a new team with an empty slug; slugs are assigned by the team service
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            abbreviation: None,
            slug: String::new(),
            description: String::new(),
            leaders_ordering: LeadersOrdering::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_slug(mut self, slug: impl Into<String>) -> Self {
        self.slug = slug.into();
        self
    }

    pub fn with_abbreviation(mut self, abbreviation: impl Into<String>) -> Self {
        self.abbreviation = Some(abbreviation.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// The abbreviation when set, otherwise the full name
    pub fn short_name(&self) -> &str {
        match self.abbreviation.as_deref() {
            Some(abbreviation) if !abbreviation.is_empty() => abbreviation,
            _ => &self.name,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Ordering mode for the heads of a team
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LeadersOrdering {
    #[default]
    Alphabetical,
    Custom,
}

/// A row of the team closure table.
///
/// Every registered team has a `depth == 0` row pointing at itself, and one
/// row per ancestor with `depth` equal to the number of edges between them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TeamTreeEntry {
    pub parent: Uuid,
    pub child: Uuid,
    pub depth: u32,
}

impl TeamTreeEntry {
    pub fn new(parent: Uuid, child: Uuid, depth: u32) -> Self {
        Self {
            parent,
            child,
            depth,
        }
    }

    /// Check if this is the self-referencing row of a team
    pub fn is_self_reference(&self) -> bool {
        self.parent == self.child && self.depth == 0
    }

    /// Check if this is a direct parent-child relationship
    pub fn is_direct_relationship(&self) -> bool {
        self.depth == 1
    }
}

/// Flattened team data for the team-select widget
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TeamSelectDatum {
    pub team_id: Uuid,
    pub team_name: String,
    pub parent_id: Option<Uuid>,
    pub parent_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_name_prefers_abbreviation() {
        let team = Team::new("Chief Operating Officer").with_abbreviation("COO");
        assert_eq!(team.short_name(), "COO");

        let team = Team::new("Analysis");
        assert_eq!(team.short_name(), "Analysis");

        let team = Team::new("Analysis").with_abbreviation("");
        assert_eq!(team.short_name(), "Analysis");
    }

    #[test]
    fn test_tree_entry_kinds() {
        let id = Uuid::new_v4();
        assert!(TeamTreeEntry::new(id, id, 0).is_self_reference());
        assert!(TeamTreeEntry::new(Uuid::new_v4(), id, 1).is_direct_relationship());
    }

    #[test]
    fn test_leaders_ordering_round_trip() {
        assert_eq!("custom".parse::<LeadersOrdering>().unwrap(), LeadersOrdering::Custom);
        assert_eq!(LeadersOrdering::Alphabetical.to_string(), "alphabetical");
    }
}
