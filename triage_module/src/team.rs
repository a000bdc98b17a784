use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TeamDirectoryError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("team directory has no assignable members")]
    NoAssignableMembers,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamRole {
    Admin,
    Support,
    Engineering,
    Product,
}

impl fmt::Display for TeamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            TeamRole::Admin => "admin",
            TeamRole::Support => "support",
            TeamRole::Engineering => "engineering",
            TeamRole::Product => "product",
        };
        f.write_str(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: TeamRole,
}

/// Injected routing table for the classification prompt. Loaded from TOML
/// when a path is configured, otherwise the compiled-in default roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDirectory {
    #[serde(default = "default_brand")]
    pub brand: String,
    pub members: Vec<TeamMember>,
}

fn default_brand() -> String {
    "Notely".to_string()
}

pub const UNASSIGNED_ID: &str = "unassigned";

impl Default for TeamDirectory {
    fn default() -> Self {
        Self {
            brand: default_brand(),
            members: vec![
                TeamMember {
                    id: "mara".to_string(),
                    name: "Mara".to_string(),
                    email: "mara@notely.app".to_string(),
                    role: TeamRole::Support,
                },
                TeamMember {
                    id: "jonas".to_string(),
                    name: "Jonas".to_string(),
                    email: "jonas@notely.app".to_string(),
                    role: TeamRole::Support,
                },
                TeamMember {
                    id: "elena".to_string(),
                    name: "Elena".to_string(),
                    email: "elena@notely.app".to_string(),
                    role: TeamRole::Engineering,
                },
                TeamMember {
                    id: UNASSIGNED_ID.to_string(),
                    name: "Unassigned".to_string(),
                    email: "support@notely.app".to_string(),
                    role: TeamRole::Admin,
                },
            ],
        }
    }
}

impl TeamDirectory {
    pub fn load(path: &Path) -> Result<Self, TeamDirectoryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| TeamDirectoryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let directory: TeamDirectory =
            toml::from_str(&raw).map_err(|source| TeamDirectoryError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        if directory.assignable_ids().is_empty() {
            return Err(TeamDirectoryError::NoAssignableMembers);
        }
        Ok(directory)
    }

    /// Member ids the model may route to; the sentinel stays out of the
    /// closed assignee set.
    pub fn assignable_ids(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|member| member.id != UNASSIGNED_ID)
            .map(|member| member.id.clone())
            .collect()
    }

    /// Roster block injected into the classification system prompt.
    pub fn prompt_context(&self) -> String {
        self.members
            .iter()
            .filter(|member| member.id != UNASSIGNED_ID)
            .map(|member| format!("- {} ({}): {}", member.id, member.name, member.role))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directory_excludes_sentinel_from_assignables() {
        let directory = TeamDirectory::default();
        let ids = directory.assignable_ids();
        assert!(!ids.contains(&UNASSIGNED_ID.to_string()));
        assert_eq!(ids, vec!["mara", "jonas", "elena"]);
    }

    #[test]
    fn prompt_context_lists_roles() {
        let directory = TeamDirectory::default();
        let context = directory.prompt_context();
        assert!(context.contains("- mara (Mara): support"));
        assert!(context.contains("- elena (Elena): engineering"));
        assert!(!context.contains("unassigned"));
    }

    #[test]
    fn directory_parses_from_toml() {
        let raw = r#"
brand = "Acme Notes"

[[members]]
id = "pat"
name = "Pat"
email = "pat@acme.test"
role = "support"

[[members]]
id = "unassigned"
name = "Unassigned"
email = "help@acme.test"
role = "admin"
"#;
        let directory: TeamDirectory = toml::from_str(raw).expect("parse");
        assert_eq!(directory.brand, "Acme Notes");
        assert_eq!(directory.assignable_ids(), vec!["pat"]);
    }
}
