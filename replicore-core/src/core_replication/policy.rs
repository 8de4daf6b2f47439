/*
    policy.rs - Conflict resolution policies

    The policy decides how a conflict set collapses into one version:
    - None: leave conflicts for a human to resolve
    - ResolveToLatest: newest last-modified wins
    - ResolveToTombstone: deletion wins when present
    - ScriptByCollection: a user script per collection decides
*/

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Resolution policy, replaceable at runtime
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResolutionPolicy {
    #[default]
    None,
    ResolveToLatest,
    ResolveToTombstone,
    ScriptByCollection {
        /// collection name -> script id
        #[serde(default)]
        scripts: BTreeMap<String, String>,
    },
}

impl ResolutionPolicy {
    pub fn script_by_collection<I, C, S>(scripts: I) -> Self
    where
        I: IntoIterator<Item = (C, S)>,
        C: Into<String>,
        S: Into<String>,
    {
        ResolutionPolicy::ScriptByCollection {
            scripts: scripts.into_iter().map(|(c, s)| (c.into(), s.into())).collect(),
        }
    }

    /// Resolution leaves the lock while an external script runs
    pub fn requires_sandbox(&self) -> bool {
        matches!(self, ResolutionPolicy::ScriptByCollection { .. })
    }

    /// Script id configured for `collection`
    pub fn script_for(&self, collection: &str) -> Option<&str> {
        match self {
            ResolutionPolicy::ScriptByCollection { scripts } => scripts.get(collection).map(String::as_str),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResolutionPolicy::None => "none",
            ResolutionPolicy::ResolveToLatest => "resolve_to_latest",
            ResolutionPolicy::ResolveToTombstone => "resolve_to_tombstone",
            ResolutionPolicy::ScriptByCollection { .. } => "script_by_collection",
        }
    }
}

impl fmt::Display for ResolutionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_manual() {
        assert_eq!(ResolutionPolicy::default(), ResolutionPolicy::None);
        assert!(!ResolutionPolicy::default().requires_sandbox());
    }

    #[test]
    fn test_script_lookup() {
        let policy = ResolutionPolicy::script_by_collection([("Users", "merge-users")]);
        assert!(policy.requires_sandbox());
        assert_eq!(policy.script_for("Users"), Some("merge-users"));
        assert_eq!(policy.script_for("Orders"), None);
        assert_eq!(ResolutionPolicy::ResolveToLatest.script_for("Users"), None);
    }

    #[test]
    fn test_toml_shape() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: ResolutionPolicy,
        }

        let parsed: Wrapper = toml::from_str(
            r#"
            [policy]
            kind = "script_by_collection"
            scripts = { Users = "merge-users" }
            "#,
        )
        .unwrap();
        assert_eq!(parsed.policy.script_for("Users"), Some("merge-users"));

        let latest: Wrapper = toml::from_str("policy = { kind = \"resolve_to_latest\" }").unwrap();
        assert_eq!(latest.policy, ResolutionPolicy::ResolveToLatest);
    }

    #[test]
    fn test_display_uses_name() {
        assert_eq!(ResolutionPolicy::ResolveToTombstone.to_string(), "resolve_to_tombstone");
    }
}
