//! Tunnel display names
//!
//! A tunnel is named after the remote alias when one exists, otherwise after a
//! name synthesized from its instance ID. Once a tunnel has a name, a
//! synthesized name never replaces it.

/// Prefix of synthesized names
pub const GENERATED_PREFIX: &str = "auto-";

/// Name synthesized for an instance without an alias
pub fn generated_name(instance_id: &str) -> String {
    format!("{}{}", GENERATED_PREFIX, instance_id)
}

/// Whether `name` is the synthesized name of `instance_id`
pub fn is_generated_name(name: &str, instance_id: &str) -> bool {
    name.strip_prefix(GENERATED_PREFIX) == Some(instance_id)
}

/// Current name of a stored tunnel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameState {
    pub name: String,
    pub generated: bool,
}

impl NameState {
    pub fn new(name: impl Into<String>, generated: bool) -> Self {
        Self {
            name: name.into(),
            generated,
        }
    }
}

/// Decide the name a tunnel should carry after applying a remote report.
///
/// Returns `None` when the stored name must be left untouched.
pub fn resolve_name(
    existing: Option<&NameState>,
    alias: Option<&str>,
    instance_id: &str,
) -> Option<NameState> {
    let alias = alias.map(str::trim).filter(|alias| !alias.is_empty());

    match (existing, alias) {
        (None, Some(alias)) => Some(NameState::new(alias, false)),
        (None, None) => Some(NameState::new(generated_name(instance_id), true)),
        (Some(current), Some(alias)) if current.generated || current.name != alias => {
            Some(NameState::new(alias, false))
        }
        (Some(_), _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tunnel_without_alias_gets_generated_name() {
        let state = resolve_name(None, None, "a1b2").unwrap();
        assert_eq!(state.name, "auto-a1b2");
        assert!(state.generated);

        let state = resolve_name(None, Some("   "), "a1b2").unwrap();
        assert_eq!(state.name, "auto-a1b2");
    }

    #[test]
    fn test_new_tunnel_with_alias() {
        let state = resolve_name(None, Some("web"), "a1b2").unwrap();
        assert_eq!(state, NameState::new("web", false));
    }

    #[test]
    fn test_alias_replaces_generated_name() {
        let current = NameState::new("auto-a1b2", true);
        let state = resolve_name(Some(&current), Some("db"), "a1b2").unwrap();
        assert_eq!(state.name, "db");
        assert!(!state.generated);
    }

    #[test]
    fn test_missing_alias_never_downgrades() {
        let current = NameState::new("db", false);
        assert_eq!(resolve_name(Some(&current), None, "a1b2"), None);
        assert_eq!(resolve_name(Some(&current), Some(""), "a1b2"), None);

        let generated = NameState::new("auto-a1b2", true);
        assert_eq!(resolve_name(Some(&generated), None, "a1b2"), None);
    }

    #[test]
    fn test_same_alias_is_a_no_op() {
        let current = NameState::new("db", false);
        assert_eq!(resolve_name(Some(&current), Some("db"), "a1b2"), None);
    }

    #[test]
    fn test_is_generated_name() {
        assert!(is_generated_name("auto-a1b2", "a1b2"));
        assert!(!is_generated_name("auto-a1b2", "zzz"));
        assert!(!is_generated_name("web", "a1b2"));
    }
}
