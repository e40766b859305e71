//! WebSocket upgrade origin check
//!
//! NIST 800-53: AC-4 (Information Flow Enforcement)
//! Implementation: The allowed origins come from `terminal.allowed_origins`
//! and travel with the router state into the upgrade handler

/// Which browser origins may open a terminal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OriginPolicy {
    /// Any origin, including none
    #[default]
    Any,
    /// Only these exact `Origin` header values
    AllowList(Vec<String>),
}

impl OriginPolicy {
    /// `"*"` anywhere in the list allows every origin
    pub fn from_allowed(origins: &[String]) -> Self {
        if origins.iter().any(|origin| origin == "*") {
            OriginPolicy::Any
        } else {
            OriginPolicy::AllowList(origins.to_vec())
        }
    }

    /// Requests without an `Origin` header come from non-browser clients and are permitted
    pub fn permits(&self, origin: Option<&str>) -> bool {
        match (self, origin) {
            (OriginPolicy::Any, _) | (_, None) => true,
            (OriginPolicy::AllowList(allowed), Some(origin)) => {
                allowed.iter().any(|candidate| candidate == origin)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_allows_everything() {
        let policy = OriginPolicy::from_allowed(&["https://a.example".to_string(), "*".to_string()]);
        assert_eq!(policy, OriginPolicy::Any);
        assert!(policy.permits(Some("https://evil.example")));
    }

    #[test]
    fn test_allow_list_matches_exactly() {
        let policy = OriginPolicy::from_allowed(&["https://ops.example.com".to_string()]);
        assert!(policy.permits(Some("https://ops.example.com")));
        assert!(!policy.permits(Some("https://ops.example.com:8443")));
        assert!(!policy.permits(Some("http://ops.example.com")));
        assert!(!policy.permits(Some("")));
    }

    #[test]
    fn test_missing_origin_is_permitted() {
        let policy = OriginPolicy::from_allowed(&["https://ops.example.com".to_string()]);
        assert!(policy.permits(None));
    }
}
