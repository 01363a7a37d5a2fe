/// Where unauthenticated visitors of protected views are sent
pub const HOME_PATH: &str = "/";

/// Views that require a signed-in user
const PROTECTED_PREFIXES: &[&str] = &["/profile"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Allow,
    Redirect(String),
}

pub struct RouteGuard;

impl RouteGuard {
    pub fn is_protected(path: &str) -> bool {
        let path = path.split(['?', '#']).next().unwrap_or_default();
        PROTECTED_PREFIXES.iter().any(|prefix| {
            path == *prefix
                || path
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    pub fn check(path: &str, is_authenticated: bool) -> RouteDecision {
        if is_authenticated || !Self::is_protected(path) {
            RouteDecision::Allow
        } else {
            RouteDecision::Redirect(HOME_PATH.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protected_paths() {
        assert!(RouteGuard::is_protected("/profile"));
        assert!(RouteGuard::is_protected("/profile/"));
        assert!(RouteGuard::is_protected("/profile/edit"));
        assert!(RouteGuard::is_protected("/profile?tab=security"));
        assert!(!RouteGuard::is_protected("/"));
        assert!(!RouteGuard::is_protected("/profiles"));
        assert!(!RouteGuard::is_protected("/login"));
    }

    #[test]
    fn test_check() {
        assert_eq!(RouteGuard::check("/profile", true), RouteDecision::Allow);
        assert_eq!(
            RouteGuard::check("/profile", false),
            RouteDecision::Redirect("/".to_string())
        );
        assert_eq!(RouteGuard::check("/", false), RouteDecision::Allow);
    }
}
