//! Process predicates.

use std::path::Path;

use super::ProcessInfo;

/// How a [`Matcher`] compares its pattern against a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// The full executable path equals the pattern.
    PathEqual,
    /// The executable file name equals the pattern.
    ExecutableEqual,
    /// The full executable path contains the pattern.
    PathContains,
    /// The full executable path starts with the pattern.
    PathPrefix,
}

/// Selects live processes by executable path, optionally excluding one pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pattern: String,
    strategy: MatchStrategy,
    except_pid: Option<u32>,
}

impl Matcher {
    /// Create a matcher for `pattern` compared by `strategy`.
    pub fn new(pattern: impl Into<String>, strategy: MatchStrategy) -> Self {
        Self {
            pattern: pattern.into(),
            strategy,
            except_pid: None,
        }
    }

    /// Never match `pid`. Supervisors pass their own pid here.
    #[must_use]
    pub fn except_pid(mut self, pid: u32) -> Self {
        self.except_pid = Some(pid);
        self
    }

    /// The pattern being matched.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// The comparison in use.
    pub fn strategy(&self) -> MatchStrategy {
        self.strategy
    }

    /// Returns `true` if `process` is selected.
    ///
    /// Processes whose executable path is unknown only ever match
    /// [`MatchStrategy::ExecutableEqual`], via their reported name.
    pub fn matches(&self, process: &ProcessInfo) -> bool {
        if self.except_pid == Some(process.pid) {
            return false;
        }
        match self.strategy {
            MatchStrategy::ExecutableEqual => process.executable() == self.pattern,
            MatchStrategy::PathEqual => {
                path_str(process.path.as_deref()).is_some_and(|p| p == self.pattern)
            }
            MatchStrategy::PathContains => {
                path_str(process.path.as_deref()).is_some_and(|p| p.contains(&self.pattern))
            }
            MatchStrategy::PathPrefix => {
                path_str(process.path.as_deref()).is_some_and(|p| p.starts_with(&self.pattern))
            }
        }
    }
}

fn path_str(path: Option<&Path>) -> Option<&str> {
    path.and_then(Path::to_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn proc(pid: u32, path: &str) -> ProcessInfo {
        let path = PathBuf::from(path);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        ProcessInfo {
            pid,
            path: Some(path),
            name,
        }
    }

    #[test]
    fn path_equal() {
        let m = Matcher::new("/opt/app/bin/service", MatchStrategy::PathEqual);
        assert!(m.matches(&proc(10, "/opt/app/bin/service")));
        assert!(!m.matches(&proc(11, "/opt/app/bin/service2")));
        assert!(!m.matches(&proc(12, "/opt/other/bin/service")));
    }

    #[test]
    fn executable_equal() {
        let m = Matcher::new("service", MatchStrategy::ExecutableEqual);
        assert!(m.matches(&proc(10, "/opt/app/bin/service")));
        assert!(m.matches(&proc(11, "/usr/local/bin/service")));
        assert!(!m.matches(&proc(12, "/opt/app/bin/service-helper")));
    }

    #[test]
    fn path_contains() {
        let m = Matcher::new("app/bin/serv", MatchStrategy::PathContains);
        assert!(m.matches(&proc(10, "/opt/app/bin/service")));
        assert!(!m.matches(&proc(11, "/opt/app/lib/service")));
    }

    #[test]
    fn path_prefix() {
        let m = Matcher::new("/opt/app/", MatchStrategy::PathPrefix);
        assert!(m.matches(&proc(10, "/opt/app/bin/service")));
        assert!(!m.matches(&proc(11, "/srv/opt/app/bin/service")));
    }

    #[test]
    fn excluded_pid_never_matches() {
        let m = Matcher::new("/opt/app/bin/service", MatchStrategy::PathEqual).except_pid(10);
        assert!(!m.matches(&proc(10, "/opt/app/bin/service")));
        assert!(m.matches(&proc(11, "/opt/app/bin/service")));
    }

    #[test]
    fn unknown_path_matches_by_name_only() {
        let p = ProcessInfo {
            pid: 7,
            path: None,
            name: "service".to_owned(),
        };
        assert!(Matcher::new("service", MatchStrategy::ExecutableEqual).matches(&p));
        assert!(!Matcher::new("service", MatchStrategy::PathContains).matches(&p));
        assert!(!Matcher::new("", MatchStrategy::PathPrefix).matches(&p));
    }
}
