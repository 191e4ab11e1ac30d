//! Test suite descriptors.
//!
//! A suite is a JSON document named after the test group (`tests/<name>.json`):
//!
//! ```json
//! {
//!   "title": "Milestone 1",
//!   "tests": {
//!     "hello": {
//!       "title": "spawn hello",
//!       "modules": [["/armv8/sbin/hello", "arg"]],
//!       "timeout": 30,
//!       "teststeps": [
//!         { "action": "expect", "fail": ["unknown"], "pass": ["Hello, world"], "points": 5 }
//!       ]
//!     }
//!   }
//! }
//! ```
//!
//! Subtest order in the document is kept; it defines what `all` expands to.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::manifest::normalize_cmdline;

/// Errors produced while loading a suite descriptor.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("could not open test description '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse test description '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid subtest '{name}': {source}")]
    Subtest {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("subtest '{name}' has an invalid timeout ({value})")]
    InvalidTimeout { name: String, value: f64 },

    #[error("subtest '{name}' awards more than {} points in total", u32::MAX)]
    PointsOverflow { name: String },
}

/// A single scripted step, tagged by `action` in the descriptor.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TestStep {
    /// Sleep for a number of seconds.
    Wait { seconds: f64 },
    /// Wait for console output; a `pass` match earns `points`.
    Expect {
        fail: Vec<String>,
        pass: Vec<String>,
        points: u32,
    },
    /// Boot the target again and wait for the banner.
    Reboot,
    /// Type a string into the console.
    Input { value: String },
}

impl TestStep {
    /// Points this step can earn.
    pub fn points(&self) -> u32 {
        match self {
            TestStep::Expect { points, .. } => *points,
            _ => 0,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            TestStep::Wait { .. } => "wait",
            TestStep::Expect { .. } => "expect",
            TestStep::Reboot => "reboot",
            TestStep::Input { .. } => "input",
        }
    }
}

/// One independently scored scenario.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Subtest {
    pub title: String,
    /// Modules appended to the base manifest for this run.
    #[serde(default)]
    pub modules: Vec<Vec<String>>,
    /// Console timeout in seconds.
    #[serde(rename = "timeout")]
    pub timeout_secs: f64,
    #[serde(rename = "teststeps")]
    pub steps: Vec<TestStep>,
}

impl Subtest {
    /// Console timeout. Validated when the suite is loaded.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::ZERO)
    }

    /// The statically known point ceiling: sum of all `expect` points. Saturates; loaded suites never overflow.
    pub fn points_max(&self) -> u32 {
        self.steps.iter().map(TestStep::points).fold(0, u32::saturating_add)
    }

    fn checked_points_max(&self) -> Option<u32> {
        self.steps.iter().try_fold(0u32, |total, step| total.checked_add(step.points()))
    }
}

#[derive(Deserialize)]
struct RawSuite {
    title: String,
    tests: serde_json::Map<String, serde_json::Value>,
}

/// A loaded test group.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuite {
    pub title: String,
    subtests: Vec<(String, Subtest)>,
}

impl TestSuite {
    pub fn from_json(source: &str, path: &str) -> Result<Self, SuiteError> {
        let raw: RawSuite = serde_json::from_str(source).map_err(|source| SuiteError::Parse {
            path: path.to_string(),
            source,
        })?;

        let mut subtests = Vec::with_capacity(raw.tests.len());
        for (name, value) in raw.tests {
            let mut subtest: Subtest = serde_json::from_value(value).map_err(|source| SuiteError::Subtest {
                name: name.clone(),
                source,
            })?;
            if Duration::try_from_secs_f64(subtest.timeout_secs).is_err() {
                return Err(SuiteError::InvalidTimeout {
                    name,
                    value: subtest.timeout_secs,
                });
            }
            if subtest.checked_points_max().is_none() {
                return Err(SuiteError::PointsOverflow { name });
            }
            for cmdline in &mut subtest.modules {
                normalize_cmdline(cmdline);
            }
            subtests.push((name, subtest));
        }

        Ok(Self {
            title: raw.title,
            subtests,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Subtest> {
        self.subtests.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Subtest names in descriptor order.
    pub fn names(&self) -> Vec<String> {
        self.subtests.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Subtest)> {
        self.subtests.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn len(&self) -> usize {
        self.subtests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtests.is_empty()
    }
}

/// Read and parse a suite descriptor file.
pub fn load_suite(path: &Path) -> Result<TestSuite, SuiteError> {
    let display = path.display().to_string();
    let source = fs::read_to_string(path).map_err(|source| SuiteError::Io {
        path: display.clone(),
        source,
    })?;
    TestSuite::from_json(&source, &display)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUITE: &str = r#"{
        "title": "Milestone 1",
        "tests": {
            "zeta": {
                "title": "runs first",
                "modules": [["/armv8/sbin/hello", "a"]],
                "timeout": 2.5,
                "teststeps": [
                    { "action": "wait", "seconds": 1 },
                    { "action": "expect", "fail": ["bad"], "pass": ["good"], "points": 5 },
                    { "action": "reboot" },
                    { "action": "input", "value": "ls\n" },
                    { "action": "expect", "fail": [], "pass": ["done"], "points": 3 }
                ]
            },
            "alpha": {
                "title": "runs second",
                "timeout": 10,
                "teststeps": []
            }
        }
    }"#;

    #[test]
    fn test_parse_steps() {
        let suite = TestSuite::from_json(SUITE, "m1.json").unwrap();
        let zeta = suite.get("zeta").unwrap();
        assert_eq!(
            zeta.steps,
            vec![
                TestStep::Wait { seconds: 1.0 },
                TestStep::Expect {
                    fail: vec!["bad".to_string()],
                    pass: vec!["good".to_string()],
                    points: 5
                },
                TestStep::Reboot,
                TestStep::Input {
                    value: "ls\n".to_string()
                },
                TestStep::Expect {
                    fail: vec![],
                    pass: vec!["done".to_string()],
                    points: 3
                },
            ]
        );
        assert_eq!(zeta.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_document_order_is_kept() {
        let suite = TestSuite::from_json(SUITE, "m1.json").unwrap();
        assert_eq!(suite.names(), vec!["zeta".to_string(), "alpha".to_string()]);
        assert_eq!(suite.len(), 2);
    }

    #[test]
    fn test_subtest_modules_are_normalized() {
        let suite = TestSuite::from_json(SUITE, "m1.json").unwrap();
        assert_eq!(suite.get("zeta").unwrap().modules, vec![vec!["armv8/sbin/hello", "a"]]);
        assert!(suite.get("alpha").unwrap().modules.is_empty());
    }

    #[test]
    fn test_points_max() {
        let suite = TestSuite::from_json(SUITE, "m1.json").unwrap();
        assert_eq!(suite.get("zeta").unwrap().points_max(), 8);
        assert_eq!(suite.get("alpha").unwrap().points_max(), 0);
    }

    #[test]
    fn test_expect_requires_points() {
        let src = r#"{"title": "t", "tests": {"a": {"title": "a", "timeout": 1,
            "teststeps": [{"action": "expect", "fail": [], "pass": ["x"]}]}}}"#;
        let err = TestSuite::from_json(src, "t.json").unwrap_err();
        assert!(matches!(err, SuiteError::Subtest { ref name, .. } if name == "a"));
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let src = r#"{"title": "t", "tests": {"a": {"title": "a", "timeout": 1,
            "teststeps": [{"action": "dance"}]}}}"#;
        assert!(TestSuite::from_json(src, "t.json").is_err());
    }

    #[test]
    fn test_negative_timeout_is_rejected() {
        let src = r#"{"title": "t", "tests": {"a": {"title": "a", "timeout": -1, "teststeps": []}}}"#;
        let err = TestSuite::from_json(src, "t.json").unwrap_err();
        assert!(matches!(err, SuiteError::InvalidTimeout { .. }));
    }

    #[test]
    fn test_point_overflow_is_rejected() {
        let src = r#"{"title": "t", "tests": {"a": {"title": "a", "timeout": 1, "teststeps": [
            {"action": "expect", "fail": [], "pass": ["x"], "points": 4294967295},
            {"action": "expect", "fail": [], "pass": ["y"], "points": 1}]}}}"#;
        let err = TestSuite::from_json(src, "t.json").unwrap_err();
        assert!(matches!(err, SuiteError::PointsOverflow { ref name } if name == "a"));
    }

    #[test]
    fn test_points_max_saturates() {
        let expect = |points| TestStep::Expect {
            fail: vec![],
            pass: vec![],
            points,
        };
        let subtest = Subtest {
            title: "t".into(),
            modules: vec![],
            timeout_secs: 1.0,
            steps: vec![expect(u32::MAX), expect(7)],
        };
        assert_eq!(subtest.points_max(), u32::MAX);
    }

    #[test]
    fn test_huge_timeout_is_accepted() {
        let src = r#"{"title": "t", "tests": {"a": {"title": "a", "timeout": 1e19, "teststeps": []}}}"#;
        let suite = TestSuite::from_json(src, "t.json").unwrap();
        assert!(suite.get("a").unwrap().timeout() > Duration::from_secs(1_000_000_000));
    }

    #[test]
    fn test_malformed_document() {
        let err = TestSuite::from_json("{ not json", "broken.json").unwrap_err();
        assert!(err.to_string().starts_with("could not parse test description 'broken.json'"));
    }

    #[test]
    fn test_load_suite_missing_file() {
        let err = load_suite(Path::new("/nonexistent/suite.json")).unwrap_err();
        assert!(matches!(err, SuiteError::Io { .. }));
    }
}
