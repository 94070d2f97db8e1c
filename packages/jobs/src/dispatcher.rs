//! Routing of job names to pipelines.
//!
//! Rules map glob patterns (`*` matches any run of characters, anchored,
//! case-sensitive) to a pipeline. Exact patterns win over wildcards; among
//! wildcards the longest literal prefix wins, ties broken by pattern order.

use std::collections::{HashMap, HashSet};

use jobs_core::{Job, Options};

use crate::error::{ConfigError, RoutingError};

/// Where a job goes, plus the option defaults of the rule that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub pipeline: String,
    pub defaults: Option<Options>,
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    prefix_len: usize,
    pipeline: String,
    defaults: Options,
}

/// Compiled, immutable rule table.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    exact: HashMap<String, Rule>,
    wildcard: Vec<Rule>,
    pipelines: HashSet<String>,
}

impl Dispatcher {
    /// Compile `rules` against the set of known pipeline names.
    ///
    /// Each rule carries option defaults; `defaults.pipeline` names the
    /// target and is required.
    pub fn compile<I, P>(rules: I, pipelines: P) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, Options)>,
        P: IntoIterator<Item = String>,
    {
        let pipelines: HashSet<String> = pipelines.into_iter().collect();
        let mut exact = HashMap::new();
        let mut wildcard = Vec::new();

        for (pattern, mut defaults) in rules {
            if pattern.is_empty() {
                return Err(ConfigError::InvalidPattern {
                    pattern,
                    reason: "pattern is empty".into(),
                });
            }
            let Some(pipeline) = defaults.pipeline.take() else {
                return Err(ConfigError::InvalidPattern {
                    pattern,
                    reason: "rule has no target pipeline".into(),
                });
            };
            if !pipelines.contains(&pipeline) {
                return Err(ConfigError::UnknownPipeline {
                    context: format!("dispatch rule '{}'", pattern),
                    pipeline,
                });
            }

            let rule = Rule {
                prefix_len: pattern.find('*').unwrap_or(pattern.len()),
                pattern,
                pipeline,
                defaults,
            };
            if rule.pattern.contains('*') {
                wildcard.push(rule);
            } else {
                exact.insert(rule.pattern.clone(), rule);
            }
        }

        wildcard.sort_by(|a, b| {
            b.prefix_len
                .cmp(&a.prefix_len)
                .then_with(|| a.pattern.cmp(&b.pattern))
        });

        Ok(Self {
            exact,
            wildcard,
            pipelines,
        })
    }

    /// Resolve the pipeline for `job`. Pure; safe to call concurrently.
    pub fn resolve(&self, job: &Job) -> Result<Route, RoutingError> {
        if let Some(pipeline) = &job.options.pipeline {
            if !self.pipelines.contains(pipeline) {
                return Err(RoutingError::UnknownPipeline {
                    job: job.name.clone(),
                    pipeline: pipeline.clone(),
                });
            }
            return Ok(Route {
                pipeline: pipeline.clone(),
                defaults: None,
            });
        }

        self.matching(&job.name)
            .map(|rule| Route {
                pipeline: rule.pipeline.clone(),
                defaults: Some(rule.defaults.clone()),
            })
            .ok_or_else(|| RoutingError::NoMatch {
                job: job.name.clone(),
            })
    }

    fn matching(&self, name: &str) -> Option<&Rule> {
        if let Some(rule) = self.exact.get(name) {
            return Some(rule);
        }
        self.wildcard
            .iter()
            .find(|rule| glob_match(&rule.pattern, name))
    }

    /// Number of compiled rules.
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anchored glob match where `*` matches any (possibly empty) run.
fn glob_match(pattern: &str, name: &str) -> bool {
    let p = pattern.as_bytes();
    let n = name.as_bytes();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ni));
            pi += 1;
        } else if pi < p.len() && p[pi] == n[ni] {
            pi += 1;
            ni += 1;
        } else if let Some((sp, sn)) = star {
            // backtrack: let the last star swallow one more byte
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&b| b == b'*')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, pipeline: &str) -> (String, Options) {
        (pattern.to_string(), Options::default().with_pipeline(pipeline))
    }

    fn dispatcher(rules: Vec<(String, Options)>) -> Result<Dispatcher, ConfigError> {
        Dispatcher::compile(
            rules,
            ["default", "mail", "exact", "other"].map(String::from),
        )
    }

    #[test]
    fn glob_semantics() {
        assert!(glob_match("app-*", "app-send-mail"));
        assert!(glob_match("app-*", "app-"));
        assert!(glob_match("*mail", "app-send-mail"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(glob_match("*", ""));
        assert!(!glob_match("app-*", "App-send"));
        assert!(!glob_match("app", "app-send"));
        assert!(!glob_match("a*b", "aXXbYYc"));
        assert!(glob_match(
            "spiral-jobs-tests-local-*.pipeline",
            "spiral-jobs-tests-local-job.pipeline"
        ));
    }

    #[test]
    fn exact_beats_wildcard_and_longest_prefix_wins() -> Result<(), Box<dyn std::error::Error>> {
        let d = dispatcher(vec![
            rule("app-*", "default"),
            rule("app-send-*", "mail"),
            rule("app-send-mail", "exact"),
            rule("*", "other"),
        ])?;

        let route = |name: &str| d.resolve(&Job::new(name, "")).map(|r| r.pipeline);
        assert_eq!(route("app-send-mail")?, "exact");
        assert_eq!(route("app-send-sms")?, "mail");
        assert_eq!(route("app-report")?, "default");
        assert_eq!(route("billing")?, "other");
        Ok(())
    }

    #[test]
    fn resolution_is_deterministic() -> Result<(), Box<dyn std::error::Error>> {
        let d = dispatcher(vec![rule("a*", "default"), rule("a*z", "mail")])?;
        let job = Job::new("abcz", "");
        let first = d.resolve(&job)?;
        for _ in 0..16 {
            assert_eq!(d.resolve(&job)?, first);
        }
        // equal literal prefix: lexical pattern order decides
        assert_eq!(first.pipeline, "default");
        Ok(())
    }

    #[test]
    fn explicit_pipeline_overrides_rules() -> Result<(), Box<dyn std::error::Error>> {
        let d = dispatcher(vec![rule("app-*", "default")])?;
        let job = Job::new("app-send-mail", "")
            .with_options(Options::default().with_pipeline("mail"));
        let route = d.resolve(&job)?;
        assert_eq!(route.pipeline, "mail");
        assert_eq!(route.defaults, None);

        let unknown = Job::new("app-send-mail", "")
            .with_options(Options::default().with_pipeline("nowhere"));
        assert!(matches!(
            d.resolve(&unknown),
            Err(RoutingError::UnknownPipeline { .. })
        ));
        Ok(())
    }

    #[test]
    fn unmatched_name_is_a_routing_error() -> Result<(), Box<dyn std::error::Error>> {
        let d = dispatcher(vec![rule("app-*", "default")])?;
        assert_eq!(
            d.resolve(&Job::new("billing", "")),
            Err(RoutingError::NoMatch {
                job: "billing".into()
            })
        );
        Ok(())
    }

    #[test]
    fn rule_defaults_are_returned() -> Result<(), Box<dyn std::error::Error>> {
        let d = dispatcher(vec![(
            "app-*".to_string(),
            Options::default().with_pipeline("default").with_retries(3, 10),
        )])?;
        let route = d.resolve(&Job::new("app-x", ""))?;
        let defaults = route.defaults.unwrap_or_default();
        assert_eq!(defaults.max_attempts, 3);
        assert_eq!(defaults.pipeline, None);
        Ok(())
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert!(matches!(
            dispatcher(vec![rule("", "default")]),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(matches!(
            dispatcher(vec![("app-*".to_string(), Options::default())]),
            Err(ConfigError::InvalidPattern { .. })
        ));
        assert!(matches!(
            dispatcher(vec![rule("app-*", "missing")]),
            Err(ConfigError::UnknownPipeline { .. })
        ));
    }
}
