//! Declarative test execution.
//!
//! Test files are YAML documents with a description and an ordered list of
//! steps. Each step is either a `prompt` (send a message, tools may run) or
//! an `assert` (judge a claim against the execution ledger). The runner
//! executes steps in order, absorbs per-step failures, and reports a
//! pass/fail summary across the suite.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::client::TestClient;
use crate::session::AssertionVerdict;

const GREEN: &str = "\x1b[32m";
const RED: &str = "\x1b[31m";
const RESET: &str = "\x1b[0m";

/// One parsed test file.
#[derive(Debug, Clone, Deserialize)]
pub struct TestFile {
    pub description: String,
    pub steps: Vec<TestStep>,
}

/// A single step. Exactly one of `prompt` or `assert` must be set; a step
/// with neither or both is recorded as a failure without touching the client.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestStep {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub assert: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Prompt,
    Assert,
    Invalid,
}

/// Outcome of one executed (or rejected) step.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub step_index: usize,
    pub step_type: StepType,
    pub input: String,
    pub response: Option<String>,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub assertion: Option<AssertionVerdict>,
}

/// Outcome of one test file.
#[derive(Debug, Clone, Serialize)]
pub struct TestResult {
    pub file: PathBuf,
    pub description: String,
    pub steps: Vec<StepResult>,
    pub passed: bool,
    pub duration_ms: u64,
}

/// List `*.test.yaml` files directly inside `dir`, sorted by path.
/// Not recursive.
pub fn find_test_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read test directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_test_file = path.is_file()
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(".test.yaml"));
        if is_test_file {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn load_test_file(path: &Path) -> Result<TestFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read test file {}", path.display()))?;
    serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse test file {}", path.display()))
}

/// Drives a [`TestClient`] through test files, one at a time.
pub struct TestRunner<'a> {
    client: &'a mut TestClient,
}

impl<'a> TestRunner<'a> {
    pub fn new(client: &'a mut TestClient) -> Self {
        Self { client }
    }

    /// Run one parsed test file. Step failures are absorbed so later steps
    /// still run; the file passes only if every step succeeded.
    pub async fn run_test(&mut self, path: &Path, test: &TestFile) -> TestResult {
        println!("\nRunning: {}", test.description);
        println!("  File: {}", path.display());
        println!("  Steps: {}", test.steps.len());
        println!("{}", "─".repeat(60));

        let start = Instant::now();
        let mut steps = Vec::with_capacity(test.steps.len());

        for (index, step) in test.steps.iter().enumerate() {
            let result = self.run_step(index, step).await;
            print_step(&result);
            steps.push(result);
        }

        let passed = steps.iter().all(|s| s.success);
        TestResult {
            file: path.to_path_buf(),
            description: test.description.clone(),
            steps,
            passed,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run_step(&mut self, index: usize, step: &TestStep) -> StepResult {
        let start = Instant::now();
        let mut result = StepResult {
            step_index: index,
            step_type: StepType::Invalid,
            input: String::new(),
            response: None,
            success: false,
            error: None,
            duration_ms: 0,
            assertion: None,
        };

        match (&step.prompt, &step.assert) {
            (Some(prompt), None) => {
                result.step_type = StepType::Prompt;
                result.input = prompt.clone();
                match self.client.prompt(prompt).await {
                    Ok(response) => {
                        result.success = true;
                        result.response = Some(response.text);
                    }
                    Err(e) => result.error = Some(format!("{e:#}")),
                }
            }
            (None, Some(assertion)) => {
                result.step_type = StepType::Assert;
                result.input = assertion.clone();
                match self.client.assert(assertion).await {
                    Ok(verdict) => {
                        result.success = verdict.passed;
                        if !verdict.passed {
                            result.error = Some(verdict.reasoning.clone());
                        }
                        result.assertion = Some(verdict);
                    }
                    Err(e) => result.error = Some(format!("{e:#}")),
                }
            }
            _ => {
                result.error =
                    Some("step must have exactly one of 'prompt' or 'assert'".to_string());
            }
        }

        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Run every file in order, continuing past failures, and print a
    /// suite summary. Files that fail to load are recorded as failed.
    pub async fn run_all(&mut self, files: &[PathBuf]) -> Vec<TestResult> {
        let mut results = Vec::with_capacity(files.len());

        for path in files {
            match load_test_file(path) {
                Ok(test) => results.push(self.run_test(path, &test).await),
                Err(e) => {
                    println!("{RED}✗ {}: {e:#}{RESET}", path.display());
                    results.push(TestResult {
                        file: path.clone(),
                        description: String::new(),
                        steps: Vec::new(),
                        passed: false,
                        duration_ms: 0,
                    });
                }
            }
        }

        let passed = results.iter().filter(|r| r.passed).count();
        let failed = results.len() - passed;
        println!("\n{}", "=".repeat(60));
        if failed == 0 {
            println!("{GREEN}Results: {passed}/{} tests passed{RESET}", results.len());
        } else {
            println!("{RED}Results: {passed}/{} tests passed{RESET}", results.len());
        }

        results
    }
}

fn print_step(result: &StepResult) {
    let label = match result.step_type {
        StepType::Prompt => "prompt",
        StepType::Assert => "assert",
        StepType::Invalid => "invalid",
    };
    if result.success {
        println!(
            "  {GREEN}✓{RESET} step {} ({label}) {}ms",
            result.step_index + 1,
            result.duration_ms
        );
    } else {
        println!(
            "  {RED}✗{RESET} step {} ({label}) {}ms",
            result.step_index + 1,
            result.duration_ms
        );
        if let Some(error) = &result.error {
            println!("    └─ {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LlmConfig, ResolvedConfig};
    use indexmap::IndexMap;

    fn disconnected_client() -> TestClient {
        TestClient::new(ResolvedConfig {
            llm: LlmConfig {
                provider: "anthropic".to_string(),
                model: "claude-sonnet-4-20250514".to_string(),
                api_key: "test-key".to_string(),
            },
            servers: IndexMap::new(),
        })
    }

    #[tokio::test]
    async fn test_invalid_steps_fail_without_reaching_client() {
        let mut client = disconnected_client();
        let mut runner = TestRunner::new(&mut client);

        let neither = TestStep { prompt: None, assert: None };
        let both = TestStep {
            prompt: Some("roll".to_string()),
            assert: Some("it rolled".to_string()),
        };

        for step in [neither, both] {
            let result = runner.run_step(0, &step).await;
            assert_eq!(result.step_type, StepType::Invalid);
            assert!(!result.success);
            assert_eq!(
                result.error.as_deref(),
                Some("step must have exactly one of 'prompt' or 'assert'")
            );
        }
    }

    #[tokio::test]
    async fn test_step_errors_are_absorbed_and_suite_continues() {
        let mut client = disconnected_client();
        let mut runner = TestRunner::new(&mut client);

        // Client is never connected, so both steps error; the file still
        // produces a full result instead of aborting.
        let test = TestFile {
            description: "offline".to_string(),
            steps: vec![
                TestStep { prompt: Some("hello".to_string()), assert: None },
                TestStep { prompt: None, assert: Some("it said hello".to_string()) },
            ],
        };
        let result = runner.run_test(Path::new("offline.test.yaml"), &test).await;

        assert!(!result.passed);
        assert_eq!(result.steps.len(), 2);
        assert!(result.steps.iter().all(|s| !s.success));
        assert!(result.steps[0]
            .error
            .as_deref()
            .is_some_and(|e| e.contains("not connected")));
    }

    #[test]
    fn test_find_test_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.test.yaml", "a.test.yaml", "notes.yaml", "c.test.yml"] {
            std::fs::write(dir.path().join(name), "description: x\nsteps: []\n").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.test.yaml.d")).unwrap();

        let files = find_test_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.test.yaml", "b.test.yaml"]);
    }

    #[test]
    fn test_find_test_files_missing_dir_errors() {
        let err = find_test_files(Path::new("/nonexistent/mcptest-suite")).unwrap_err();
        assert!(err.to_string().contains("failed to read test directory"));
    }

    #[test]
    fn test_load_test_file_parses_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dice.test.yaml");
        std::fs::write(
            &path,
            "description: Dice rolling\nsteps:\n  - prompt: Roll a d6\n  - assert: a dice tool was called\n",
        )
        .unwrap();

        let test = load_test_file(&path).unwrap();
        assert_eq!(test.description, "Dice rolling");
        assert_eq!(test.steps.len(), 2);
        assert_eq!(test.steps[0].prompt.as_deref(), Some("Roll a d6"));
        assert_eq!(test.steps[1].assert.as_deref(), Some("a dice tool was called"));
    }

    #[test]
    fn test_load_test_file_rejects_unknown_step_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.test.yaml");
        std::fs::write(&path, "description: x\nsteps:\n  - promt: oops\n").unwrap();

        assert!(load_test_file(&path).is_err());
    }
}
