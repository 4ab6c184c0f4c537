//! Decision providers
//!
//! - [`PromptDecider`]: asks on a terminal (or any reader/writer pair)
//! - [`PolicyDecider`]: answers from a YAML policy file, for batch runs

use crate::ledger::{EnvValue, LedgerEntry};
use crate::resolver::{Choice, Decider};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{self, BufRead, Write};
use std::path::Path;

/// Interactive prompts.
///
/// End of input counts as "no" / skip, so a closed stdin migrates nothing.
pub struct PromptDecider<R, W> {
    input: R,
    output: W,
}

impl PromptDecider<io::StdinLock<'static>, io::Stdout> {
    /// Prompt on the process terminal
    pub fn stdio() -> Self {
        Self::new(io::stdin().lock(), io::stdout())
    }
}

impl<R: BufRead, W: Write> PromptDecider<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Print a prompt and read one trimmed line; `None` at end of input
    fn ask(&mut self, prompt: &str) -> io::Result<Option<String>> {
        write!(self.output, "{}", prompt)?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            writeln!(self.output)?;
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    /// Ask for the name of the secret to store the values under
    pub fn secret_name(&mut self) -> io::Result<Option<String>> {
        let name = self.ask("Enter the secret name to store these secrets: ")?;
        Ok(name.filter(|n| !n.is_empty()))
    }

    pub fn into_inner(self) -> (R, W) {
        (self.input, self.output)
    }
}

fn format_values(values: &BTreeSet<EnvValue>) -> String {
    let shown: Vec<String> = values
        .iter()
        .map(|v| match v {
            Some(value) => format!("{:?}", value),
            None => "<absent>".to_string(),
        })
        .collect();
    format!("[{}]", shown.join(", "))
}

impl<R: BufRead, W: Write> Decider for PromptDecider<R, W> {
    fn confirm(&mut self, name: &str, value: &str) -> io::Result<bool> {
        let prompt = format!(
            "Should env var '{}' (value: '{}') be stored as a secret? (y/n): ",
            name, value
        );
        let answer = self.ask(&prompt)?.unwrap_or_default().to_lowercase();
        Ok(matches!(answer.as_str(), "y" | "yes"))
    }

    fn choose(&mut self, name: &str, entry: &LedgerEntry) -> io::Result<Choice> {
        writeln!(
            self.output,
            "warning: Environment variable '{}' has conflicting values:",
            name
        )?;
        for (document, values) in &entry.documents {
            writeln!(self.output, "  In file {}: {}", document, format_values(values))?;
        }

        let prompt = format!(
            "Enter a single value to use for secret '{}' (or leave blank to skip): ",
            name
        );
        Ok(match self.ask(&prompt)? {
            Some(value) if !value.is_empty() => Choice::Value(value),
            _ => Choice::Skip,
        })
    }
}

/// Scripted answers loaded from YAML:
///
/// ```yaml
/// accept_all: false
/// secrets: [DB_PASSWORD, API_TOKEN]
/// values:
///   API_KEY: foo
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyDecider {
    /// Accept every variable with a consistent value
    #[serde(default)]
    pub accept_all: bool,

    /// Variables to accept when their value is consistent
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Canonical values for conflicting variables
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

impl PolicyDecider {
    /// Accept every consistent variable, skip every conflict
    pub fn accept_all() -> Self {
        Self {
            accept_all: true,
            ..Self::default()
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read policy from {:?}", path))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse policy from {:?}", path))
    }
}

impl Decider for PolicyDecider {
    fn confirm(&mut self, name: &str, _value: &str) -> io::Result<bool> {
        Ok(self.accept_all || self.secrets.iter().any(|s| s == name))
    }

    fn choose(&mut self, name: &str, _entry: &LedgerEntry) -> io::Result<Choice> {
        Ok(match self.values.get(name) {
            Some(value) => Choice::Value(value.clone()),
            None => Choice::Skip,
        })
    }
}
