//! Pipeline input settings.
//!
//! Each pipeline parameter holds an [`InputValue`]: a literal, a file
//! reference, or a list of those. A list-valued parameter fans out into
//! parallel jobs inside a single workflow.

use crate::error::{Result, VipError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parameter values sent for one job, already rendered as strings.
pub type JobParameters = BTreeMap<String, String>;

/// A single pipeline parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InputValue {
    /// Any non-file value, passed verbatim.
    Literal(String),
    /// A file reference. Relative paths are resolved against the session's
    /// input locations when the workflow is submitted.
    File(PathBuf),
    /// Fan-out: one job per element. Elements may not be lists themselves.
    List(Vec<InputValue>),
}

impl InputValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal(value.into())
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn list<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<InputValue>,
    {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    /// Number of fan-out elements, or `None` for a scalar value.
    pub fn fan_out_len(&self) -> Option<usize> {
        match self {
            Self::List(items) => Some(items.len()),
            _ => None,
        }
    }

    /// All file references contained in this value.
    pub fn files(&self) -> Vec<&Path> {
        match self {
            Self::Literal(_) => Vec::new(),
            Self::File(path) => vec![path.as_path()],
            Self::List(items) => items.iter().flat_map(|v| v.files()).collect(),
        }
    }

    /// Reads every literal as a file reference. Used for parameters that the
    /// pipeline declares as files.
    pub fn as_file_references(&self) -> InputValue {
        match self {
            Self::Literal(s) => Self::File(PathBuf::from(s)),
            Self::File(path) => Self::File(path.clone()),
            Self::List(items) => Self::List(items.iter().map(|v| v.as_file_references()).collect()),
        }
    }

    fn check(&self, name: &str) -> Result<()> {
        match self {
            Self::Literal(s) => check_text(name, s),
            Self::File(path) => check_text(name, &path.to_string_lossy()),
            Self::List(items) => {
                if items.is_empty() {
                    return Err(VipError::invalid_input(format!(
                        "parameter '{}' is an empty list",
                        name
                    )));
                }
                for item in items {
                    if matches!(item, Self::List(_)) {
                        return Err(VipError::invalid_input(format!(
                            "parameter '{}' contains a nested list",
                            name
                        )));
                    }
                    item.check(name)?;
                }
                Ok(())
            }
        }
    }

    fn render_at<F>(&self, index: usize, resolve: &F) -> Result<String>
    where
        F: Fn(&Path) -> Result<String>,
    {
        match self {
            Self::Literal(s) => Ok(s.clone()),
            Self::File(path) => resolve(path),
            Self::List(items) => match items.get(index) {
                Some(item) => item.render_at(0, resolve),
                None => Err(VipError::invalid_input(format!(
                    "list has no element at index {}",
                    index
                ))),
            },
        }
    }
}

impl From<&str> for InputValue {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl From<String> for InputValue {
    fn from(value: String) -> Self {
        Self::Literal(value)
    }
}

impl From<PathBuf> for InputValue {
    fn from(value: PathBuf) -> Self {
        Self::File(value)
    }
}

impl From<&Path> for InputValue {
    fn from(value: &Path) -> Self {
        Self::File(value.to_path_buf())
    }
}

impl<V: Into<InputValue>> From<Vec<V>> for InputValue {
    fn from(values: Vec<V>) -> Self {
        Self::list(values)
    }
}

/// Characters accepted by the platform in parameter values.
fn is_valid_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || " .,-+@/_():[]?&=".contains(c)
}

fn check_text(name: &str, text: &str) -> Result<()> {
    if text.is_empty() {
        return Err(VipError::invalid_input(format!(
            "parameter '{}' contains an empty value",
            name
        )));
    }
    let mut invalid: Vec<char> = text.chars().filter(|c| !is_valid_char(*c)).collect();
    if !invalid.is_empty() {
        invalid.sort_unstable();
        invalid.dedup();
        let listed: Vec<String> = invalid.iter().map(|c| format!("'{}'", c)).collect();
        return Err(VipError::invalid_input(format!(
            "parameter '{}' contains invalid character(s): {}",
            name,
            listed.join(", ")
        )));
    }
    Ok(())
}

/// The full parameter set of a session, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InputSettings(BTreeMap<String, InputValue>);

impl InputSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<InputValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&InputValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &InputValue)> {
        self.0.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rewrites every value through `f`, which receives the parameter name.
    pub fn map_values<F>(&self, f: F) -> InputSettings
    where
        F: Fn(&str, &InputValue) -> InputValue,
    {
        Self(
            self.0
                .iter()
                .map(|(k, v)| (k.clone(), f(k, v)))
                .collect(),
        )
    }

    /// Checks every value and the consistency of list lengths.
    pub fn validate(&self) -> Result<()> {
        if self.0.is_empty() {
            return Err(VipError::invalid_input("no parameter is defined"));
        }
        for (name, value) in &self.0 {
            value.check(name)?;
        }
        self.fan_out_width().map(|_| ())
    }

    /// Number of parallel jobs described by these settings.
    ///
    /// Every list-valued parameter must have the same length; scalars are
    /// broadcast to every job. Settings without lists describe one job.
    pub fn fan_out_width(&self) -> Result<usize> {
        let mut width: Option<(usize, &str)> = None;
        for (name, value) in &self.0 {
            let Some(len) = value.fan_out_len() else {
                continue;
            };
            match width {
                None => width = Some((len, name.as_str())),
                Some((expected, first)) if expected != len => {
                    return Err(VipError::invalid_input(format!(
                        "list parameters have mismatched lengths: '{}' has {} values, '{}' has {}",
                        first, expected, name, len
                    )));
                }
                Some(_) => {}
            }
        }
        Ok(width.map(|(len, _)| len).unwrap_or(1))
    }

    /// Expands the settings into one parameter map per job.
    ///
    /// `resolve` renders a file reference into the string the remote side
    /// expects (usually an absolute remote path).
    pub fn fan_out<F>(&self, resolve: F) -> Result<Vec<JobParameters>>
    where
        F: Fn(&Path) -> Result<String>,
    {
        let width = self.fan_out_width()?;
        (0..width)
            .map(|index| {
                self.0
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), value.render_at(index, &resolve)?)))
                    .collect::<Result<JobParameters>>()
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<InputValue>> FromIterator<(K, V)> for InputSettings {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
