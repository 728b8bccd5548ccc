//! Declared result shapes of REST methods.
//!
//! List methods do not agree on where their rows live: `crm.deal.list`
//! returns them as the result itself, `tasks.task.list` wraps them in
//! `{"tasks": [...]}`. The registry maps method names to the shape they
//! are known to return instead of guessing from the payload.

use regex::Regex;
use serde_json::Value;

/// Where the useful part of a method's `result` lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    /// The result is the array of rows.
    List,
    /// The rows sit under a single key of the result object.
    Wrapped {
        /// Key holding the rows.
        key: String,
    },
    /// Unknown shape; the result is passed through unchanged.
    Raw,
}

impl ResponseShape {
    /// Shape wrapping its rows under `key`.
    #[must_use]
    pub fn wrapped(key: impl Into<String>) -> Self {
        Self::Wrapped { key: key.into() }
    }
}

static RAW: ResponseShape = ResponseShape::Raw;

const DEFAULT_RULES: &[(&str, &str)] = &[
    (r"^tasks\.task\.list$", "tasks"),
    (r"^crm\.item\.list$", "items"),
    (r"^catalog\.product\.list$", "products"),
    (r"^catalog\.section\.list$", "sections"),
    (r"^sale\.order\.list$", "orders"),
];

/// Method-name patterns mapped to result shapes.
///
/// Rules registered later take precedence over earlier ones, so custom
/// rules override the defaults. Methods matching no rule are [`ResponseShape::Raw`].
#[derive(Debug, Clone)]
pub struct ShapeRegistry {
    rules: Vec<(Regex, ResponseShape)>,
}

impl ShapeRegistry {
    /// Registry without rules.
    #[must_use]
    pub const fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Registry with the built-in rules for wrapped list methods.
    #[must_use]
    pub fn with_defaults() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(pattern, key)| {
                Regex::new(pattern)
                    .ok()
                    .map(|re| (re, ResponseShape::wrapped(*key)))
            })
            .collect();
        Self { rules }
    }

    /// Adds a rule.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regular expression.
    pub fn register(&mut self, pattern: &str, shape: ResponseShape) -> Result<(), regex::Error> {
        self.rules.push((Regex::new(pattern)?, shape));
        Ok(())
    }

    /// Shape declared for `method`.
    #[must_use]
    pub fn shape_of(&self, method: &str) -> &ResponseShape {
        self.rules
            .iter()
            .rev()
            .find(|(re, _)| re.is_match(method))
            .map_or(&RAW, |(_, shape)| shape)
    }

    /// Rows of one page returned by a list method.
    ///
    /// Arrays are spread into rows; any other value is a single row, and
    /// `null` none.
    #[must_use]
    pub fn rows(&self, method: &str, result: &Value) -> Vec<Value> {
        let rows = match self.shape_of(method) {
            ResponseShape::Wrapped { key } => result.get(key).unwrap_or(result),
            ResponseShape::List | ResponseShape::Raw => result,
        };
        match rows {
            Value::Array(items) => items.clone(),
            Value::Null => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Useful part of a single result.
    #[must_use]
    pub fn unwrap(&self, method: &str, result: Value) -> Value {
        match (self.shape_of(method), result) {
            (ResponseShape::Wrapped { key }, Value::Object(mut map)) if map.contains_key(key) => {
                map.remove(key).unwrap_or(Value::Null)
            }
            (_, result) => result,
        }
    }
}

impl Default for ShapeRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
