use std::collections::HashMap;
use std::fmt;

use crate::diagnostics::SourceLocation;
use crate::index::{IndexClass, IndexValue};

/// Per-rule unrolling annotation, aggregated over every rule a line
/// touches before the policy decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnrollBehaviour {
    #[default]
    Allow,
    Force,
    Prevent,
}

/// Replacement function evaluated once per line, before any concrete
/// index assignment is chosen.
pub type PreFn = Box<dyn Fn(&[String]) -> Result<String, String>>;

/// Replacement function evaluated once per assignment, after index
/// values have been substituted into the surrounding text.
pub type PostFn = Box<dyn Fn(&[String]) -> Result<String, String>>;

/// Replacement function requiring the concrete values of the indices
/// attached to the invocation, in suffix order.
pub type IndexFn = Box<dyn Fn(&[String], &[IndexValue]) -> Result<String, String>>;

/// The three evaluation phases a rule can belong to.
pub enum RuleBody {
    Pre(PreFn),
    Post(PostFn),
    Index {
        /// Range class of the labels introduced through this rule's
        /// suffix; overrides the letter convention.
        class: IndexClass,
        body: IndexFn,
    },
}

impl fmt::Debug for RuleBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleBody::Pre(_) => write!(f, "Pre"),
            RuleBody::Post(_) => write!(f, "Post"),
            RuleBody::Index { class, .. } => write!(f, "Index({:?})", class),
        }
    }
}

/// A named, parameterized text-substitution rule.
#[derive(Debug)]
pub struct ReplacementRule {
    pub name: String,
    pub args_expected: usize,
    pub unroll: UnrollBehaviour,
    pub declared_at: SourceLocation,
    pub body: RuleBody,
}

impl ReplacementRule {
    pub fn pre(
        name: impl Into<String>,
        args_expected: usize,
        body: impl Fn(&[String]) -> Result<String, String> + 'static,
    ) -> Self {
        ReplacementRule {
            name: name.into(),
            args_expected,
            unroll: UnrollBehaviour::Allow,
            declared_at: SourceLocation::default(),
            body: RuleBody::Pre(Box::new(body)),
        }
    }

    pub fn post(
        name: impl Into<String>,
        args_expected: usize,
        body: impl Fn(&[String]) -> Result<String, String> + 'static,
    ) -> Self {
        ReplacementRule {
            name: name.into(),
            args_expected,
            unroll: UnrollBehaviour::Allow,
            declared_at: SourceLocation::default(),
            body: RuleBody::Post(Box::new(body)),
        }
    }

    pub fn index(
        name: impl Into<String>,
        args_expected: usize,
        class: IndexClass,
        body: impl Fn(&[String], &[IndexValue]) -> Result<String, String> + 'static,
    ) -> Self {
        ReplacementRule {
            name: name.into(),
            args_expected,
            unroll: UnrollBehaviour::Allow,
            declared_at: SourceLocation::default(),
            body: RuleBody::Index {
                class,
                body: Box::new(body),
            },
        }
    }

    pub fn with_unroll(mut self, unroll: UnrollBehaviour) -> Self {
        self.unroll = unroll;
        self
    }

    pub fn with_location(mut self, declared_at: SourceLocation) -> Self {
        self.declared_at = declared_at;
        self
    }

    /// Whether this rule's invocations must carry an index suffix.
    pub fn wants_indices(&self) -> bool {
        matches!(self.body, RuleBody::Index { .. })
    }
}

/// Registry of replacement rules and of the named boolean flags `$IF`
/// directives consult.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<String, ReplacementRule>,
    flags: HashMap<String, bool>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        RuleRegistry::default()
    }

    /// Register a rule, replacing any previous rule of the same name.
    pub fn define(&mut self, rule: ReplacementRule) {
        self.rules.insert(rule.name.clone(), rule);
    }

    pub fn get(&self, name: &str) -> Option<&ReplacementRule> {
        self.rules.get(name)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn set_flag(&mut self, name: impl Into<String>, value: bool) {
        self.flags.insert(name.into(), value);
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }
}
