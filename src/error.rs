use thiserror::Error;

/// Structured failures raised while expanding one template line.
///
/// The macro agent is the recovery boundary: it reports these through
/// the diagnostic sink, anchored to a byte range of the original line,
/// and the translation pass continues with the next line.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExpansionError {
    #[error("could not tokenize template text: {0}")]
    Parse(String),

    #[error("duplicate declaration of index '{label}' with a conflicting range class")]
    DuplicateIndex { label: char, offset: usize },

    #[error("index '{label}' is declared inconsistently on the two sides of the assignment")]
    IndexMismatch { label: char },

    #[error("index '{label}' is bound but nothing in scope binds it")]
    DanglingIndex { label: char },

    #[error("directive cannot be combined with an assignment")]
    DirectiveOnRhs,

    #[error("directive must stand alone on its line")]
    DirectiveNotAlone,

    #[error("'{0}' directive without an open $IF block")]
    UnbalancedDirective(String),

    #[error("'force' and 'prevent' unroll annotations are irreconcilable (force: {force:?}, prevent: {prevent:?})")]
    IrreconcilableUnroll {
        force: Vec<String>,
        prevent: Vec<String>,
    },

    #[error("'prevent' unroll annotation is incompatible with fast mode (prevent: {prevent:?})")]
    PreventWithFastMode { prevent: Vec<String> },

    #[error("rule '{rule}' expects {expected} argument(s), found {found}")]
    ArgumentCount {
        rule: String,
        expected: usize,
        found: usize,
    },

    #[error("rule '{rule}' requires an index suffix")]
    MissingIndexSuffix { rule: String },

    #[error("rule '{rule}' does not accept an index suffix")]
    UnexpectedIndexSuffix { rule: String },

    #[error("rule '{rule}' failed: {message}")]
    RuleFailure { rule: String, message: String },
}
