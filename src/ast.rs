use std::ops::Range;

use crate::index::Variance;

/// Control directives recognised in template lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    If,
    Else,
    EndIf,
}

impl DirectiveKind {
    /// Map a rule name to a directive, if it is one.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "IF" => Some(DirectiveKind::If),
            "ELSE" => Some(DirectiveKind::Else),
            "ENDIF" => Some(DirectiveKind::EndIf),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DirectiveKind::If => "IF",
            DirectiveKind::Else => "ELSE",
            DirectiveKind::EndIf => "ENDIF",
        }
    }
}

/// One index occurrence inside a suffix group.
///
/// `[^a]` yields a free, contravariant-position occurrence of `a`;
/// `[_a]` a bound, covariant-position one. Variance is only recorded
/// for nontrivial-metric models; trivial-metric models carry `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRef {
    pub label: char,
    pub variance: Variance,
    pub free: bool,
}

/// The ordered index occurrences attached to one reference or macro
/// call, e.g. `[^a][_b]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IndexSuffix(pub Vec<IndexRef>);

impl IndexSuffix {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexRef> {
        self.0.iter()
    }
}

/// Top-level parsed token for one half-line.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Literal text (whitespace, punctuation, plain code)
    Literal(String),
    /// A bare identifier carrying an index suffix: `foo[^a]`
    IndexedRef {
        stem: String,
        suffix: IndexSuffix,
        span: Range<usize>,
    },
    /// Macro call: `$RULE{arg1, arg2}[^ab]`
    MacroCall {
        name: String,
        args: Vec<String>,
        suffix: IndexSuffix,
        span: Range<usize>,
    },
    /// Control directive: `$IF{cond}`, `$ELSE`, `$ENDIF`
    Directive {
        kind: DirectiveKind,
        args: Vec<String>,
        span: Range<usize>,
    },
}

impl Token {
    /// Byte range of the token within its half-line, where known.
    pub fn span(&self) -> Option<&Range<usize>> {
        match self {
            Token::Literal(_) => None,
            Token::IndexedRef { span, .. }
            | Token::MacroCall { span, .. }
            | Token::Directive { span, .. } => Some(span),
        }
    }
}
