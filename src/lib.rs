//! Template/macro expansion engine for index-annotated code
//! generation.
//!
//! Turns template lines such as `foo[^a] = bar[^a];` or
//! `$U2{k}[^ab]` into emitted target-language source. Per line the
//! engine decides between unrolling across concrete tensor-index
//! values and emitting nested loop constructs, validates index usage
//! (duplicate declarations, missing variance partners, dangling
//! indices, suspicious single occurrences), and guards against
//! runaway recursive self-expansion.
//!
//! The expansion pipeline per line: [`splitter`] divides the line
//! around an assignment-like operator, [`tokenizer`] lexes each half
//! and builds its index database, [`policy`] decides unrolled vs.
//! looped emission, and [`emit`] produces the output text through a
//! pluggable [`printer::LanguagePrinter`]. [`agent::MacroAgent`]
//! orchestrates the pipeline and owns the recursion-depth guard and
//! the `$IF`/`$ELSE`/`$ENDIF` directive state.
//!
//! Emitted lines are opaque text: the engine never parses or
//! type-checks the output language.

pub mod agent;
pub mod ast;
pub mod config;
pub mod diagnostics;
pub mod emit;
pub mod error;
pub mod index;
pub mod parser;
pub mod policy;
pub mod printer;
pub mod rules;
pub mod splitter;
pub mod tokenizer;

pub use agent::{MacroAgent, MacroExpansion, TemplateLine};
pub use config::EngineConfig;
pub use diagnostics::{BufferSink, DiagnosticSink, ErrorContext, LogSink, SourceLocation};
pub use error::ExpansionError;
pub use index::{Assignment, IndexClass, IndexDatabase, IndexValue, Variance};
pub use policy::{UnrollDecision, resolve_unroll};
pub use printer::{CxxPrinter, LanguagePrinter};
pub use rules::{ReplacementRule, RuleRegistry, UnrollBehaviour};
pub use splitter::{SplitKind, SplitResult, split_line};
