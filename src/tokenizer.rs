use std::collections::BTreeMap;
use std::ops::Range;

use crate::ast::{DirectiveKind, Token};
use crate::config::EngineConfig;
use crate::error::ExpansionError;
use crate::index::{IndexClass, IndexDatabase, Variance};
use crate::parser::TemplateParser;
use crate::policy::RuleAnnotation;
use crate::rules::{RuleBody, RuleRegistry};

/// Per-label occurrence statistics feeding the validation warnings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Occurrence {
    pub count: usize,
    pub covariant: bool,
    pub contravariant: bool,
}

/// One tokenized half-line: the token sequence, the canonical index
/// database it declares, the unroll annotations of every rule it
/// references, and occurrence statistics per label.
#[derive(Debug)]
pub struct TokenList {
    pub tokens: Vec<Token>,
    pub db: IndexDatabase,
    /// True when the half-line consists of a single directive
    /// (surrounded by nothing but whitespace).
    pub directive: bool,
    pub annotations: Vec<RuleAnnotation>,
    pub stats: BTreeMap<char, Occurrence>,
    /// Byte offset of this half within the full template line.
    pub base_offset: usize,
    /// Warnings discovered during tokenization, for the agent to
    /// forward to the sink: (range within the full line, message).
    pub pending_warnings: Vec<(Range<usize>, String)>,
}

impl TokenList {
    /// Tokenize one half-line. `cross` is the LHS database when
    /// tokenizing the RHS; shared labels are validated against it.
    pub fn tokenize(
        text: &str,
        base_offset: usize,
        cross: Option<&IndexDatabase>,
        registry: &RuleRegistry,
        config: &EngineConfig,
    ) -> Result<TokenList, ExpansionError> {
        let mut tokens = TemplateParser::parse_half(text)?;
        for token in &mut tokens {
            rebase_span(token, base_offset);
        }

        let mut list = TokenList {
            tokens,
            db: IndexDatabase::new(),
            directive: false,
            annotations: Vec::new(),
            stats: BTreeMap::new(),
            base_offset,
            pending_warnings: Vec::new(),
        };

        list.classify_directive()?;
        if list.directive {
            return Ok(list);
        }

        list.collect(registry, config)?;

        if let Some(lhs) = cross {
            for entry in list.db.iter() {
                if let Some(counterpart) = lhs.get(entry.label) {
                    if counterpart.class != entry.class || counterpart.variance != entry.variance {
                        return Err(ExpansionError::IndexMismatch { label: entry.label });
                    }
                }
            }
        }

        Ok(list)
    }

    /// The directive token, when this half-line is one.
    pub fn sole_directive(&self) -> Option<(&DirectiveKind, &[String], &Range<usize>)> {
        if !self.directive {
            return None;
        }
        self.tokens.iter().find_map(|t| match t {
            Token::Directive { kind, args, span } => Some((kind, args.as_slice(), span)),
            _ => None,
        })
    }

    fn classify_directive(&mut self) -> Result<(), ExpansionError> {
        let mut directives = 0usize;
        let mut other = 0usize;
        for token in &self.tokens {
            match token {
                Token::Directive { .. } => directives += 1,
                Token::Literal(text) if text.trim().is_empty() => {}
                _ => other += 1,
            }
        }
        match (directives, other) {
            (0, _) => Ok(()),
            (1, 0) => {
                self.directive = true;
                Ok(())
            }
            _ => Err(ExpansionError::DirectiveNotAlone),
        }
    }

    /// Walk the tokens, declaring indices and recording rule
    /// annotations and occurrence statistics.
    fn collect(
        &mut self,
        registry: &RuleRegistry,
        config: &EngineConfig,
    ) -> Result<(), ExpansionError> {
        // collected first so the databases can be built without
        // holding a borrow of self.tokens
        let mut declarations: Vec<(char, Variance, bool, IndexClass, usize)> = Vec::new();

        for token in &self.tokens {
            match token {
                Token::IndexedRef { suffix, span, .. } => {
                    for r in suffix.iter() {
                        declarations.push((
                            r.label,
                            r.variance,
                            r.free,
                            IndexClass::for_label(r.label),
                            span.start,
                        ));
                    }
                }
                Token::MacroCall {
                    name,
                    args,
                    suffix,
                    span,
                } => match registry.get(name) {
                    Some(rule) => {
                        if args.len() != rule.args_expected {
                            return Err(ExpansionError::ArgumentCount {
                                rule: name.clone(),
                                expected: rule.args_expected,
                                found: args.len(),
                            });
                        }
                        let class = match &rule.body {
                            RuleBody::Index { class, .. } => {
                                if suffix.is_empty() {
                                    return Err(ExpansionError::MissingIndexSuffix {
                                        rule: name.clone(),
                                    });
                                }
                                Some(*class)
                            }
                            _ => {
                                if !suffix.is_empty() {
                                    return Err(ExpansionError::UnexpectedIndexSuffix {
                                        rule: name.clone(),
                                    });
                                }
                                None
                            }
                        };
                        for r in suffix.iter() {
                            declarations.push((
                                r.label,
                                r.variance,
                                r.free,
                                class.unwrap_or_else(|| IndexClass::for_label(r.label)),
                                span.start,
                            ));
                        }
                        self.annotations.push(RuleAnnotation {
                            name: name.clone(),
                            behaviour: rule.unroll,
                        });
                    }
                    None => {
                        self.pending_warnings.push((
                            span.clone(),
                            format!("unknown rule '{}' left unexpanded", name),
                        ));
                    }
                },
                _ => {}
            }
        }

        for (label, variance, free, class, offset) in declarations {
            let variance = if config.nontrivial_metric {
                variance
            } else {
                Variance::None
            };
            self.db
                .declare(label, variance, free, class, class.range(config), offset)?;

            let stat = self.stats.entry(label).or_default();
            stat.count += 1;
            match variance {
                Variance::Covariant => stat.covariant = true,
                Variance::Contravariant => stat.contravariant = true,
                Variance::None => {}
            }
        }

        Ok(())
    }
}

fn rebase_span(token: &mut Token, base_offset: usize) {
    match token {
        Token::Literal(_) => {}
        Token::IndexedRef { span, .. }
        | Token::MacroCall { span, .. }
        | Token::Directive { span, .. } => {
            span.start += base_offset;
            span.end += base_offset;
        }
    }
}
