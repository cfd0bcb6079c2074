use pest::Parser;
use pest_derive::Parser;

use crate::ast::{DirectiveKind, IndexRef, IndexSuffix, Token};
use crate::error::ExpansionError;
use crate::index::Variance;

#[derive(Parser)]
#[grammar = "src/template.pest"]
pub struct TemplateParser;

impl TemplateParser {
    /// Tokenize one half-line into raw tokens. Spans are byte ranges
    /// within `input`; the caller re-bases them onto the full line.
    pub fn parse_half(input: &str) -> Result<Vec<Token>, ExpansionError> {
        let mut pairs = TemplateParser::parse(Rule::half, input)
            .map_err(|e| ExpansionError::Parse(e.to_string()))?;
        let half = pairs
            .next()
            .ok_or_else(|| ExpansionError::Parse("tokenizer returned no half rule".to_string()))?;

        Ok(half
            .into_inner()
            .filter_map(Self::convert_token)
            .collect::<Vec<_>>())
    }

    fn convert_token(pair: pest::iterators::Pair<Rule>) -> Option<Token> {
        match pair.as_rule() {
            Rule::token => {
                let inner = pair.into_inner().next()?;
                Self::convert_token(inner)
            }
            Rule::macro_call => Some(Self::convert_macro_call(pair)),
            Rule::indexed_ref => Some(Self::convert_indexed_ref(pair)),
            Rule::literal | Rule::dollar => Some(Token::Literal(pair.as_str().to_string())),
            _ => None,
        }
    }

    fn convert_macro_call(pair: pest::iterators::Pair<Rule>) -> Token {
        let span = pair.as_span().start()..pair.as_span().end();
        let mut name = String::new();
        let mut args = Vec::new();
        let mut suffix = IndexSuffix::default();

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::rule_name => name = inner.as_str().to_string(),
                Rule::arg_list => args = Self::convert_args(inner),
                Rule::index_suffix => suffix = Self::convert_suffix(inner),
                _ => {}
            }
        }

        match DirectiveKind::from_name(&name) {
            Some(kind) => Token::Directive { kind, args, span },
            None => Token::MacroCall {
                name,
                args,
                suffix,
                span,
            },
        }
    }

    fn convert_indexed_ref(pair: pest::iterators::Pair<Rule>) -> Token {
        let span = pair.as_span().start()..pair.as_span().end();
        let mut stem = String::new();
        let mut suffix = IndexSuffix::default();

        for inner in pair.into_inner() {
            match inner.as_rule() {
                Rule::ref_stem => stem = inner.as_str().to_string(),
                Rule::index_suffix => suffix = Self::convert_suffix(inner),
                _ => {}
            }
        }

        Token::IndexedRef { stem, suffix, span }
    }

    fn convert_args(pair: pest::iterators::Pair<Rule>) -> Vec<String> {
        let args: Vec<String> = pair
            .into_inner()
            .filter(|p| p.as_rule() == Rule::argument)
            .map(|p| p.as_str().trim().to_string())
            .collect();

        // `{}` parses as a single empty argument; treat it as none
        if args.len() == 1 && args[0].is_empty() {
            Vec::new()
        } else {
            args
        }
    }

    fn convert_suffix(pair: pest::iterators::Pair<Rule>) -> IndexSuffix {
        let mut refs = Vec::new();
        for group in pair.into_inner() {
            if group.as_rule() != Rule::index_group {
                continue;
            }
            let mut free = true;
            let mut variance = Variance::Contravariant;
            for part in group.into_inner() {
                match part.as_rule() {
                    Rule::index_mark => {
                        free = part.as_str() == "^";
                        variance = if free {
                            Variance::Contravariant
                        } else {
                            Variance::Covariant
                        };
                    }
                    Rule::index_label => {
                        for label in part.as_str().chars() {
                            refs.push(IndexRef {
                                label,
                                variance,
                                free,
                            });
                        }
                    }
                    _ => {}
                }
            }
        }
        IndexSuffix(refs)
    }
}
