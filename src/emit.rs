use crate::ast::Token;
use crate::config::EngineConfig;
use crate::error::ExpansionError;
use crate::index::{Assignment, IndexDatabase, IndexLiteral, IndexValue};
use crate::printer::LanguagePrinter;
use crate::rules::{RuleBody, RuleRegistry};
use crate::splitter::{SplitKind, SplitResult};
use crate::tokenizer::TokenList;

/// Produces the final output text for one line, either unrolled
/// across concrete index assignments or as nested loop constructs.
pub struct Emitter<'a> {
    pub registry: &'a RuleRegistry,
    pub config: &'a EngineConfig,
    pub printer: &'a dyn LanguagePrinter,
}

/// Output lines plus the number of substitutions performed.
pub type Emitted = (Vec<String>, usize);

fn pad(width: usize) -> String {
    " ".repeat(width)
}

impl<'a> Emitter<'a> {
    /// Evaluate every pre-phase rule in place, replacing its
    /// invocation with literal text. Runs once per line, before any
    /// assignment is chosen.
    pub fn evaluate_pre(&self, tokens: &mut [Token]) -> Result<usize, ExpansionError> {
        let mut count = 0;
        for token in tokens.iter_mut() {
            if let Token::MacroCall { name, args, .. } = token {
                if let Some(rule) = self.registry.get(name) {
                    if let RuleBody::Pre(body) = &rule.body {
                        let text =
                            body(args).map_err(|message| ExpansionError::RuleFailure {
                                rule: name.clone(),
                                message,
                            })?;
                        count += 1;
                        *token = Token::Literal(text);
                    }
                }
            }
        }
        Ok(count)
    }

    /// Evaluate a token sequence against one concrete (or
    /// loop-symbolic) assignment, running index- and post-phase rules.
    pub fn evaluate(
        &self,
        tokens: &[Token],
        assignment: &Assignment,
    ) -> Result<(String, usize), ExpansionError> {
        let mut out = String::new();
        let mut count = 0;

        for token in tokens {
            match token {
                Token::Literal(text) => out.push_str(text),
                Token::IndexedRef { stem, suffix, .. } => {
                    out.push_str(stem);
                    for r in suffix.iter() {
                        let value = assignment
                            .get(r.label)
                            .ok_or(ExpansionError::DanglingIndex { label: r.label })?;
                        out.push('_');
                        out.push_str(&value.to_string());
                    }
                    count += 1;
                }
                Token::MacroCall {
                    name,
                    args,
                    suffix,
                    ..
                } => match self.registry.get(name) {
                    Some(rule) => {
                        let text = match &rule.body {
                            RuleBody::Pre(body) | RuleBody::Post(body) => body(args),
                            RuleBody::Index { body, .. } => {
                                let values = suffix
                                    .iter()
                                    .map(|r| {
                                        assignment.get(r.label).cloned().ok_or(
                                            ExpansionError::DanglingIndex { label: r.label },
                                        )
                                    })
                                    .collect::<Result<Vec<IndexValue>, _>>()?;
                                body(args, &values)
                            }
                        }
                        .map_err(|message| ExpansionError::RuleFailure {
                            rule: name.clone(),
                            message,
                        })?;
                        out.push_str(&text);
                        count += 1;
                    }
                    // unknown rule: re-emit verbatim, already warned
                    None => out.push_str(&render_macro(name, args, token)),
                },
                Token::Directive { .. } => {}
            }
        }

        Ok((out, count))
    }

    /// Unrolled emission: one terminal line per concrete assignment
    /// pair.
    pub fn unroll(
        &self,
        lhs: &TokenList,
        rhs: &TokenList,
        rhs_only: &IndexDatabase,
        split: &SplitResult,
    ) -> Result<Emitted, ExpansionError> {
        let lhs_set = lhs.db.assignments();
        let rhs_set = rhs_only.assignments();

        // zero assignments (not trivial): some index has an empty range
        if lhs_set.is_empty() || rhs_set.is_empty() {
            return Ok((
                vec![self.printer.comment("skipped: empty index range")],
                0,
            ));
        }

        let mut lines = Vec::new();
        let mut count = 0;

        for la in &lhs_set {
            let (lhs_text, c) = self.evaluate(&lhs.tokens, la)?;
            count += c;
            let lead = !lhs_text.trim().is_empty();

            if rhs_set.len() > 1 {
                if lead {
                    lines.push(format!("{} {}", lhs_text, self.operator(split.kind)));
                }
                let extra = if lead { self.printer.block_indent() } else { 0 };
                for (i, ra) in rhs_set.iter().enumerate() {
                    let merged = la.merged(ra);
                    let (rhs_text, c) = self.evaluate(&rhs.tokens, &merged)?;
                    count += c;
                    let mut line = format!("{}{}", pad(extra), rhs_text);
                    if i == rhs_set.len() - 1 {
                        line.push_str(split.terminator());
                    }
                    lines.push(line);
                }
            } else {
                let merged = la.merged(&rhs_set[0]);
                let (rhs_text, c) = self.evaluate(&rhs.tokens, &merged)?;
                count += c;
                let line = if lead {
                    format!(
                        "{} {} {}{}",
                        lhs_text,
                        self.operator(split.kind),
                        rhs_text,
                        split.terminator()
                    )
                } else {
                    format!("{}{}", rhs_text, split.terminator())
                };
                lines.push(line);
            }
        }

        Ok((lines, count))
    }

    /// Looped emission: nested loop constructs over the free indices,
    /// via the language printer.
    pub fn looped(
        &self,
        lhs: &TokenList,
        rhs: &TokenList,
        rhs_only: &IndexDatabase,
        split: &SplitResult,
    ) -> Result<Emitted, ExpansionError> {
        let lhs_assignment = lhs.db.loop_assignment();
        let full = lhs_assignment.merged(&rhs_only.loop_assignment());
        let rhs_count: usize = rhs_only.free().map(|l| l.range as usize).product();

        let (lhs_text, lhs_subs) = self.evaluate(&lhs.tokens, &lhs_assignment)?;
        let lhs_text = lhs_text.trim().to_string();
        let (rhs_text, rhs_subs) = self.evaluate(&rhs.tokens, &full)?;
        let rhs_text = rhs_text.trim().to_string();

        let statement = match split.kind {
            SplitKind::None => format!("{}{}", rhs_text, split.terminator()),
            SplitKind::Assign => format!(
                "{} {} {}{}",
                lhs_text,
                self.operator(SplitKind::Assign),
                rhs_text,
                split.terminator()
            ),
            SplitKind::Accumulate => {
                // zero-init + "+=" over the dummy loops; a single
                // contribution collapses to a plain assignment
                let op = if rhs_count > 1 {
                    self.operator(SplitKind::Accumulate)
                } else {
                    self.operator(SplitKind::Assign)
                };
                format!("{} {} {}{}", lhs_text, op, rhs_text, split.terminator())
            }
        };

        let mut planter = LoopPlanter {
            emitter: self,
            lhs_free: lhs.db.free().collect(),
            rhs_free: rhs_only.free().collect(),
            zero_init: (split.kind == SplitKind::Accumulate && rhs_count > 1)
                .then(|| format!("{} {} 0;", lhs_text, self.operator(SplitKind::Assign))),
            statement,
            lines: Vec::new(),
        };
        planter.plant_lhs(0, 0);

        Ok((planter.lines, lhs_subs + rhs_subs))
    }

    fn operator(&self, kind: SplitKind) -> &str {
        match kind {
            SplitKind::Accumulate => self.config.accumulate_op.trim(),
            _ => self.config.assign_op.trim(),
        }
    }
}

/// Builds the nested loop structure: mirror recursion over the LHS
/// free indices, then over the RHS-only free indices, bounded by the
/// number of distinct labels.
struct LoopPlanter<'a, 'b> {
    emitter: &'b Emitter<'a>,
    lhs_free: Vec<&'b IndexLiteral>,
    rhs_free: Vec<&'b IndexLiteral>,
    zero_init: Option<String>,
    statement: String,
    lines: Vec<String>,
}

impl LoopPlanter<'_, '_> {
    fn plant_lhs(&mut self, position: usize, indent: usize) {
        match self.lhs_free.get(position).copied() {
            Some(literal) => self.open_loop(literal, indent, |planter, inner| {
                planter.plant_lhs(position + 1, inner)
            }),
            None => {
                if let Some(init) = self.zero_init.take() {
                    self.lines.push(format!("{}{}", pad(indent), init));
                }
                self.plant_rhs(0, indent);
            }
        }
    }

    fn plant_rhs(&mut self, position: usize, indent: usize) {
        match self.rhs_free.get(position).copied() {
            Some(literal) => self.open_loop(literal, indent, |planter, inner| {
                planter.plant_rhs(position + 1, inner)
            }),
            None => {
                let statement = std::mem::take(&mut self.statement);
                self.lines.push(format!("{}{}", pad(indent), statement));
            }
        }
    }

    fn open_loop(
        &mut self,
        literal: &IndexLiteral,
        indent: usize,
        body: impl FnOnce(&mut Self, usize),
    ) {
        let printer = self.emitter.printer;
        self.lines.push(format!(
            "{}{}",
            pad(indent),
            printer.for_loop(&literal.label.to_string(), 0, literal.range)
        ));
        if let Some(delim) = printer.start_block_delimiter() {
            self.lines
                .push(format!("{}{}", pad(indent + printer.block_delimiter_indent()), delim));
        }
        body(self, indent + printer.block_indent());
        if let Some(delim) = printer.end_block_delimiter() {
            self.lines
                .push(format!("{}{}", pad(indent + printer.block_delimiter_indent()), delim));
        }
    }
}

/// Re-render an unresolved macro invocation in its surface form.
fn render_macro(name: &str, args: &[String], token: &Token) -> String {
    let mut out = format!("${}", name);
    if !args.is_empty() {
        out.push('{');
        out.push_str(&args.join(", "));
        out.push('}');
    }
    if let Token::MacroCall { suffix, .. } = token {
        for r in suffix.iter() {
            out.push('[');
            out.push(if r.free { '^' } else { '_' });
            out.push(r.label);
            out.push(']');
        }
    }
    out
}
