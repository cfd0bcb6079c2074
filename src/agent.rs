use std::ops::Range;
use std::time::{Duration, Instant};

use crate::ast::DirectiveKind;
use crate::config::EngineConfig;
use crate::diagnostics::{DiagnosticSink, ErrorContext, SourceLocation};
use crate::emit::Emitter;
use crate::error::ExpansionError;
use crate::policy::{UnrollDecision, resolve_unroll};
use crate::printer::LanguagePrinter;
use crate::rules::RuleRegistry;
use crate::splitter::{SplitKind, split_line};
use crate::tokenizer::TokenList;

/// One line of template input: text, source location, and the stack
/// of templates that included it.
#[derive(Debug, Clone)]
pub struct TemplateLine {
    pub text: String,
    pub location: SourceLocation,
    pub include_stack: Vec<SourceLocation>,
}

impl TemplateLine {
    pub fn new(text: impl Into<String>, location: SourceLocation) -> Self {
        TemplateLine {
            text: text.into(),
            location,
            include_stack: Vec::new(),
        }
    }

    fn context(&self, range: Range<usize>) -> ErrorContext {
        ErrorContext::new(self.location.clone(), self.text.clone(), range)
            .with_include_stack(self.include_stack.clone())
    }

    fn whole(&self) -> ErrorContext {
        self.context(0..self.text.len())
    }
}

/// Result of expanding one line (or a batch): the produced output
/// lines and the number of macro substitutions actually performed.
/// A non-empty line expanding with zero replacements lets callers
/// flag template lines that silently expanded to nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroExpansion {
    pub lines: Vec<String>,
    pub replacements: usize,
}

#[derive(Debug, Clone, Copy)]
struct IfFrame {
    condition: bool,
    else_seen: bool,
}

impl IfFrame {
    fn active(&self) -> bool {
        if self.else_seen {
            !self.condition
        } else {
            self.condition
        }
    }
}

/// Orchestrates expansion of template lines: split, tokenize,
/// validate, resolve the unroll policy and emit, guarding against
/// runaway recursive self-expansion.
pub struct MacroAgent<P: LanguagePrinter, S: DiagnosticSink> {
    config: EngineConfig,
    registry: RuleRegistry,
    printer: P,
    sink: S,
    depth: usize,
    if_stack: Vec<IfFrame>,
    timer: Duration,
}

impl<P: LanguagePrinter, S: DiagnosticSink> MacroAgent<P, S> {
    pub fn new(config: EngineConfig, mut registry: RuleRegistry, printer: P, sink: S) -> Self {
        // the fast flag is always consultable from $IF directives
        registry.set_flag("fast", config.fast);
        MacroAgent {
            config,
            registry,
            printer,
            sink,
            depth: 0,
            if_stack: Vec::new(),
            timer: Duration::ZERO,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut RuleRegistry {
        &mut self.registry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    /// Cumulative wall-clock time spent expanding lines.
    pub fn time_spent(&self) -> Duration {
        self.timer
    }

    /// Expand one template line.
    ///
    /// The recursion depth is incremented on entry and decremented
    /// only when the expansion actually ran to completion; a frame
    /// that trips the guard leaves the counter elevated, matching the
    /// original asymmetric contract.
    pub fn apply(&mut self, line: &TemplateLine) -> MacroExpansion {
        self.depth += 1;
        if self.depth >= self.config.max_recursion {
            self.sink.warn(
                &line.whole(),
                "maximum recursion depth exceeded; line abandoned",
            );
            return MacroExpansion::default();
        }

        let started = Instant::now();
        let mut result = self.apply_line(line);
        self.timer += started.elapsed();

        // rescan: a rule's expansion may itself contain macro syntax
        if result.replacements > 0 && result.lines.iter().any(|l| l.contains('$')) {
            let mut lines = Vec::with_capacity(result.lines.len());
            let mut extra = 0;
            for text in std::mem::take(&mut result.lines) {
                if text.contains('$') {
                    let nested = TemplateLine {
                        text,
                        location: line.location.clone(),
                        include_stack: line.include_stack.clone(),
                    };
                    let nested_result = self.apply(&nested);
                    extra += nested_result.replacements;
                    lines.extend(nested_result.lines);
                } else {
                    lines.push(text);
                }
            }
            result.lines = lines;
            result.replacements += extra;
        }

        self.depth -= 1;
        result
    }

    /// Expand a batch of lines, concatenating output.
    pub fn apply_all<I>(&mut self, lines: I) -> MacroExpansion
    where
        I: IntoIterator<Item = TemplateLine>,
    {
        let mut out = MacroExpansion::default();
        for line in lines {
            let result = self.apply(&line);
            out.lines.extend(result.lines);
            out.replacements += result.replacements;
        }
        out
    }

    fn apply_line(&mut self, line: &TemplateLine) -> MacroExpansion {
        match self.expand(line) {
            Ok(expansion) => expansion,
            Err(err) => {
                let range = error_range(&err, line);
                self.sink.error(&line.context(range), &err.to_string());
                MacroExpansion::default()
            }
        }
    }

    fn expand(&mut self, line: &TemplateLine) -> Result<MacroExpansion, ExpansionError> {
        let split = split_line(&line.text, &self.config.assign_op, &self.config.accumulate_op);

        let lhs = match TokenList::tokenize(&split.left, 0, None, &self.registry, &self.config) {
            Ok(list) => list,
            // inside a disabled branch, ill-formed lines are skipped
            Err(_) if self.suppressed() => return Ok(MacroExpansion::default()),
            Err(err) => return Err(err),
        };
        let rhs = match TokenList::tokenize(
            &split.right,
            split.right_offset,
            Some(&lhs.db),
            &self.registry,
            &self.config,
        ) {
            Ok(list) => list,
            Err(_) if self.suppressed() => return Ok(MacroExpansion::default()),
            Err(err) => return Err(err),
        };

        // directives are processed even when output is suppressed so
        // nested state stays consistent
        if lhs.directive || rhs.directive {
            if split.kind != SplitKind::None {
                return Err(ExpansionError::DirectiveOnRhs);
            }
            return self.apply_directive(&rhs, line);
        }

        if self.suppressed() {
            return Ok(MacroExpansion::default());
        }

        for (range, message) in lhs.pending_warnings.iter().chain(&rhs.pending_warnings) {
            self.sink.warn(&line.context(range.clone()), message);
        }

        // an all-bound label on the left has no enclosing binder
        for literal in lhs.db.iter() {
            if !literal.free {
                return Err(ExpansionError::DanglingIndex {
                    label: literal.label,
                });
            }
        }

        let rhs_only = self.validate_rhs_indices(&lhs, &rhs, line)?;

        let mut lhs = lhs;
        let mut rhs = rhs;
        let emitter = Emitter {
            registry: &self.registry,
            config: &self.config,
            printer: &self.printer,
        };
        let pre_count =
            emitter.evaluate_pre(&mut lhs.tokens)? + emitter.evaluate_pre(&mut rhs.tokens)?;

        let lhs_card: usize = lhs.db.free().map(|l| l.range as usize).product();
        let rhs_card: usize = rhs_only.free().map(|l| l.range as usize).product();

        let annotations: Vec<_> = lhs
            .annotations
            .iter()
            .chain(&rhs.annotations)
            .cloned()
            .collect();
        let outcome = resolve_unroll(
            lhs_card,
            rhs_card,
            &annotations,
            self.config.unroll_policy,
            self.config.fast,
        );

        if let Some(violation) = outcome.violation {
            let message = violation.to_string();
            self.sink.error(&line.whole(), &message);
            return Ok(MacroExpansion {
                lines: vec![self.printer.comment(&format!("skipped: {}", message))],
                replacements: 0,
            });
        }
        if outcome.implicit_override {
            self.sink.warn(
                &line.whole(),
                "unroll policy decision overridden by defaults, without an explicit annotation",
            );
        }

        let emitter = Emitter {
            registry: &self.registry,
            config: &self.config,
            printer: &self.printer,
        };
        let (lines, count) = match outcome.decision {
            UnrollDecision::Unroll => emitter.unroll(&lhs, &rhs, &rhs_only, &split)?,
            UnrollDecision::Loop => emitter.looped(&lhs, &rhs, &rhs_only, &split)?,
        };

        Ok(MacroExpansion {
            lines,
            replacements: pre_count + count,
        })
    }

    /// Remove RHS indices already bound on the LHS and check what
    /// remains: dummy indices should occur more than once, carry both
    /// variances (nontrivial-metric models), and be free.
    fn validate_rhs_indices(
        &mut self,
        lhs: &TokenList,
        rhs: &TokenList,
        line: &TemplateLine,
    ) -> Result<crate::index::IndexDatabase, ExpansionError> {
        let rhs_only = rhs.db.difference(&lhs.db)?;

        for literal in rhs_only.iter() {
            let declared = literal.declared_at..literal.declared_at + 1;
            let stat = rhs
                .stats
                .get(&literal.label)
                .copied()
                .unwrap_or_default();
            if stat.count == 1 {
                self.sink.warn(
                    &line.context(declared.clone()),
                    &format!(
                        "index '{}' occurs only once on the right-hand side",
                        literal.label
                    ),
                );
            }
            if self.config.nontrivial_metric && !(stat.covariant && stat.contravariant) {
                self.sink.warn(
                    &line.context(declared),
                    &format!(
                        "index '{}' does not occur in both covariant and contravariant positions",
                        literal.label
                    ),
                );
            }
            if !literal.free {
                return Err(ExpansionError::DanglingIndex {
                    label: literal.label,
                });
            }
        }

        Ok(rhs_only)
    }

    fn apply_directive(
        &mut self,
        list: &TokenList,
        line: &TemplateLine,
    ) -> Result<MacroExpansion, ExpansionError> {
        let Some((kind, args, span)) = list.sole_directive() else {
            return Ok(MacroExpansion::default());
        };

        let comment = match kind {
            DirectiveKind::If => {
                let name = args.first().map(String::as_str).unwrap_or("");
                let condition = match self.registry.flag(name) {
                    Some(value) => value,
                    None => {
                        self.sink.warn(
                            &line.context(span.clone()),
                            &format!("unknown condition flag '{}', treated as false", name),
                        );
                        false
                    }
                };
                let outer_active = self.all_active();
                self.if_stack.push(IfFrame {
                    condition,
                    else_seen: false,
                });
                outer_active.then(|| format!("IF {}", name))
            }
            DirectiveKind::Else => {
                if !matches!(self.if_stack.last(), Some(frame) if !frame.else_seen) {
                    return Err(ExpansionError::UnbalancedDirective(kind.name().to_string()));
                }
                let depth = self.if_stack.len() - 1;
                let outer_active = self.if_stack[..depth].iter().all(|f| f.active());
                if let Some(frame) = self.if_stack.last_mut() {
                    frame.else_seen = true;
                }
                outer_active.then(|| kind.name().to_string())
            }
            DirectiveKind::EndIf => {
                if self.if_stack.pop().is_none() {
                    return Err(ExpansionError::UnbalancedDirective(kind.name().to_string()));
                }
                self.all_active().then(|| kind.name().to_string())
            }
        };

        // directives carry no macro-replacement count
        Ok(MacroExpansion {
            lines: comment
                .map(|text| vec![self.printer.comment(&text)])
                .unwrap_or_default(),
            replacements: 0,
        })
    }

    fn all_active(&self) -> bool {
        self.if_stack.iter().all(|frame| frame.active())
    }

    fn suppressed(&self) -> bool {
        !self.all_active()
    }
}

fn error_range(err: &ExpansionError, line: &TemplateLine) -> Range<usize> {
    match err {
        ExpansionError::DuplicateIndex { offset, .. } => {
            let start = (*offset).min(line.text.len());
            start..(start + 1).min(line.text.len())
        }
        _ => 0..line.text.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::BufferSink;
    use crate::index::IndexClass;
    use crate::printer::CxxPrinter;
    use crate::rules::ReplacementRule;

    fn agent(config: EngineConfig) -> MacroAgent<CxxPrinter, BufferSink> {
        agent_with(config, RuleRegistry::new())
    }

    fn agent_with(
        config: EngineConfig,
        registry: RuleRegistry,
    ) -> MacroAgent<CxxPrinter, BufferSink> {
        MacroAgent::new(config, registry, CxxPrinter, BufferSink::new())
    }

    fn line(text: &str) -> TemplateLine {
        TemplateLine::new(text, SourceLocation::anonymous(1))
    }

    #[test]
    fn test_scenario_a_unrolled_assignment() {
        let mut agent = agent(EngineConfig {
            unroll_policy: 10,
            ..EngineConfig::for_model(3, 0)
        });
        let result = agent.apply(&line("foo[^a] = bar[^a];"));
        assert_eq!(
            result.lines,
            vec!["foo_0 = bar_0;", "foo_1 = bar_1;", "foo_2 = bar_2;"]
        );
        assert!(agent.sink().is_empty());
    }

    #[test]
    fn test_scenario_b_looped_assignment() {
        let mut agent = agent(EngineConfig {
            unroll_policy: 0,
            ..EngineConfig::for_model(3, 0)
        });
        let result = agent.apply(&line("foo[^a] = bar[^a];"));
        assert_eq!(
            result.lines,
            vec![
                "for(unsigned int a = 0; a < 3; ++a)",
                "{",
                "  foo_a = bar_a;",
                "}"
            ]
        );
        assert!(agent.sink().is_empty());
    }

    #[test]
    fn test_scenario_c_coalesced_accumulation() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        let result = agent.apply(&line("total[^a] += term[^a][^a];"));
        assert_eq!(
            result.lines,
            vec![
                "total_0 += term_0_0;",
                "total_1 += term_1_1;",
                "total_2 += term_2_2;"
            ]
        );
    }

    #[test]
    fn test_scenario_d_directive_on_rhs() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        let result = agent.apply(&line("flag = $IF{fast};"));
        assert!(result.lines.is_empty());
        assert_eq!(agent.sink().errors.len(), 1);
        assert!(agent.sink().errors[0].contains("directive"));
    }

    #[test]
    fn test_scenario_e_recursion_guard() {
        let mut agent = agent(EngineConfig {
            max_recursion: 1,
            ..EngineConfig::for_model(3, 0)
        });
        let result = agent.apply(&line("foo[^a] = bar[^a];"));
        assert!(result.lines.is_empty());
        assert_eq!(result.replacements, 0);
        assert_eq!(agent.sink().warnings.len(), 1);
        assert!(agent.sink().warnings[0].contains("recursion"));
    }

    #[test]
    fn test_self_expanding_rule_terminates() {
        let mut registry = RuleRegistry::new();
        registry.define(ReplacementRule::post("SELF", 0, |_| Ok("$SELF".to_string())));
        let mut agent = agent_with(
            EngineConfig {
                max_recursion: 3,
                ..EngineConfig::for_model(3, 0)
            },
            registry,
        );
        let result = agent.apply(&line("$SELF"));
        assert!(result.lines.is_empty());
        assert_eq!(agent.sink().warnings.len(), 1);
        assert!(agent.sink().warnings[0].contains("recursion"));
    }

    #[test]
    fn test_idempotent_on_expanded_output() {
        let mut first_pass = agent(EngineConfig::for_model(3, 0));
        let first = first_pass.apply(&line("foo[^a] = bar[^a];"));
        assert!(first.replacements > 0);

        let mut again = agent(EngineConfig::for_model(3, 0));
        for text in &first.lines {
            let result = again.apply(&line(text));
            assert_eq!(result.lines, vec![text.clone()]);
            assert_eq!(result.replacements, 0);
        }
    }

    #[test]
    fn test_plain_rhs_line_passes_through() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        let result = agent.apply(&line("return status;"));
        assert_eq!(result.lines, vec!["return status;"]);
        assert_eq!(result.replacements, 0);
    }

    #[test]
    fn test_directive_suppression_flow() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        let mut out = Vec::new();
        for text in [
            "$IF{fast}",
            "foo[^a] = bar[^a];",
            "$ELSE",
            "slow_path();",
            "$ENDIF",
        ] {
            out.extend(agent.apply(&line(text)).lines);
        }
        // fast is false: the IF branch is suppressed, the ELSE branch
        // survives, and the directives themselves become comments
        assert_eq!(
            out,
            vec!["// IF fast", "// ELSE", "slow_path();", "// ENDIF"]
        );
    }

    #[test]
    fn test_directive_taken_branch() {
        let mut agent = agent(EngineConfig {
            fast: true,
            ..EngineConfig::for_model(3, 0)
        });
        let mut out = Vec::new();
        for text in ["$IF{fast}", "x = $IGNORED", "$ENDIF"] {
            out.extend(agent.apply(&line(text)).lines);
        }
        assert_eq!(out.len(), 3);
        assert_eq!(out[1], "x = $IGNORED");
    }

    #[test]
    fn test_unknown_condition_flag_warns() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        agent.apply(&line("$IF{mystery}"));
        assert_eq!(agent.sink().warnings.len(), 1);
        assert!(agent.sink().warnings[0].contains("mystery"));
        agent.apply(&line("$ENDIF"));
    }

    #[test]
    fn test_unbalanced_else_reported() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        let result = agent.apply(&line("$ELSE"));
        assert!(result.lines.is_empty());
        assert_eq!(agent.sink().errors.len(), 1);
        assert!(agent.sink().errors[0].contains("ELSE"));
    }

    #[test]
    fn test_single_occurrence_warning() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        agent.apply(&line("total[^a] += term[^b];"));
        assert!(
            agent
                .sink()
                .warnings
                .iter()
                .any(|w| w.contains("occurs only once"))
        );
    }

    #[test]
    fn test_variance_pairing_warning() {
        let mut agent = agent(EngineConfig {
            nontrivial_metric: true,
            ..EngineConfig::for_model(3, 0)
        });
        agent.apply(&line("s = v[^a] * w[^a];"));
        assert!(
            agent
                .sink()
                .warnings
                .iter()
                .any(|w| w.contains("covariant and contravariant"))
        );
    }

    #[test]
    fn test_contraction_pairs_do_not_warn() {
        let mut agent = agent(EngineConfig {
            nontrivial_metric: true,
            ..EngineConfig::for_model(3, 0)
        });
        agent.apply(&line("s = v[^a] * w[_a];"));
        assert!(
            !agent
                .sink()
                .warnings
                .iter()
                .any(|w| w.contains("covariant and contravariant"))
        );
    }

    #[test]
    fn test_dangling_bound_index_is_error() {
        let mut agent = agent(EngineConfig::for_model(3, 0));
        let result = agent.apply(&line("s = w[_z];"));
        assert!(result.lines.is_empty());
        assert_eq!(agent.sink().errors.len(), 1);
        assert!(agent.sink().errors[0].contains("binds"));
    }

    #[test]
    fn test_irreconcilable_annotations_skip_line() {
        let mut registry = RuleRegistry::new();
        registry.define(
            ReplacementRule::index("FORCED", 0, IndexClass::Field, |_, v| {
                Ok(format!("f[{}]", v[0]))
            })
            .with_unroll(crate::rules::UnrollBehaviour::Force),
        );
        registry.define(
            ReplacementRule::index("PREVENTED", 0, IndexClass::Field, |_, v| {
                Ok(format!("p[{}]", v[0]))
            })
            .with_unroll(crate::rules::UnrollBehaviour::Prevent),
        );
        let mut agent = agent_with(EngineConfig::for_model(3, 0), registry);
        let result = agent.apply(&line("out[^a] = $FORCED[^a] * $PREVENTED[^a];"));
        assert_eq!(result.lines.len(), 1);
        assert!(result.lines[0].starts_with("// skipped:"));
        assert_eq!(agent.sink().errors.len(), 1);
    }

    #[test]
    fn test_fast_mode_implicit_override_warns() {
        let mut agent = agent(EngineConfig {
            fast: true,
            unroll_policy: 0,
            ..EngineConfig::for_model(3, 0)
        });
        let result = agent.apply(&line("foo[^a] = bar[^a];"));
        // fast mode unrolls despite the zero threshold
        assert_eq!(result.lines.len(), 3);
        assert!(
            agent
                .sink()
                .warnings
                .iter()
                .any(|w| w.contains("overridden by defaults"))
        );
    }

    #[test]
    fn test_apply_all_accumulates() {
        let mut agent = agent(EngineConfig::for_model(2, 0));
        let result = agent.apply_all([
            line("u[^a] = v[^a];"),
            line("w[^b] = x[^b];"),
        ]);
        assert_eq!(result.lines.len(), 4);
        assert!(result.replacements > 0);
    }

    #[test]
    fn test_time_spent_accumulates() {
        let mut agent = agent(EngineConfig::for_model(2, 0));
        agent.apply(&line("u[^a] = v[^a];"));
        // sub-microsecond on fast machines, but never moves backwards
        assert!(agent.time_spent() >= Duration::ZERO);
    }
}
