/// How a template line was split around an assignment-like operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitKind {
    /// No operator found; the whole line is the right-hand side.
    None,
    /// Plain assignment.
    Assign,
    /// Accumulation (`+=`-style).
    Accumulate,
}

/// Result of splitting one template line. A pure text transform with
/// no error conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitResult {
    pub left: String,
    pub right: String,
    pub kind: SplitKind,
    pub semicolon: bool,
    pub comma: bool,
    /// Byte offset of the operator within the original line, when one
    /// was found.
    pub split_offset: usize,
    /// Byte offset of the right-hand text within the original line,
    /// after trimming; used to anchor diagnostics.
    pub right_offset: usize,
}

/// Split `line` around the first occurrence of `assign_op`, falling
/// back to `accumulate_op`. The assign operator is searched first; the
/// documented operator strings are space-padded so an accumulate line
/// can never match the assign operator at an earlier offset.
pub fn split_line(line: &str, assign_op: &str, accumulate_op: &str) -> SplitResult {
    let (kind, offset, op_len) = match line.find(assign_op) {
        Some(pos) => (SplitKind::Assign, pos, assign_op.len()),
        None => match line.find(accumulate_op) {
            Some(pos) => (SplitKind::Accumulate, pos, accumulate_op.len()),
            None => (SplitKind::None, 0, 0),
        },
    };

    let (left, raw_right) = match kind {
        SplitKind::None => ("", line),
        _ => (&line[..offset], &line[offset + op_len..]),
    };

    let mut right_offset = match kind {
        SplitKind::None => 0,
        _ => offset + op_len,
    };

    let mut right = raw_right.trim_end();
    if !left.is_empty() {
        let trimmed = right.trim_start();
        right_offset += right.len() - trimmed.len();
        right = trimmed;
    }

    let mut right = right.to_string();
    let mut semicolon = false;
    let mut comma = false;
    if right.ends_with(';') {
        right.pop();
        semicolon = true;
        right.truncate(right.trim_end().len());
    }
    if right.ends_with(',') {
        right.pop();
        comma = true;
        right.truncate(right.trim_end().len());
    }

    SplitResult {
        left: left.to_string(),
        right,
        kind,
        semicolon,
        comma,
        split_offset: offset,
        right_offset,
    }
}

impl SplitResult {
    /// Trailing punctuation to re-attach to the final emitted line.
    pub fn terminator(&self) -> &'static str {
        if self.semicolon {
            ";"
        } else if self.comma {
            ","
        } else {
            ""
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(line: &str) -> SplitResult {
        split_line(line, " = ", " += ")
    }

    #[test]
    fn test_plain_assignment() {
        let r = split("foo[^a] = bar[^a];");
        assert_eq!(r.kind, SplitKind::Assign);
        assert_eq!(r.left, "foo[^a]");
        assert_eq!(r.right, "bar[^a]");
        assert!(r.semicolon);
        assert!(!r.comma);
        assert_eq!(r.split_offset, 7);
    }

    #[test]
    fn test_accumulation() {
        let r = split("total[^a] += term[^a];");
        assert_eq!(r.kind, SplitKind::Accumulate);
        assert_eq!(r.left, "total[^a]");
        assert_eq!(r.right, "term[^a]");
        assert!(r.semicolon);
    }

    #[test]
    fn test_no_operator_is_all_right_side() {
        let r = split("  $HEADER{model}");
        assert_eq!(r.kind, SplitKind::None);
        assert_eq!(r.left, "");
        // leading whitespace survives; only the right edge is trimmed
        assert_eq!(r.right, "  $HEADER{model}");
        assert_eq!(r.right_offset, 0);
    }

    #[test]
    fn test_trailing_comma_flag() {
        let r = split("values[^a] = $COEFF[^a],");
        assert!(r.comma);
        assert!(!r.semicolon);
        assert_eq!(r.right, "$COEFF[^a]");
    }

    #[test]
    fn test_left_keeps_indentation() {
        let r = split("    foo = bar;");
        assert_eq!(r.left, "    foo");
        assert_eq!(r.right, "bar");
    }

    #[test]
    fn test_right_offset_accounts_for_trim() {
        let r = split("foo =  bar");
        // operator at 3, length 3, one extra space trimmed
        assert_eq!(r.right_offset, 7);
        assert_eq!(&"foo =  bar"[r.right_offset..], "bar");
    }

    #[test]
    fn test_accumulate_not_shadowed_by_assign() {
        // " += " must not be claimed by the " = " search: the character
        // before '=' is '+', not a space
        let r = split("x += y");
        assert_eq!(r.kind, SplitKind::Accumulate);
        assert_eq!(r.left, "x");
        assert_eq!(r.right, "y");
    }
}
