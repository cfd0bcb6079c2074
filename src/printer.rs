/// Output-language conventions consumed by the emitters: comment
/// syntax, for-loop syntax, and block delimiter/indent conventions.
pub trait LanguagePrinter {
    /// Dress `text` as a single-line comment.
    fn comment(&self, text: &str) -> String;

    /// A loop header iterating `variable` over `start..start+range`.
    fn for_loop(&self, variable: &str, start: u32, range: u32) -> String;

    /// Opening block delimiter, if the language uses one.
    fn start_block_delimiter(&self) -> Option<String>;

    /// Closing block delimiter, if the language uses one.
    fn end_block_delimiter(&self) -> Option<String>;

    /// Extra indentation applied to a block's body.
    fn block_indent(&self) -> usize;

    /// Extra indentation applied to the block delimiters themselves.
    fn block_delimiter_indent(&self) -> usize;
}

/// C++-flavoured printer; the default target for generated
/// integration code.
#[derive(Debug, Default, Clone, Copy)]
pub struct CxxPrinter;

impl LanguagePrinter for CxxPrinter {
    fn comment(&self, text: &str) -> String {
        format!("// {}", text)
    }

    fn for_loop(&self, variable: &str, start: u32, range: u32) -> String {
        format!(
            "for(unsigned int {var} = {start}; {var} < {end}; ++{var})",
            var = variable,
            start = start,
            end = start + range
        )
    }

    fn start_block_delimiter(&self) -> Option<String> {
        Some("{".to_string())
    }

    fn end_block_delimiter(&self) -> Option<String> {
        Some("}".to_string())
    }

    fn block_indent(&self) -> usize {
        2
    }

    fn block_delimiter_indent(&self) -> usize {
        0
    }
}
