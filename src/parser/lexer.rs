//! Lexer (tokenizer) for template source
//!
//! Converts raw template text into a flat [`Token`] stream consumed by the
//! tag parser. The stream has exactly four token kinds: literal text,
//! `{{ ... }}` variables, `{% ... %}` block tags, and `{# ... #}` comments.
//!
//! The lexer never fails: malformed or unterminated delimiters degrade to
//! literal text, and all hard errors are reported by the parser with line
//! information.
//!
//! # Verbatim mode
//!
//! Once a `{% verbatim [name] %}` block token is seen, every would-be tag is
//! emitted as TEXT (delimiters intact) until the matching
//! `{% endverbatim [name] %}` token, which itself comes out as a BLOCK token.
//!
//! # Spans
//!
//! [`Lexer::with_spans`] additionally records each token's byte range for
//! debug-mode diagnostics; the default constructor records none, keeping the
//! common path free of the bookkeeping.

use std::fmt;

const BLOCK_TAG_START: &str = "{%";
const BLOCK_TAG_END: &str = "%}";
const VARIABLE_TAG_START: &str = "{{";
const VARIABLE_TAG_END: &str = "}}";
const COMMENT_TAG_END: &str = "#}";

/// The four token kinds produced by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Text,
    Variable,
    Block,
    Comment,
}

/// One lexed token.
///
/// For tag tokens, `contents` is the text between the delimiters, trimmed;
/// for TEXT tokens it is the raw text. `line` is the line the token starts
/// on; `span` is the byte range in the source when the span-recording lexer
/// ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub contents: String,
    pub line: usize,
    pub span: Option<(usize, usize)>,
}

impl Token {
    /// Split the contents on whitespace, honoring quoted substrings: the
    /// bits of `{% cycle 'a b' c %}` are `cycle`, `'a b'`, and `c`.
    pub fn split_contents(&self) -> Vec<String> {
        smart_split(&self.contents)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let head: String = self.contents.chars().take(20).collect();
        match self.kind {
            TokenKind::Text => write!(f, "text token \"{}\"", head),
            TokenKind::Variable => write!(f, "variable token \"{}\"", head),
            TokenKind::Block => write!(f, "block token \"{}\"", head),
            TokenKind::Comment => write!(f, "comment token \"{}\"", head),
        }
    }
}

/// Split on whitespace outside of quotes. Quoted sections stay attached to
/// the bit they appear in, quotes included, so `a|default:"x y"` is one bit.
pub(crate) fn smart_split(text: &str) -> Vec<String> {
    let mut bits = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for ch in text.chars() {
        match quote {
            Some(q) => {
                current.push(ch);
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
            }
            None => {
                if ch.is_whitespace() {
                    if !current.is_empty() {
                        bits.push(std::mem::take(&mut current));
                    }
                } else {
                    if ch == '\'' || ch == '"' {
                        quote = Some(ch);
                    }
                    current.push(ch);
                }
            }
        }
    }
    if !current.is_empty() {
        bits.push(current);
    }
    bits
}

/// Template lexer.
pub struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    verbatim: Option<String>,
    record_spans: bool,
}

impl<'a> Lexer<'a> {
    /// Create a lexer for the given source string.
    pub fn new(source: &'a str) -> Self {
        Lexer {
            source,
            pos: 0,
            line: 1,
            verbatim: None,
            record_spans: false,
        }
    }

    /// Create a lexer that also records byte spans per token, for
    /// debug-mode diagnostics. Tokenization is otherwise identical.
    pub fn with_spans(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        lexer.record_spans = true;
        lexer
    }

    /// Tokenize the entire input.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();

        while self.pos < self.source.len() {
            match self.find_tag_start() {
                Some((tag_start, end_delim)) => {
                    if tag_start > self.pos {
                        tokens.push(self.text_token(self.pos, tag_start));
                    }
                    match self.find_tag_end(tag_start, end_delim) {
                        Some(tag_end) => {
                            tokens.push(self.tag_token(tag_start, tag_end));
                        }
                        None => {
                            // Unterminated tag: the rest is literal text.
                            tokens.push(self.text_token(self.pos, self.source.len()));
                        }
                    }
                }
                None => {
                    tokens.push(self.text_token(self.pos, self.source.len()));
                }
            }
        }

        tokens
    }

    /// Find the next tag opener at or after the cursor, returning its byte
    /// offset and the closing delimiter to look for.
    fn find_tag_start(&self) -> Option<(usize, &'static str)> {
        let bytes = self.source.as_bytes();
        let mut i = self.pos;
        while i + 1 < bytes.len() {
            if bytes[i] == b'{' {
                match bytes[i + 1] {
                    b'%' => return Some((i, BLOCK_TAG_END)),
                    b'{' => return Some((i, VARIABLE_TAG_END)),
                    b'#' => return Some((i, COMMENT_TAG_END)),
                    _ => {}
                }
            }
            i += 1;
        }
        None
    }

    /// Find the end of a tag that opened at `tag_start`, returning the byte
    /// offset one past its closing delimiter.
    fn find_tag_end(&self, tag_start: usize, end_delim: &str) -> Option<usize> {
        self.source[tag_start + 2..]
            .find(end_delim)
            .map(|i| tag_start + 2 + i + 2)
    }

    /// Emit the raw text between `start` and `end` as a TEXT token.
    fn text_token(&mut self, start: usize, end: usize) -> Token {
        let raw = &self.source[start..end];
        let token = Token {
            kind: TokenKind::Text,
            contents: raw.to_string(),
            line: self.line,
            span: self.record_spans.then_some((start, end)),
        };
        self.line += raw.matches('\n').count();
        self.pos = end;
        token
    }

    /// Emit the tag occupying `[start, end)`, honoring verbatim mode.
    fn tag_token(&mut self, start: usize, end: usize) -> Token {
        let raw = &self.source[start..end];
        let contents = raw[2..raw.len() - 2].trim().to_string();
        let kind = match &raw[..2] {
            BLOCK_TAG_START => TokenKind::Block,
            VARIABLE_TAG_START => TokenKind::Variable,
            _ => TokenKind::Comment,
        };

        let forced_text = match &self.verbatim {
            Some(marker) => {
                if kind == TokenKind::Block && contents == *marker {
                    self.verbatim = None;
                    false
                } else {
                    true
                }
            }
            None => {
                if kind == TokenKind::Block
                    && (contents == "verbatim" || contents.starts_with("verbatim "))
                {
                    self.verbatim = Some(format!("end{}", contents));
                }
                false
            }
        };

        let token = if forced_text {
            Token {
                kind: TokenKind::Text,
                contents: raw.to_string(),
                line: self.line,
                span: self.record_spans.then_some((start, end)),
            }
        } else {
            Token {
                kind,
                contents,
                line: self.line,
                span: self.record_spans.then_some((start, end)),
            }
        };

        self.line += raw.matches('\n').count();
        self.pos = end;
        token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_plain_text_is_one_token() {
        let tokens = Lexer::new("hello world").tokenize();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Text);
        assert_eq!(tokens[0].contents, "hello world");
    }

    #[test]
    fn test_all_four_kinds() {
        let tokens = Lexer::new("a{{ x }}b{% if y %}c{# note #}").tokenize();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Text,
                TokenKind::Variable,
                TokenKind::Text,
                TokenKind::Block,
                TokenKind::Text,
                TokenKind::Comment,
            ]
        );
        assert_eq!(tokens[1].contents, "x");
        assert_eq!(tokens[3].contents, "if y");
        assert_eq!(tokens[5].contents, "note");
    }

    #[test]
    fn test_line_numbers() {
        let tokens = Lexer::new("a\nb\n{{ x }}\n{% if y %}").tokenize();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 3);
        assert_eq!(tokens[3].line, 4);
    }

    #[test]
    fn test_multiline_tag_advances_lines() {
        let tokens = Lexer::new("{% if\ny %}{{ x }}").tokenize();
        assert_eq!(tokens[0].line, 1);
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn test_unterminated_tag_is_text() {
        let tokens = Lexer::new("a{{ x").tokenize();
        assert_eq!(kinds(&tokens), vec![TokenKind::Text, TokenKind::Text]);
        assert_eq!(tokens[1].contents, "{{ x");
    }

    #[test]
    fn test_verbatim_forces_text() {
        let tokens =
            Lexer::new("{% verbatim %}{{ x }}{% if y %}{% endverbatim %}").tokenize();
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Block,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Block,
            ]
        );
        assert_eq!(tokens[1].contents, "{{ x }}");
        assert_eq!(tokens[2].contents, "{% if y %}");
    }

    #[test]
    fn test_named_verbatim_needs_matching_name() {
        let tokens = Lexer::new(
            "{% verbatim v1 %}{% endverbatim %}{% endverbatim v1 %}",
        )
        .tokenize();
        assert_eq!(
            kinds(&tokens),
            vec![TokenKind::Block, TokenKind::Text, TokenKind::Block]
        );
        assert_eq!(tokens[2].contents, "endverbatim v1");
    }

    #[test]
    fn test_spans_recorded_only_on_request() {
        let plain = Lexer::new("a{{ x }}").tokenize();
        assert!(plain.iter().all(|t| t.span.is_none()));
        let debug = Lexer::with_spans("a{{ x }}").tokenize();
        assert_eq!(debug[0].span, Some((0, 1)));
        assert_eq!(debug[1].span, Some((1, 8)));
    }

    #[test]
    fn test_smart_split_honors_quotes() {
        assert_eq!(
            smart_split(r#"cycle 'a b' c "d e""#),
            vec!["cycle", "'a b'", "c", "\"d e\""]
        );
        assert_eq!(
            smart_split(r#"x|default:"a b"|upper"#),
            vec![r#"x|default:"a b"|upper"#]
        );
    }
}
