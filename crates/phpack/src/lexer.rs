//! Lexical classification of raw PHP source text
//!
//! The classifier turns source text into a lazy stream of typed tokens. It
//! only distinguishes the categories the merge engine cares about: comments
//! (dropped from output), whitespace (preserved verbatim), `use` /
//! `namespace` / inclusion keywords, and open/close tags of embedded PHP
//! regions. Everything else falls through to plain code and is re-emitted
//! byte for byte, so the classifier never needs to understand expression
//! grammar.

use thiserror::Error;

/// Category of a lexical token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// `<?php`, `<?=` or short `<?` opening tag
    OpenTag,
    /// `?>` closing tag
    CloseTag,
    /// Raw markup outside any PHP region
    InlineHtml,
    /// `//`, `#` or `/* ... */` comment
    Comment,
    /// `/** ... */` doc comment
    DocComment,
    /// Run of ASCII whitespace
    Whitespace,
    /// `use` keyword (import alias or function-local capture list)
    Use,
    /// `namespace` keyword
    Namespace,
    /// Eagerly inlined inclusion: `require`, `require_once`, `include_once`
    Require,
    /// Lazy inclusion: plain `include`, never inlined
    Include,
    /// Identifier or non-inclusion keyword
    Identifier,
    /// `$name` variable
    Variable,
    /// Numeric literal
    Number,
    /// Single- or double-quoted string literal, quotes included
    StringLiteral,
    /// Heredoc/nowdoc block, opener through terminating label
    Heredoc,
    /// Any single punctuation character
    Punct,
}

/// One classified token borrowing its text from the source string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexToken<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
}

impl LexToken<'_> {
    /// True for tokens the merge engine drops from output entirely.
    pub fn is_dropped(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::OpenTag | TokenKind::CloseTag | TokenKind::Comment | TokenKind::DocComment
        )
    }
}

/// Raised when the source cannot be tokenized at all. Anything short of
/// this degrades to a plain-code token instead of failing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("unterminated string literal starting on line {line}")]
    UnterminatedString { line: usize },
    #[error("unterminated heredoc `{label}` starting on line {line}")]
    UnterminatedHeredoc { label: String, line: usize },
}

/// Tokenize `src`, yielding tokens lazily. The iterator is finite and
/// non-restartable; after the first error it yields nothing further.
pub fn tokenize(src: &str) -> Tokens<'_> {
    Tokens {
        src,
        pos: 0,
        line: 1,
        in_php: false,
        failed: false,
    }
}

/// Lazy token stream over one source string.
#[derive(Debug)]
pub struct Tokens<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    in_php: bool,
    failed: bool,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || (c as u32) >= 0x80
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || (c as u32) >= 0x80
}

fn keyword_kind(word: &str) -> TokenKind {
    if word.eq_ignore_ascii_case("use") {
        TokenKind::Use
    } else if word.eq_ignore_ascii_case("namespace") {
        TokenKind::Namespace
    } else if word.eq_ignore_ascii_case("require")
        || word.eq_ignore_ascii_case("require_once")
        || word.eq_ignore_ascii_case("include_once")
    {
        TokenKind::Require
    } else if word.eq_ignore_ascii_case("include") {
        TokenKind::Include
    } else {
        TokenKind::Identifier
    }
}

impl<'a> Tokens<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    /// Cut a token of `len` bytes off the front of the remaining input.
    fn emit(&mut self, kind: TokenKind, len: usize) -> LexToken<'a> {
        let text = &self.src[self.pos..self.pos + len];
        self.pos += len;
        self.line += text.matches('\n').count();
        LexToken { kind, text }
    }

    fn fail(&mut self, error: LexError) -> Option<Result<LexToken<'a>, LexError>> {
        self.failed = true;
        Some(Err(error))
    }

    fn next_html(&mut self) -> LexToken<'a> {
        let rest = self.rest();
        match rest.find("<?") {
            Some(0) => {
                let len = if rest.len() >= 5 && rest[..5].eq_ignore_ascii_case("<?php") {
                    5
                } else if rest.starts_with("<?=") {
                    3
                } else {
                    2
                };
                self.in_php = true;
                self.emit(TokenKind::OpenTag, len)
            }
            Some(n) => self.emit(TokenKind::InlineHtml, n),
            None => self.emit(TokenKind::InlineHtml, rest.len()),
        }
    }

    fn line_comment_len(&self) -> usize {
        let rest = self.rest();
        // A line comment ends at the newline or just before a closing tag.
        let newline = rest.find('\n').unwrap_or(rest.len());
        let close = rest.find("?>").unwrap_or(rest.len());
        newline.min(close)
    }

    fn block_comment(&mut self) -> LexToken<'a> {
        let rest = self.rest();
        let doc = rest.starts_with("/**") && !rest.starts_with("/**/");
        let len = match rest[2..].find("*/") {
            Some(i) => 2 + i + 2,
            // PHP tolerates a comment running to end of input
            None => rest.len(),
        };
        let kind = if doc {
            TokenKind::DocComment
        } else {
            TokenKind::Comment
        };
        self.emit(kind, len)
    }

    fn quoted_string(&mut self, quote: char) -> Option<Result<LexToken<'a>, LexError>> {
        let start_line = self.line;
        let rest = self.rest();
        let mut escaped = false;
        for (i, c) in rest.char_indices().skip(1) {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                return Some(Ok(self.emit(TokenKind::StringLiteral, i + c.len_utf8())));
            }
        }
        self.fail(LexError::UnterminatedString { line: start_line })
    }

    /// Parse a `<<<LABEL` opener. Returns `(body_offset, label)` on success;
    /// a malformed opener is not an error, the caller degrades to plain code.
    fn heredoc_opener(rest: &str) -> Option<(usize, &str)> {
        let mut i = 3; // past "<<<"
        let bytes = rest.as_bytes();
        while i < bytes.len() && (bytes[i] == b' ' || bytes[i] == b'\t') {
            i += 1;
        }
        let quote = match bytes.get(i) {
            Some(b'\'') => {
                i += 1;
                Some(b'\'')
            }
            Some(b'"') => {
                i += 1;
                Some(b'"')
            }
            _ => None,
        };
        let label_start = i;
        while i < bytes.len() && rest[i..].starts_with(is_ident_continue) {
            i += rest[i..].chars().next()?.len_utf8();
        }
        if i == label_start {
            return None;
        }
        let label = &rest[label_start..i];
        if let Some(q) = quote {
            if bytes.get(i) != Some(&q) {
                return None;
            }
            i += 1;
        }
        if bytes.get(i) == Some(&b'\r') {
            i += 1;
        }
        if bytes.get(i) != Some(&b'\n') {
            return None;
        }
        Some((i + 1, label))
    }

    fn heredoc(&mut self) -> Option<Result<LexToken<'a>, LexError>> {
        let start_line = self.line;
        let rest = self.rest();
        let Some((body, label)) = Self::heredoc_opener(rest) else {
            // Not a heredoc after all; let `<` fall through as punctuation.
            return Some(Ok(self.emit(TokenKind::Punct, 1)));
        };
        let mut line_start = body;
        loop {
            let line_end = rest[line_start..]
                .find('\n')
                .map_or(rest.len(), |i| line_start + i);
            let line = &rest[line_start..line_end];
            let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
            let candidate = &line[indent..];
            if candidate.starts_with(label)
                && !candidate[label.len()..].starts_with(is_ident_continue)
            {
                let end = line_start + indent + label.len();
                return Some(Ok(self.emit(TokenKind::Heredoc, end)));
            }
            if line_end == rest.len() {
                return self.fail(LexError::UnterminatedHeredoc {
                    label: label.to_owned(),
                    line: start_line,
                });
            }
            line_start = line_end + 1;
        }
    }

    fn next_php(&mut self) -> Option<Result<LexToken<'a>, LexError>> {
        let rest = self.rest();
        if rest.starts_with("?>") {
            self.in_php = false;
            return Some(Ok(self.emit(TokenKind::CloseTag, 2)));
        }
        let c = rest.chars().next()?;
        if c.is_ascii_whitespace() {
            let len = rest
                .find(|ch: char| !ch.is_ascii_whitespace())
                .unwrap_or(rest.len());
            return Some(Ok(self.emit(TokenKind::Whitespace, len)));
        }
        if rest.starts_with("//") || c == '#' {
            let len = self.line_comment_len();
            return Some(Ok(self.emit(TokenKind::Comment, len)));
        }
        if rest.starts_with("/*") {
            return Some(Ok(self.block_comment()));
        }
        if c == '\'' || c == '"' {
            return self.quoted_string(c);
        }
        if rest.starts_with("<<<") {
            return self.heredoc();
        }
        if c == '$' {
            if rest[1..].starts_with(is_ident_start) {
                let len = 1 + rest[1..]
                    .find(|ch: char| !is_ident_continue(ch))
                    .unwrap_or(rest.len() - 1);
                return Some(Ok(self.emit(TokenKind::Variable, len)));
            }
            return Some(Ok(self.emit(TokenKind::Punct, 1)));
        }
        if is_ident_start(c) {
            let len = rest
                .find(|ch: char| !is_ident_continue(ch))
                .unwrap_or(rest.len());
            let kind = keyword_kind(&rest[..len]);
            return Some(Ok(self.emit(kind, len)));
        }
        if c.is_ascii_digit() {
            let len = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '.' || ch == '_'))
                .unwrap_or(rest.len());
            return Some(Ok(self.emit(TokenKind::Number, len)));
        }
        Some(Ok(self.emit(TokenKind::Punct, c.len_utf8())))
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Result<LexToken<'a>, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.src.len() {
            return None;
        }
        if self.in_php {
            self.next_php()
        } else {
            Some(Ok(self.next_html()))
        }
    }
}

impl std::iter::FusedIterator for Tokens<'_> {}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .map(|t| t.expect("tokenizes").kind)
            .collect()
    }

    fn texts(src: &str) -> Vec<String> {
        tokenize(src)
            .map(|t| t.expect("tokenizes").text.to_owned())
            .collect()
    }

    #[test]
    fn classifies_open_close_tags_and_html() {
        assert_eq!(
            kinds("<html><?php $a = 1; ?></html>"),
            vec![
                TokenKind::InlineHtml,
                TokenKind::OpenTag,
                TokenKind::Whitespace,
                TokenKind::Variable,
                TokenKind::Whitespace,
                TokenKind::Punct,
                TokenKind::Whitespace,
                TokenKind::Number,
                TokenKind::Punct,
                TokenKind::Whitespace,
                TokenKind::CloseTag,
                TokenKind::InlineHtml,
            ]
        );
    }

    #[test]
    fn round_trips_source_text() {
        let src = "<?php\nfunction f( $x ) { return $x + 41.5; }\n?>trailer";
        assert_eq!(texts(src).concat(), src);
    }

    #[test]
    fn distinguishes_comment_flavors() {
        let src = "<?php // line\n# hash\n/* block */ /** doc */ $x;";
        let toks: Vec<_> = tokenize(src).map(|t| t.expect("tokenizes")).collect();
        let comments: Vec<_> = toks
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::Comment | TokenKind::DocComment))
            .map(|t| (t.kind, t.text))
            .collect();
        assert_eq!(
            comments,
            vec![
                (TokenKind::Comment, "// line"),
                (TokenKind::Comment, "# hash"),
                (TokenKind::Comment, "/* block */"),
                (TokenKind::DocComment, "/** doc */"),
            ]
        );
    }

    #[test]
    fn line_comment_stops_before_close_tag() {
        assert_eq!(
            kinds("<?php // trailing ?>"),
            vec![
                TokenKind::OpenTag,
                TokenKind::Whitespace,
                TokenKind::Comment,
                TokenKind::CloseTag,
            ]
        );
    }

    #[test]
    fn inclusion_keywords_split_eager_and_lazy() {
        assert_eq!(keyword_kind("require"), TokenKind::Require);
        assert_eq!(keyword_kind("REQUIRE_ONCE"), TokenKind::Require);
        assert_eq!(keyword_kind("include_once"), TokenKind::Require);
        assert_eq!(keyword_kind("include"), TokenKind::Include);
        assert_eq!(keyword_kind("requires"), TokenKind::Identifier);
    }

    #[test]
    fn strings_swallow_keywords_and_escapes() {
        let src = r#"<?php $p = 'a require b'; $q = "say \"use\"";"#;
        let strings: Vec<_> = tokenize(src)
            .map(|t| t.expect("tokenizes"))
            .filter(|t| t.kind == TokenKind::StringLiteral)
            .map(|t| t.text.to_owned())
            .collect();
        assert_eq!(strings, vec!["'a require b'", r#""say \"use\"""#]);
    }

    #[test]
    fn heredoc_spans_to_label() {
        let src = "<?php $v = <<<'EOT'\nnamespace fake\\ns;\nEOT;\n";
        let toks: Vec<_> = tokenize(src).map(|t| t.expect("tokenizes")).collect();
        let heredoc = toks
            .iter()
            .find(|t| t.kind == TokenKind::Heredoc)
            .expect("heredoc token");
        assert_eq!(heredoc.text, "<<<'EOT'\nnamespace fake\\ns;\nEOT");
        assert_eq!(texts(src).concat(), src);
    }

    #[test]
    fn unterminated_string_is_a_lex_error() {
        let last = tokenize("<?php $x = 'oops").last().expect("token");
        assert_eq!(last, Err(LexError::UnterminatedString { line: 1 }));
    }

    #[test]
    fn unterminated_heredoc_is_a_lex_error() {
        let last = tokenize("<?php $x = <<<EOT\nno end").last().expect("token");
        assert_eq!(
            last,
            Err(LexError::UnterminatedHeredoc {
                label: "EOT".to_owned(),
                line: 1,
            })
        );
    }

    #[test]
    fn malformed_heredoc_opener_degrades_to_punctuation() {
        // `<<<` followed by an operator is not a heredoc; nothing fails.
        assert!(tokenize("<?php $x = 1 <<< 2;").all(|t| t.is_ok()));
    }
}
