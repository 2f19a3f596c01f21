//! Splits script text into executable batches
//!
//! A separator only counts when it is the whole line (ignoring surrounding
//! whitespace and case) and the line starts outside any string literal,
//! quoted identifier, block comment or dollar-quoted body.

/// The batch convention of one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSeparator {
    /// The whole script is one batch
    None,
    /// A line holding only this token ends a batch (e.g. `GO`)
    Line(&'static str),
}

/// Lexical state carried from one line to the next.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
enum Lexical {
    #[default]
    Code,
    SingleQuote,
    DoubleQuote,
    BlockComment(usize),
    Dollar(String),
}

impl Lexical {
    /// Advance over one line (without its terminator).
    fn scan_line(&mut self, line: &str) {
        let chars: Vec<char> = line.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();
            match self {
                Lexical::Code => match (c, next) {
                    ('-', Some('-')) => return,
                    ('/', Some('*')) => {
                        *self = Lexical::BlockComment(1);
                        i += 1;
                    }
                    ('\'', _) => *self = Lexical::SingleQuote,
                    ('"', _) => *self = Lexical::DoubleQuote,
                    ('$', _) => {
                        if let Some(tag_len) = dollar_tag_len(&chars[i..]) {
                            let tag: String = chars[i + 1..i + tag_len - 1].iter().collect();
                            *self = Lexical::Dollar(tag);
                            i += tag_len - 1;
                        }
                    }
                    _ => {}
                },
                Lexical::SingleQuote => {
                    if c == '\'' {
                        if next == Some('\'') {
                            i += 1;
                        } else {
                            *self = Lexical::Code;
                        }
                    }
                }
                Lexical::DoubleQuote => {
                    if c == '"' {
                        if next == Some('"') {
                            i += 1;
                        } else {
                            *self = Lexical::Code;
                        }
                    }
                }
                Lexical::BlockComment(depth) => match (c, next) {
                    ('*', Some('/')) => {
                        let depth = *depth;
                        *self = if depth == 1 {
                            Lexical::Code
                        } else {
                            Lexical::BlockComment(depth - 1)
                        };
                        i += 1;
                    }
                    ('/', Some('*')) => {
                        *depth += 1;
                        i += 1;
                    }
                    _ => {}
                },
                Lexical::Dollar(tag) => {
                    if c == '$' {
                        let closing: Vec<char> = format!("${}$", tag).chars().collect();
                        if chars[i..].starts_with(&closing) {
                            i += closing.len() - 1;
                            *self = Lexical::Code;
                        }
                    }
                }
            }
            i += 1;
        }
    }
}

/// Length of a `$tag$` opener at the start of `chars`, if there is one.
fn dollar_tag_len(chars: &[char]) -> Option<usize> {
    let body = chars.get(1..)?;
    let end = body
        .iter()
        .position(|&c| !(c.is_ascii_alphanumeric() || c == '_'))?;
    // `$1` is a positional parameter, not a tag
    if body[..end].first().is_some_and(|c| c.is_ascii_digit()) {
        return None;
    }
    (body[end] == '$').then_some(end + 2)
}

/// Cuts one script into batches according to a [`BatchSeparator`].
#[derive(Debug, Clone, Copy)]
pub struct StatementSplitter {
    separator: BatchSeparator,
}

impl StatementSplitter {
    pub fn new(separator: BatchSeparator) -> Self {
        Self { separator }
    }

    /// Ordered, non-blank batches. A blank script yields no batches.
    pub fn split(&self, sql: &str) -> Vec<String> {
        let token = match self.separator {
            BatchSeparator::None => return non_blank(sql).into_iter().collect(),
            BatchSeparator::Line(token) => token,
        };

        let mut batches = Vec::new();
        let mut current = String::new();
        let mut state = Lexical::Code;

        for line in sql.split_inclusive('\n') {
            let content = line.trim_end_matches(&['\n', '\r'][..]);
            if state == Lexical::Code && content.trim().eq_ignore_ascii_case(token) {
                batches.extend(non_blank(&current));
                current.clear();
                continue;
            }
            state.scan_line(content);
            current.push_str(line);
        }
        batches.extend(non_blank(&current));
        batches
    }
}

fn non_blank(segment: &str) -> Option<String> {
    let trimmed = segment.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
#[path = "splitter_test.rs"]
mod tests;
