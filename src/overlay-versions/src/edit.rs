//! Line-preserving edits of block-style YAML.
//!
//! Only the handful of shapes used by kustomization files are understood:
//! block mappings, block sequences and scalars on a single line. Anything
//! else (flow collections, anchors, multi-line plain scalars) is treated as
//! opaque and reported as not editable. Every byte outside the edited values
//! is kept as it was.

use crate::model::LineEdit;

use std::cmp::Reverse;
use std::ops::Range;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScalarStyle {
    Plain,
    DoubleQuoted,
    SingleQuoted,
    /// `|` or `>` indicator; content lives on the following lines.
    Block,
    /// Flow collections, anchors, aliases and tags.
    Opaque,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Entry {
    pub indent: usize,
    pub dash: bool,
    pub key_col: usize,
    pub key: String,
    pub value: Option<ValueSpan>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ValueSpan {
    pub start: usize,
    pub end: usize,
    pub style: ScalarStyle,
}

enum PendingEdit {
    Replace { line: usize, content: String },
    Insert { at: usize, lines: Vec<String> },
}

pub(crate) struct Document {
    /// Raw lines including their terminators.
    lines: Vec<String>,
    newline: &'static str,
    pending: Vec<PendingEdit>,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let lines = text.split_inclusive('\n').map(str::to_string).collect::<Vec<_>>();
        let newline = if lines.first().map_or(false, |l| l.ends_with("\r\n")) {
            "\r\n"
        } else {
            "\n"
        };
        Self {
            lines,
            newline,
            pending: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn root(&self) -> Range<usize> {
        0..self.lines.len()
    }

    /// Line text without its terminator.
    pub fn content(&self, line: usize) -> &str {
        self.lines[line].trim_end_matches('\n').trim_end_matches('\r')
    }

    /// Blank lines, comments, and the `---`/`...` markers or `%` directives
    /// framing a document carry no content.
    fn is_blank(&self, line: usize) -> bool {
        let content = self.content(line);
        let trimmed = content.trim_start();
        trimmed.is_empty() || trimmed.starts_with('#') || is_document_marker(content)
    }

    fn is_dash(&self, line: usize) -> bool {
        let trimmed = self.content(line).trim_start();
        trimmed == "-" || trimmed.starts_with("- ")
    }

    pub fn indent(&self, line: usize) -> usize {
        let content = self.content(line);
        content.len() - content.trim_start_matches(' ').len()
    }

    pub fn entry(&self, line: usize) -> Option<Entry> {
        parse_entry(self.content(line))
    }

    pub fn key_col(&self, line: usize) -> Option<usize> {
        self.entry(line).map(|e| e.key_col)
    }

    pub fn style(&self, line: usize) -> Option<ScalarStyle> {
        self.entry(line)?.value.map(|v| v.style)
    }

    /// Lines making up the value of the key on `line`, without trailing
    /// blank or comment lines.
    pub fn children(&self, line: usize) -> Range<usize> {
        let Some(entry) = self.entry(line) else {
            return line + 1..line + 1;
        };
        let col = entry.key_col;
        let mut last = line + 1;
        for j in line + 1..self.lines.len() {
            if self.is_blank(j) {
                continue;
            }
            let indent = self.indent(j);
            if indent > col || (indent == col && self.is_dash(j)) {
                last = j + 1;
            } else {
                break;
            }
        }
        line + 1..last
    }

    fn first_significant(&self, range: Range<usize>) -> Option<usize> {
        range.into_iter().find(|&j| !self.is_blank(j))
    }

    /// Column of the keys of the mapping spanning `range`.
    pub fn mapping_col(&self, range: Range<usize>) -> Option<usize> {
        for j in range {
            if self.is_blank(j) {
                continue;
            }
            match self.entry(j) {
                Some(entry) => return Some(entry.key_col),
                // a bare `-` opens an item whose mapping starts on the next line
                None if self.content(j).trim() == "-" => continue,
                None => return None,
            }
        }
        None
    }

    /// Ranges of the items of the block sequence spanning `range`.
    pub fn items(&self, range: Range<usize>) -> Vec<Range<usize>> {
        let Some(first) = self.first_significant(range.clone()) else {
            return Vec::new();
        };
        if !self.is_dash(first) {
            return Vec::new();
        }
        let dash_indent = self.indent(first);
        let starts = (first..range.end)
            .filter(|&j| !self.is_blank(j) && self.indent(j) == dash_indent && self.is_dash(j))
            .collect::<Vec<_>>();

        starts
            .iter()
            .enumerate()
            .map(|(i, &start)| {
                let end = starts.get(i + 1).copied().unwrap_or(range.end);
                start..self.trim_trailing(start..end)
            })
            .collect()
    }

    fn trim_trailing(&self, range: Range<usize>) -> usize {
        let mut end = range.end;
        while end > range.start + 1 && self.is_blank(end - 1) {
            end -= 1;
        }
        end
    }

    pub fn find_key(&self, range: Range<usize>, key: &str) -> Option<usize> {
        let col = self.mapping_col(range.clone())?;
        let mut j = range.start;
        while j < range.end {
            if self.is_blank(j) {
                j += 1;
                continue;
            }
            match self.entry(j) {
                Some(entry) if entry.key_col == col => {
                    if entry.key == key {
                        return Some(j);
                    }
                    j = self.children(j).end.max(j + 1);
                }
                _ => j += 1,
            }
        }
        None
    }

    pub fn lookup(&self, range: Range<usize>, path: &[&str]) -> Option<usize> {
        let (first, rest) = path.split_first()?;
        let line = self.find_key(range, first)?;
        if rest.is_empty() {
            Some(line)
        } else {
            self.lookup(self.children(line), rest)
        }
    }

    /// Unquoted scalar value of the key on `line`.
    pub fn scalar(&self, line: usize) -> Option<String> {
        let entry = self.entry(line)?;
        let span = entry.value?;
        let raw = &self.content(line)[span.start..span.end];
        match span.style {
            ScalarStyle::Plain => Some(raw.to_string()),
            ScalarStyle::DoubleQuoted => Some(unescape_double(&raw[1..raw.len() - 1])),
            ScalarStyle::SingleQuoted => Some(raw[1..raw.len() - 1].replace("''", "'")),
            ScalarStyle::Block | ScalarStyle::Opaque => None,
        }
    }

    /// Queues replacement of the scalar on `line`, keeping its quoting style.
    /// Returns `None` when the value is not a single-line scalar.
    pub fn replace_scalar(&mut self, line: usize, value: &str) -> Option<()> {
        let entry = self.entry(line)?;
        let span = entry.value?;
        let rendered = match span.style {
            ScalarStyle::Plain => value.to_string(),
            ScalarStyle::DoubleQuoted => format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\"")),
            ScalarStyle::SingleQuoted => format!("'{}'", value.replace('\'', "''")),
            ScalarStyle::Block | ScalarStyle::Opaque => return None,
        };
        let content = self.content(line);
        let content = format!("{}{}{}", &content[..span.start], rendered, &content[span.end..]);
        self.pending.push(PendingEdit::Replace { line, content });
        Some(())
    }

    /// Queues `lines` (without terminators) to be inserted before line `at`.
    pub fn insert(&mut self, at: usize, lines: Vec<String>) {
        self.pending.push(PendingEdit::Insert { at, lines });
    }

    pub fn has_edits(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Applies queued edits and returns the new text with a line diff
    /// expressed against the original line numbers.
    pub fn render(self) -> (String, Vec<LineEdit>) {
        let Document {
            mut lines,
            newline,
            pending,
        } = self;
        let mut diff = Vec::new();
        let mut inserts = Vec::new();

        for edit in pending {
            match edit {
                PendingEdit::Replace { line, content } => {
                    let old = &lines[line];
                    let body_len = old.trim_end_matches('\n').trim_end_matches('\r').len();
                    let replaced = format!("{content}{}", &old[body_len..]);
                    diff.push(LineEdit {
                        line: line + 1,
                        removed: Some(old[..body_len].to_string()),
                        added: vec![content],
                    });
                    lines[line] = replaced;
                }
                PendingEdit::Insert { at, lines } => inserts.push((at, lines)),
            }
        }

        // At one position, lines continuing an open block go above new
        // top-level sections; otherwise inserts keep their queue order.
        let mut inserts = inserts
            .into_iter()
            .enumerate()
            .map(|(seq, (at, new_lines))| (at, Reverse(leading_indent(&new_lines)), seq, new_lines))
            .collect::<Vec<_>>();
        inserts.sort_by_key(|(at, indent, seq, _)| (*at, *indent, *seq));
        diff.extend(inserts.iter().map(|(at, _, _, new_lines)| LineEdit {
            line: *at,
            removed: None,
            added: new_lines.clone(),
        }));

        // splice bottom-up so earlier positions stay valid
        for (at, _, _, new_lines) in inserts.into_iter().rev() {
            if at > 0 && !lines[at - 1].ends_with('\n') {
                lines[at - 1].push_str(newline);
            }
            let rendered = new_lines.into_iter().map(|l| format!("{l}{newline}"));
            lines.splice(at..at, rendered);
        }

        diff.sort_by_key(|edit| (edit.line, edit.removed.is_none()));
        (lines.concat(), diff)
    }
}

fn leading_indent(lines: &[String]) -> usize {
    lines
        .first()
        .map_or(0, |line| line.len() - line.trim_start_matches(' ').len())
}

fn is_document_marker(content: &str) -> bool {
    if content.starts_with('%') {
        return true;
    }
    ["---", "..."].iter().any(|marker| {
        content
            .strip_prefix(marker)
            .map_or(false, |rest| rest.is_empty() || rest.starts_with([' ', '\t']))
    })
}

fn unescape_double(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub(crate) fn parse_entry(content: &str) -> Option<Entry> {
    let indent = content.len() - content.trim_start_matches(' ').len();
    let mut pos = indent;
    let rest = &content[pos..];
    if rest.is_empty() || rest.starts_with('#') {
        return None;
    }

    let dash = rest == "-" || rest.starts_with("- ");
    if dash {
        pos += 1;
        pos += content[pos..].len() - content[pos..].trim_start_matches(' ').len();
    }
    let key_col = pos;
    let rest = &content[pos..];
    if rest.is_empty() {
        return None;
    }

    let (key, after_key) = match rest.as_bytes()[0] {
        quote @ (b'"' | b'\'') => {
            let close = rest[1..].find(quote as char)? + 1;
            let key = rest[1..close].to_string();
            let after = pos + close + 1;
            if !content[after..].starts_with(':') {
                return None;
            }
            (key, after)
        }
        b'[' | b'{' | b'|' | b'>' | b'#' | b'&' | b'*' | b'!' | b'%' | b'@' | b'`' => return None,
        _ => {
            let colon = find_mapping_colon(rest)?;
            let key = rest[..colon].trim_end().to_string();
            if key.is_empty() {
                return None;
            }
            (key, pos + colon)
        }
    };

    // skip ':' and separating whitespace
    let mut start = after_key + 1;
    start += content[start..].len() - content[start..].trim_start_matches([' ', '\t']).len();
    let value = value_span(content, start);

    Some(Entry {
        indent,
        dash,
        key_col,
        key,
        value,
    })
}

/// Position of the `:` separating a plain key from its value.
fn find_mapping_colon(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'#' if i > 0 && bytes[i - 1] == b' ' => return None,
            b':' if i + 1 == bytes.len() || bytes[i + 1] == b' ' || bytes[i + 1] == b'\t' => {
                return Some(i)
            }
            _ => {}
        }
    }
    None
}

fn value_span(content: &str, start: usize) -> Option<ValueSpan> {
    let rest = &content[start..];
    if rest.is_empty() || rest.starts_with('#') {
        return None;
    }

    let (end, style) = match rest.as_bytes()[0] {
        b'"' => {
            let mut escaped = false;
            let mut close = None;
            for (i, c) in rest.char_indices().skip(1) {
                match c {
                    '\\' if !escaped => escaped = true,
                    '"' if !escaped => {
                        close = Some(i);
                        break;
                    }
                    _ => escaped = false,
                }
            }
            (start + close? + 1, ScalarStyle::DoubleQuoted)
        }
        b'\'' => {
            let bytes = rest.as_bytes();
            let mut i = 1;
            let close = loop {
                if i >= bytes.len() {
                    return None;
                }
                if bytes[i] == b'\'' {
                    if bytes.get(i + 1) == Some(&b'\'') {
                        i += 2;
                        continue;
                    }
                    break i;
                }
                i += 1;
            };
            (start + close + 1, ScalarStyle::SingleQuoted)
        }
        b'|' | b'>' => (content.len(), ScalarStyle::Block),
        b'[' | b'{' | b'&' | b'*' | b'!' => (content.len(), ScalarStyle::Opaque),
        _ => {
            let end = rest.find(" #").unwrap_or(rest.len());
            let end = rest[..end].trim_end().len();
            (start + end, ScalarStyle::Plain)
        }
    };

    Some(ValueSpan { start, end, style })
}
