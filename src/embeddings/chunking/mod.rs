
use std::iter;
use std::sync::LazyLock;

use fancy_regex::Regex;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A markdown ATX heading: one to six `#` followed by a space
static HEADING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(#{1,6}) ").expect("heading pattern is valid"));

const HEADING_SEPARATOR: &str = " > ";

/// Configuration for content chunking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters
    pub max_chunk_size: usize,
    /// Characters shared by consecutive windows when a single run of text has to be cut
    pub overlap_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_chunk_size: 1000,
            overlap_size: 100,
        }
    }
}

/// A zero-based line/column location in the source document.
///
/// Columns count characters, not bytes. End positions are exclusive.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    #[inline]
    pub const fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl std::fmt::Display for Position {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.column + 1)
    }
}

/// A retrieval-sized span of a markdown document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentChunk {
    /// The chunk text, exactly as it appears between `start` and `end`
    pub text: String,
    /// Active headings enclosing the chunk, e.g. `# A > ## B`
    pub heading_context: Option<String>,
    pub start: Position,
    pub end: Position,
}

/// Byte range into the source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    fn is_empty(self) -> bool {
        self.start >= self.end
    }
}

/// Split a markdown document into ordered chunks.
///
/// Headings always start a new chunk. Blocks that exceed `max_chunk_size` are split on
/// paragraph boundaries, then on sentence, inline-code and link boundaries, and finally
/// into fixed character windows.
#[inline]
pub fn chunk_markdown(text: &str, config: &ChunkingConfig) -> Vec<ContentChunk> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let max = config.max_chunk_size.max(1);
    let overlap = config.overlap_size.min(max - 1);
    let index = LineIndex::new(text);
    let mut chunks = Vec::new();

    for block in split_hard_blocks(text) {
        let spans = if char_len(text, block.body) <= max {
            vec![block.body]
        } else {
            soft_split(text, block.body, max, overlap)
        };

        for span in spans {
            chunks.push(ContentChunk {
                text: slice(text, span).to_string(),
                heading_context: block.heading_context.clone(),
                start: index.position(span.start),
                end: index.position(span.end),
            });
        }
    }

    debug!(
        "Chunked {} characters into {} chunks",
        text.len(),
        chunks.len()
    );

    chunks
}

/// Return the text between two positions, or `None` if either lies outside the document
#[inline]
pub fn slice_by_position(text: &str, start: Position, end: Position) -> Option<&str> {
    let index = LineIndex::new(text);
    let start = index.offset(start)?;
    let end = index.offset(end)?;
    text.get(start..end)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockMode {
    Prose,
    Fenced,
}

impl BlockMode {
    fn after_line(self, line: &str) -> Self {
        match (self, is_fence(line)) {
            (Self::Prose, true) => Self::Fenced,
            (Self::Fenced, true) => Self::Prose,
            (mode, false) => mode,
        }
    }
}

#[derive(Debug)]
struct HardBlock {
    heading_context: Option<String>,
    body: Span,
}

fn split_hard_blocks(text: &str) -> Vec<HardBlock> {
    let mut blocks = Vec::new();
    let mut headings: [Option<&str>; 6] = [None; 6];
    let mut mode = BlockMode::Prose;
    let mut context = None;
    let mut body = Span::new(0, 0);
    let mut offset = 0;

    for line in text.split_inclusive('\n') {
        let line_end = offset + line.len();

        let depth = match mode {
            BlockMode::Prose => heading_depth(line),
            BlockMode::Fenced => None,
        };

        if let Some(depth) = depth {
            push_block(&mut blocks, text, context.take(), body);

            headings[depth - 1] = Some(line.trim_end());
            for deeper in headings.iter_mut().skip(depth) {
                *deeper = None;
            }

            context = Some(headings.iter().flatten().join(HEADING_SEPARATOR));
            body = Span::new(line_end, line_end);
        } else {
            mode = mode.after_line(line);
            body.end = line_end;
        }

        offset = line_end;
    }

    push_block(&mut blocks, text, context, body);
    blocks
}

fn push_block(
    blocks: &mut Vec<HardBlock>,
    text: &str,
    heading_context: Option<String>,
    body: Span,
) {
    let body = trim_span(text, body);
    if !body.is_empty() {
        blocks.push(HardBlock {
            heading_context,
            body,
        });
    }
}

fn heading_depth(line: &str) -> Option<usize> {
    HEADING_PATTERN
        .captures(line)
        .ok()
        .flatten()
        .and_then(|captures| captures.get(1))
        .map(|hashes| hashes.as_str().len())
}

fn is_fence(line: &str) -> bool {
    line.trim_start().starts_with("```")
}

fn soft_split(text: &str, body: Span, max: usize, overlap: usize) -> Vec<Span> {
    let paragraphs = split_paragraphs(text, body)
        .into_iter()
        .map(|span| Unit {
            kind: UnitKind::Text,
            span,
        });

    pack_greedy(text, max, paragraphs, |paragraph| {
        split_paragraph(text, paragraph.span, max, overlap)
    })
}

fn split_paragraph(text: &str, paragraph: Span, max: usize, overlap: usize) -> Vec<Span> {
    let units = lex_units(text, paragraph)
        .into_iter()
        .map(|unit| Unit {
            span: trim_span(text, unit.span),
            ..unit
        })
        .filter(|unit| !unit.span.is_empty());

    pack_greedy(text, max, units, |unit| match unit.kind {
        UnitKind::Text => char_windows(text, unit.span, max, overlap),
        UnitKind::InlineCode | UnitKind::Link => vec![unit.span],
    })
}

/// Pack units into spans of at most `max` characters, handing units that are too large on
/// their own to `oversized`
fn pack_greedy<I, F>(text: &str, max: usize, units: I, mut oversized: F) -> Vec<Span>
where
    I: IntoIterator<Item = Unit>,
    F: FnMut(Unit) -> Vec<Span>,
{
    let mut packed = Vec::new();
    let mut current: Option<Span> = None;

    for unit in units {
        let piece = unit.span;
        if char_len(text, piece) > max {
            packed.extend(current.take());
            packed.extend(oversized(unit));
            continue;
        }

        current = match current {
            Some(open) if char_len(text, Span::new(open.start, piece.end)) <= max => {
                Some(Span::new(open.start, piece.end))
            }
            Some(open) => {
                packed.push(open);
                Some(piece)
            }
            None => Some(piece),
        };
    }

    packed.extend(current);
    packed
}

fn split_paragraphs(text: &str, body: Span) -> Vec<Span> {
    let mut paragraphs = Vec::new();
    let mut mode = BlockMode::Prose;
    let mut start = None;
    let mut offset = body.start;

    for line in slice(text, body).split_inclusive('\n') {
        let line_end = offset + line.len();

        if mode == BlockMode::Prose && line.trim().is_empty() {
            if let Some(paragraph_start) = start.take() {
                paragraphs.push(trim_span(text, Span::new(paragraph_start, offset)));
            }
        } else {
            start.get_or_insert(offset);
            mode = mode.after_line(line);
        }

        offset = line_end;
    }

    if let Some(paragraph_start) = start {
        paragraphs.push(trim_span(text, Span::new(paragraph_start, body.end)));
    }

    paragraphs.retain(|paragraph| !paragraph.is_empty());
    paragraphs
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitKind {
    Text,
    InlineCode,
    Link,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Unit {
    kind: UnitKind,
    span: Span,
}

/// Lexer state inside a paragraph. `open` is the index of the opening character so an
/// unterminated construct can be re-read as plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Text,
    InlineCode { open: usize, ticks: usize },
    LinkLabel { open: usize, depth: usize },
    LinkTarget { open: usize, depth: usize },
}

/// Split an oversized paragraph into text, inline-code and link units.
///
/// A backtick run opens a code span that closes on the next run of the same length, so a fenced
/// block inside the paragraph lexes as a single inline-code unit and is never split, even when it
/// is far larger than the chunk budget.
fn lex_units(text: &str, paragraph: Span) -> Vec<Unit> {
    let chars = slice(text, paragraph)
        .char_indices()
        .map(|(i, c)| (paragraph.start + i, c))
        .collect::<Vec<_>>();
    let offset_at = |i: usize| chars.get(i).map_or(paragraph.end, |&(offset, _)| offset);
    let char_at = |i: usize| chars.get(i).map(|&(_, c)| c);

    let mut units = Vec::new();
    let mut run_start = paragraph.start;
    let mut state = LexState::Text;
    let mut i = 0;

    loop {
        while let Some(ch) = char_at(i) {
            let mut advance = 1;

            state = match state {
                LexState::Text => match ch {
                    '`' => {
                        advance = run_length(&chars, i, '`');
                        LexState::InlineCode {
                            open: i,
                            ticks: advance,
                        }
                    }
                    '[' => LexState::LinkLabel { open: i, depth: 0 },
                    '.' | '!' | '?' if char_at(i + 1).is_some_and(char::is_whitespace) => {
                        let end = offset_at(i + 1);
                        push_unit(&mut units, UnitKind::Text, run_start, end);
                        run_start = end;
                        LexState::Text
                    }
                    _ => LexState::Text,
                },
                LexState::InlineCode { open, ticks } if ch == '`' => {
                    advance = run_length(&chars, i, '`');
                    if advance == ticks {
                        let end = offset_at(i + advance);
                        push_unit(&mut units, UnitKind::Text, run_start, offset_at(open));
                        push_unit(&mut units, UnitKind::InlineCode, offset_at(open), end);
                        run_start = end;
                        LexState::Text
                    } else {
                        state
                    }
                }
                LexState::InlineCode { .. } => state,
                LexState::LinkLabel { open, depth } => match ch {
                    '[' => LexState::LinkLabel {
                        open,
                        depth: depth + 1,
                    },
                    ']' if depth > 0 => LexState::LinkLabel {
                        open,
                        depth: depth - 1,
                    },
                    ']' if char_at(i + 1) == Some('(') => {
                        advance = 2;
                        LexState::LinkTarget { open, depth: 0 }
                    }
                    ']' => {
                        // Not a link; re-read everything after the bracket as text
                        advance = 0;
                        i = open + 1;
                        LexState::Text
                    }
                    _ => state,
                },
                LexState::LinkTarget { open, depth } => match ch {
                    '(' => LexState::LinkTarget {
                        open,
                        depth: depth + 1,
                    },
                    ')' if depth > 0 => LexState::LinkTarget {
                        open,
                        depth: depth - 1,
                    },
                    ')' => {
                        let end = offset_at(i + 1);
                        push_unit(&mut units, UnitKind::Text, run_start, offset_at(open));
                        push_unit(&mut units, UnitKind::Link, offset_at(open), end);
                        run_start = end;
                        LexState::Text
                    }
                    _ => state,
                },
            };

            i += advance;
        }

        // Unterminated constructs are literal text; resume right after the opener
        match state {
            LexState::Text => break,
            LexState::InlineCode { open, ticks } => i = open + ticks,
            LexState::LinkLabel { open, .. } | LexState::LinkTarget { open, .. } => i = open + 1,
        }
        state = LexState::Text;
    }

    push_unit(&mut units, UnitKind::Text, run_start, paragraph.end);
    units
}

fn run_length(chars: &[(usize, char)], from: usize, target: char) -> usize {
    chars
        .iter()
        .skip(from)
        .take_while(|&&(_, c)| c == target)
        .count()
}

fn push_unit(units: &mut Vec<Unit>, kind: UnitKind, start: usize, end: usize) {
    let span = Span::new(start, end);
    if !span.is_empty() {
        units.push(Unit { kind, span });
    }
}

/// Fixed-size windows over a run of text that has no better split point
fn char_windows(text: &str, run: Span, max: usize, overlap: usize) -> Vec<Span> {
    let offsets = slice(text, run)
        .char_indices()
        .map(|(i, _)| run.start + i)
        .collect::<Vec<_>>();
    let step = max.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut first = 0;

    while let Some(&start) = offsets.get(first) {
        let last = (first + max).min(offsets.len());
        let end = offsets.get(last).copied().unwrap_or(run.end);

        let window = trim_span(text, Span::new(start, end));
        if !window.is_empty() {
            windows.push(window);
        }

        if last == offsets.len() {
            break;
        }
        first += step;
    }

    windows
}

fn slice(text: &str, span: Span) -> &str {
    text.get(span.start..span.end).unwrap_or_default()
}

fn char_len(text: &str, span: Span) -> usize {
    slice(text, span).chars().count()
}

fn trim_span(text: &str, span: Span) -> Span {
    let raw = slice(text, span);
    let leading = raw.len() - raw.trim_start().len();
    let trimmed = raw.trim().len();
    Span::new(span.start + leading, span.start + leading + trimmed)
}

/// Maps byte offsets to line/column positions and back
struct LineIndex<'t> {
    text: &'t str,
    line_starts: Vec<usize>,
}

impl<'t> LineIndex<'t> {
    fn new(text: &'t str) -> Self {
        let line_starts = iter::once(0)
            .chain(text.match_indices('\n').map(|(i, _)| i + 1))
            .collect();
        Self { text, line_starts }
    }

    fn position(&self, offset: usize) -> Position {
        let line = self
            .line_starts
            .partition_point(|&start| start <= offset)
            .saturating_sub(1);
        let line_start = self.line_starts.get(line).copied().unwrap_or_default();
        let column = char_len(self.text, Span::new(line_start, offset));
        Position { line, column }
    }

    fn offset(&self, position: Position) -> Option<usize> {
        let line_start = *self.line_starts.get(position.line)?;
        let line_end = self
            .line_starts
            .get(position.line + 1)
            .copied()
            .unwrap_or(self.text.len());
        let line = slice(self.text, Span::new(line_start, line_end));

        line.char_indices()
            .map(|(i, _)| i)
            .chain(iter::once(line.len()))
            .nth(position.column)
            .map(|i| line_start + i)
    }
}
