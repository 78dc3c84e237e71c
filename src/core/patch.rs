//! Unified diff model for single files
//!
//! Builds git-style unified diffs in process with `similar`, renders them
//! (optionally without file names or line numbers), parses them back and
//! applies them forward or in reverse with a context-based applier that
//! treats recorded line numbers as a hint only.
//!
//! Line payloads keep their terminating `\n`; a line without one is the last
//! line of a file that lacks a final newline.

use std::fmt::Write as _;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use similar::{Algorithm, DiffTag, capture_diff_slices, group_diff_ops};

/// Context lines around each change.
pub const CONTEXT_LINES: usize = 3;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";
const DEV_NULL: &str = "/dev/null";

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@(?: -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@.*)?$")
        .unwrap_or_else(|e| unreachable!("static hunk regex: {e}"))
});

/// A single hunk in a unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: usize, // 1-based; 0 when unknown or the old side is empty
    pub old_count: usize, // Number of lines in old version
    pub new_start: usize, // 1-based; 0 when unknown or the new side is empty
    pub new_count: usize, // Number of lines in new version
    /// False for bare `@@` headers; positions are then searched from the top
    pub numbered: bool,
    pub lines: Vec<HunkLine>,
}

/// A line in a hunk with its change type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String), // Unchanged line (starts with ' ')
    Remove(String),  // Removed line (starts with '-')
    Add(String),     // Added line (starts with '+')
}

impl HunkLine {
    fn text(&self) -> &str {
        match self {
            HunkLine::Context(s) | HunkLine::Remove(s) | HunkLine::Add(s) => s,
        }
    }
}

/// What a patch does to its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Deleted,
    Modified,
}

impl ChangeKind {
    pub fn reversed(self) -> Self {
        match self {
            ChangeKind::Added => ChangeKind::Deleted,
            ChangeKind::Deleted => ChangeKind::Added,
            ChangeKind::Modified => ChangeKind::Modified,
        }
    }
}

/// A complete patch for one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    pub path: String,
    pub change: ChangeKind,
    pub hunks: Vec<Hunk>,
}

/// Controls how much environment-specific detail is rendered.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    /// Emit `diff --git`, `---` and `+++` header lines
    pub file_names: bool,
    /// Emit `-a,b +c,d` ranges in hunk headers
    pub line_numbers: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            file_names: true,
            line_numbers: true,
        }
    }
}

/// Split keeping terminators; the last element may lack `\n`.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

impl FilePatch {
    /// Diff `old` against `new`; `None` content means the file is absent.
    /// Returns `None` when there is nothing to record.
    pub fn between(path: &str, old: Option<&str>, new: Option<&str>) -> Option<FilePatch> {
        let change = match (old, new) {
            (None, None) => return None,
            (None, Some(_)) => ChangeKind::Added,
            (Some(_), None) => ChangeKind::Deleted,
            (Some(a), Some(b)) if a == b => return None,
            (Some(_), Some(_)) => ChangeKind::Modified,
        };

        let old_lines = split_lines(old.unwrap_or(""));
        let new_lines = split_lines(new.unwrap_or(""));
        let ops = capture_diff_slices(Algorithm::Myers, &old_lines, &new_lines);

        let mut hunks = Vec::new();
        for group in group_diff_ops(ops, CONTEXT_LINES) {
            let (Some(first), Some(last)) = (group.first(), group.last()) else {
                continue;
            };
            let old_range = first.old_range().start..last.old_range().end;
            let new_range = first.new_range().start..last.new_range().end;

            let mut lines = Vec::new();
            for op in &group {
                let (tag, o, n) = op.as_tag_tuple();
                match tag {
                    DiffTag::Equal => {
                        lines.extend(old_lines[o].iter().map(|l| HunkLine::Context(l.to_string())))
                    }
                    DiffTag::Delete => {
                        lines.extend(old_lines[o].iter().map(|l| HunkLine::Remove(l.to_string())))
                    }
                    DiffTag::Insert => {
                        lines.extend(new_lines[n].iter().map(|l| HunkLine::Add(l.to_string())))
                    }
                    DiffTag::Replace => {
                        lines.extend(old_lines[o].iter().map(|l| HunkLine::Remove(l.to_string())));
                        lines.extend(new_lines[n].iter().map(|l| HunkLine::Add(l.to_string())));
                    }
                }
            }

            hunks.push(Hunk {
                old_start: header_start(old_range.start, old_range.len()),
                old_count: old_range.len(),
                new_start: header_start(new_range.start, new_range.len()),
                new_count: new_range.len(),
                numbered: true,
                lines,
            });
        }

        Some(FilePatch {
            path: path.to_string(),
            change,
            hunks,
        })
    }

    /// The inverse patch: applying it undoes `self`.
    pub fn reverse(&self) -> FilePatch {
        let hunks = self
            .hunks
            .iter()
            .map(|h| Hunk {
                old_start: h.new_start,
                old_count: h.new_count,
                new_start: h.old_start,
                new_count: h.old_count,
                numbered: h.numbered,
                lines: h
                    .lines
                    .iter()
                    .map(|l| match l {
                        HunkLine::Context(s) => HunkLine::Context(s.clone()),
                        HunkLine::Remove(s) => HunkLine::Add(s.clone()),
                        HunkLine::Add(s) => HunkLine::Remove(s.clone()),
                    })
                    .collect(),
            })
            .collect();

        FilePatch {
            path: self.path.clone(),
            change: self.change.reversed(),
            hunks,
        }
    }

    /// Apply to the current content (`None` = file absent).
    /// Returns the new content, `None` meaning the file is deleted, or a
    /// human-readable reason when the patch does not fit.
    pub fn apply(&self, current: Option<&str>) -> Result<Option<String>, String> {
        let base = match (self.change, current) {
            (ChangeKind::Added, Some(_)) => return Err("file already exists".into()),
            (ChangeKind::Added, None) => "",
            (_, None) => return Err("file does not exist".into()),
            (_, Some(text)) => text,
        };

        let result = apply_hunks(&split_lines(base), &self.hunks)?;

        match self.change {
            ChangeKind::Deleted if !result.is_empty() => {
                Err("file has content beyond what the deletion expects".into())
            }
            ChangeKind::Deleted => Ok(None),
            _ => Ok(Some(result)),
        }
    }

    pub fn render(&self) -> String {
        self.render_with(RenderOptions::default())
    }

    /// Render as a git-style unified diff.
    pub fn render_with(&self, opts: RenderOptions) -> String {
        let mut out = String::new();

        if opts.file_names {
            let _ = writeln!(out, "diff --git a/{0} b/{0}", self.path);
        }
        match self.change {
            ChangeKind::Added => out.push_str("new file mode 100644\n"),
            ChangeKind::Deleted => out.push_str("deleted file mode 100644\n"),
            ChangeKind::Modified => {}
        }
        if opts.file_names {
            let old = match self.change {
                ChangeKind::Added => DEV_NULL.to_string(),
                _ => format!("a/{}", self.path),
            };
            let new = match self.change {
                ChangeKind::Deleted => DEV_NULL.to_string(),
                _ => format!("b/{}", self.path),
            };
            let _ = writeln!(out, "--- {old}");
            let _ = writeln!(out, "+++ {new}");
        }

        for hunk in &self.hunks {
            render_hunk(&mut out, hunk, opts.line_numbers);
        }

        out
    }

    /// Parse one file's diff. `path` names the file; header lines, when
    /// present, only contribute the change kind.
    pub fn parse(path: &str, text: &str) -> Result<FilePatch, String> {
        let mut change = ChangeKind::Modified;
        let mut hunks: Vec<Hunk> = Vec::new();

        for (idx, raw) in split_lines(text).into_iter().enumerate() {
            let line = raw.strip_suffix('\n').unwrap_or(raw);
            let lineno = idx + 1;

            if let Some(caps) = HUNK_HEADER.captures(line) {
                let num = |i: usize, default: usize| {
                    caps.get(i)
                        .map_or(Ok(default), |m| m.as_str().parse::<usize>())
                        .map_err(|e| format!("line {lineno}: bad hunk range: {e}"))
                };
                let numbered = caps.get(1).is_some();
                hunks.push(Hunk {
                    old_start: num(1, 0)?,
                    old_count: 0,
                    new_start: num(3, 0)?,
                    new_count: 0,
                    numbered,
                    lines: Vec::new(),
                });
                continue;
            }

            let Some(hunk) = hunks.last_mut() else {
                // File header section
                if line.starts_with("new file mode") || line == format!("--- {DEV_NULL}") {
                    change = ChangeKind::Added;
                } else if line.starts_with("deleted file mode")
                    || line == format!("+++ {DEV_NULL}")
                {
                    change = ChangeKind::Deleted;
                }
                continue;
            };

            let body = match raw.as_bytes().first() {
                Some(b' ') => HunkLine::Context(raw[1..].to_string()),
                Some(b'-') => HunkLine::Remove(raw[1..].to_string()),
                Some(b'+') => HunkLine::Add(raw[1..].to_string()),
                // Some tools trim the space off empty context lines
                Some(b'\n') => HunkLine::Context("\n".to_string()),
                Some(b'\\') => {
                    match hunk.lines.last_mut() {
                        Some(HunkLine::Context(s) | HunkLine::Remove(s) | HunkLine::Add(s)) => {
                            if s.ends_with('\n') {
                                s.pop();
                            }
                        }
                        None => return Err(format!("line {lineno}: marker outside a hunk body")),
                    }
                    continue;
                }
                _ => return Err(format!("line {lineno}: unexpected line in hunk: {line:?}")),
            };
            hunk.lines.push(body);
        }

        // Counts are derived from the body so bare headers behave like numbered ones
        for hunk in &mut hunks {
            hunk.old_count = hunk
                .lines
                .iter()
                .filter(|l| !matches!(l, HunkLine::Add(_)))
                .count();
            hunk.new_count = hunk
                .lines
                .iter()
                .filter(|l| !matches!(l, HunkLine::Remove(_)))
                .count();
        }

        Ok(FilePatch {
            path: path.to_string(),
            change,
            hunks,
        })
    }
}

/// Unified diff convention: an empty side names the line before it.
fn header_start(start: usize, len: usize) -> usize {
    if len == 0 { start } else { start + 1 }
}

fn render_range(out: &mut String, start: usize, count: usize) {
    if count == 1 {
        let _ = write!(out, "{start}");
    } else {
        let _ = write!(out, "{start},{count}");
    }
}

/// Render a single hunk
fn render_hunk(out: &mut String, hunk: &Hunk, line_numbers: bool) {
    if line_numbers && hunk.numbered {
        out.push_str("@@ -");
        render_range(out, hunk.old_start, hunk.old_count);
        out.push_str(" +");
        render_range(out, hunk.new_start, hunk.new_count);
        out.push_str(" @@\n");
    } else {
        out.push_str("@@\n");
    }

    for line in &hunk.lines {
        let prefix = match line {
            HunkLine::Context(_) => ' ',
            HunkLine::Remove(_) => '-',
            HunkLine::Add(_) => '+',
        };
        let text = line.text();
        out.push(prefix);
        out.push_str(text);
        if !text.ends_with('\n') {
            out.push('\n');
            out.push_str(NO_NEWLINE_MARKER);
            out.push('\n');
        }
    }
}

/// Apply hunks in order. Each hunk is located at its recorded position
/// first, then by searching outward; never before the previous hunk's end.
fn apply_hunks(source: &[&str], hunks: &[Hunk]) -> Result<String, String> {
    let mut out = String::new();
    let mut cursor = 0usize;
    let mut offset: isize = 0;

    for (i, hunk) in hunks.iter().enumerate() {
        let old_side: Vec<&str> = hunk
            .lines
            .iter()
            .filter(|l| !matches!(l, HunkLine::Add(_)))
            .map(HunkLine::text)
            .collect();

        let recorded = if hunk.numbered {
            if hunk.old_count == 0 { hunk.old_start } else { hunk.old_start.saturating_sub(1) }
        } else {
            cursor
        };
        let hint = (recorded as isize + offset).max(cursor as isize) as usize;

        let pos = locate(source, &old_side, hint, cursor).ok_or_else(|| {
            format!(
                "hunk {} (old line {}) does not match the file content",
                i + 1,
                hunk.old_start
            )
        })?;

        for line in &source[cursor..pos] {
            out.push_str(line);
        }
        for line in &hunk.lines {
            if !matches!(line, HunkLine::Remove(_)) {
                out.push_str(line.text());
            }
        }

        cursor = pos + old_side.len();
        if hunk.numbered {
            offset = pos as isize - recorded as isize;
        }
    }

    for line in &source[cursor..] {
        out.push_str(line);
    }

    Ok(out)
}

/// Find `needle` in `haystack[floor..]`, preferring positions closest to `hint`.
fn locate(haystack: &[&str], needle: &[&str], hint: usize, floor: usize) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    let last = haystack.len() - needle.len();
    if floor > last {
        return None;
    }
    let hint = hint.clamp(floor, last);
    let fits = |p: usize| haystack[p..p + needle.len()] == *needle;

    let span = (hint - floor).max(last - hint);
    for delta in 0..=span {
        if hint + delta <= last && fits(hint + delta) {
            return Some(hint + delta);
        }
        if delta > 0 && delta <= hint - floor && fits(hint - delta) {
            return Some(hint - delta);
        }
    }
    None
}
