//! Line-level three-way merge of text files.
//!
//! Each side is diffed against the base with the `similar` crate (Myers).
//! Changed regions are replayed onto the base in order; if a region changed
//! by one side touches or overlaps a region changed by the other, the merge
//! fails unless both sides made the identical change.

use similar::{DiffTag, TextDiff};

/// `true` if `data` is UTF-8 without NUL bytes.
pub fn is_text(data: &[u8]) -> bool {
    !data.contains(&0) && std::str::from_utf8(data).is_ok()
}

/// Replace `base[start..end]` with `lines`.
#[derive(Debug, PartialEq, Eq)]
struct Hunk<'a> {
    start: usize,
    end: usize,
    lines: Vec<&'a str>,
}

impl Hunk<'_> {
    /// Adjacent regions count as overlapping.
    fn touches(&self, other: &Hunk<'_>) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

fn hunks<'a>(base: &'a str, other: &'a str) -> Vec<Hunk<'a>> {
    let diff = TextDiff::from_lines(base, other);
    let new_lines = diff.new_slices();
    let mut out: Vec<Hunk<'a>> = Vec::new();
    let mut prev_equal = true;

    for op in diff.ops() {
        if op.tag() == DiffTag::Equal {
            prev_equal = true;
            continue;
        }
        let old = op.old_range();
        let added = &new_lines[op.new_range()];
        match out.last_mut() {
            Some(last) if !prev_equal && last.end == old.start => {
                last.end = old.end;
                last.lines.extend_from_slice(added);
            }
            _ => out.push(Hunk {
                start: old.start,
                end: old.end,
                lines: added.to_vec(),
            }),
        }
        prev_equal = false;
    }
    out
}

/// Merge two edits of `base`. Returns `None` on overlapping changes.
pub fn merge_text(base: &str, current: &str, source: &str) -> Option<String> {
    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let ours = hunks(base, current);
    let theirs = hunks(base, source);

    let mut out = String::with_capacity(current.len().max(source.len()));
    let mut pos = 0;
    let (mut i, mut j) = (0, 0);

    let apply = |h: &Hunk<'_>, pos: &mut usize, out: &mut String| {
        for line in &base_lines[*pos..h.start] {
            out.push_str(line);
        }
        for line in &h.lines {
            out.push_str(line);
        }
        *pos = h.end;
    };

    while i < ours.len() || j < theirs.len() {
        match (ours.get(i), theirs.get(j)) {
            (Some(a), Some(b)) if a.touches(b) => {
                if a != b {
                    return None;
                }
                apply(a, &mut pos, &mut out);
                i += 1;
                j += 1;
            }
            (Some(a), Some(b)) => {
                if a.start < b.start {
                    apply(a, &mut pos, &mut out);
                    i += 1;
                } else {
                    apply(b, &mut pos, &mut out);
                    j += 1;
                }
            }
            (Some(a), None) => {
                apply(a, &mut pos, &mut out);
                i += 1;
            }
            (None, Some(b)) => {
                apply(b, &mut pos, &mut out);
                j += 1;
            }
            (None, None) => break,
        }
    }
    for line in &base_lines[pos..] {
        out.push_str(line);
    }
    Some(out)
}

/// Byte-level entry point: both sides and the base must be text.
pub fn merge_bytes(base: &[u8], current: &[u8], source: &[u8]) -> Option<Vec<u8>> {
    if !(is_text(base) && is_text(current) && is_text(source)) {
        return None;
    }
    let base = std::str::from_utf8(base).ok()?;
    let current = std::str::from_utf8(current).ok()?;
    let source = std::str::from_utf8(source).ok()?;
    merge_text(base, current, source).map(String::into_bytes)
}
