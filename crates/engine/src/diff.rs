//! Patch application and line-region merging.
//!
//! Diff payloads are never computed here, only replayed:
//! - `full`: the payload is the new content,
//! - `structured`: a JSON array of [`LineEdit`]s against the base content,
//! - `unified`: kept verbatim for external tooling; not applied.
//!
//! Auto-merge compares the line region each side changed relative to a
//! common base. Two regions are disjoint only when an unchanged line separates
//! them; touching or overlapping regions need a manual merge.

use folio_storage::DiffFormat;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Replace lines `start..end` (0-based, half-open) of the base with `text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineEdit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// Compute the content produced by applying `payload` to `base`.
pub fn apply_diff(format: DiffFormat, base: &str, payload: &str) -> Result<String> {
    match format {
        DiffFormat::Full => Ok(payload.to_string()),
        DiffFormat::Structured => {
            let edits: Vec<LineEdit> = serde_json::from_str(payload)
                .map_err(|e| EngineError::InvalidDiff(format!("structured payload: {e}")))?;
            apply_line_edits(base, &edits)
        }
        DiffFormat::Unified => Err(EngineError::UnsupportedDiffFormat(format)),
    }
}

/// Check a payload is well formed for its format without applying it.
pub fn validate_payload(format: DiffFormat, payload: &str) -> Result<()> {
    if format == DiffFormat::Structured {
        serde_json::from_str::<Vec<LineEdit>>(payload)
            .map_err(|e| EngineError::InvalidDiff(format!("structured payload: {e}")))?;
    }
    Ok(())
}

fn apply_line_edits(base: &str, edits: &[LineEdit]) -> Result<String> {
    let lines: Vec<&str> = base.split_inclusive('\n').collect();
    let mut sorted: Vec<&LineEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| (e.start, e.end));

    let mut out = String::with_capacity(base.len());
    let mut cursor = 0;
    for edit in sorted {
        if edit.start > edit.end || edit.end > lines.len() {
            return Err(EngineError::InvalidDiff(format!(
                "edit {}..{} out of range for {} line(s)",
                edit.start,
                edit.end,
                lines.len()
            )));
        }
        if edit.start < cursor {
            return Err(EngineError::InvalidDiff(format!(
                "edit {}..{} overlaps a previous edit",
                edit.start, edit.end
            )));
        }
        out.extend(lines[cursor..edit.start].iter().copied());
        out.push_str(&edit.text);
        cursor = edit.end;
    }
    out.extend(lines[cursor..].iter().copied());
    Ok(out)
}

/// The part of `base` one side rewrote, found by trimming the common prefix
/// and suffix lines.
#[derive(Debug, Clone, PartialEq)]
struct Region<'a> {
    start: usize,
    end: usize,
    replacement: Vec<&'a str>,
}

fn changed_region<'a>(base: &[&str], edited: &[&'a str]) -> Option<Region<'a>> {
    let prefix = base
        .iter()
        .zip(edited.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if prefix == base.len() && prefix == edited.len() {
        return None;
    }
    let max_suffix = base.len().min(edited.len()) - prefix;
    let suffix = base
        .iter()
        .rev()
        .zip(edited.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();
    Some(Region {
        start: prefix,
        end: base.len() - suffix,
        replacement: edited[prefix..edited.len() - suffix].to_vec(),
    })
}

/// Three-way merge of two edits of `base`.
///
/// Returns `None` when the changed regions touch or overlap.
pub fn merge_disjoint(base: &str, ours: &str, theirs: &str) -> Option<String> {
    let base_lines: Vec<&str> = base.split_inclusive('\n').collect();
    let our_lines: Vec<&str> = ours.split_inclusive('\n').collect();
    let their_lines: Vec<&str> = theirs.split_inclusive('\n').collect();

    let ours_region = changed_region(&base_lines, &our_lines);
    let theirs_region = changed_region(&base_lines, &their_lines);
    let (first, second) = match (ours_region, theirs_region) {
        (None, None) => return Some(base.to_string()),
        (Some(_), None) => return Some(ours.to_string()),
        (None, Some(_)) => return Some(theirs.to_string()),
        (Some(a), Some(b)) => {
            if a.end < b.start {
                (a, b)
            } else if b.end < a.start {
                (b, a)
            } else {
                return None;
            }
        }
    };

    let mut out = String::with_capacity(base.len().max(ours.len()).max(theirs.len()));
    out.extend(base_lines[..first.start].iter().copied());
    out.extend(first.replacement.iter().copied());
    out.extend(base_lines[first.end..second.start].iter().copied());
    out.extend(second.replacement.iter().copied());
    out.extend(base_lines[second.end..].iter().copied());
    Some(out)
}
