//! Prompt assembly for failure analysis.

use crate::providers::openai::truncate_on_char_boundary;
use crate::session::SessionSnapshot;
use std::collections::HashMap;
use tokio::io::AsyncReadExt;

/// Tags rendered first, in this order
pub const KNOWN_TAGS: [&str; 7] = [
    "ENV",
    "SERVICE",
    "COMPONENT",
    "ENDPOINT",
    "BUSINESS",
    "TECH",
    "SEVERITY",
];

pub const TAG_MARKER_PREFIX: &str = "[[tag:";
const TAG_MARKER_SUFFIX: &str = "]]";

const PREAMBLE: &str = "\
You are diagnosing a failure in a backend service. Determine the root cause \
of the error below from the execution log and, when provided, the source \
code of the failing component.";

const CLOSING: &str = "\
Answer with the most likely root cause, the concrete fix you would apply, \
and the tests or guardrails that would catch this failure before it \
reaches production. Be specific and brief.";

/// One marker line per tag: known tags first, the rest sorted by key
pub fn tag_marker_lines(tags: &HashMap<String, String>) -> Vec<String> {
    let mut keys: Vec<&str> = KNOWN_TAGS
        .iter()
        .copied()
        .filter(|k| tags.contains_key(*k))
        .collect();

    let mut rest: Vec<&str> = tags
        .keys()
        .map(String::as_str)
        .filter(|k| !KNOWN_TAGS.contains(k))
        .collect();
    rest.sort_unstable();
    keys.extend(rest);

    keys.into_iter()
        .map(|key| {
            let value = tags[key].replace(['\r', '\n'], " ");
            format!("{}{}={}{}", TAG_MARKER_PREFIX, key, value, TAG_MARKER_SUFFIX)
        })
        .collect()
}

/// Assemble the analysis prompt from a session snapshot.
///
/// Sections appear in a fixed order and are skipped when empty.
pub fn build(snapshot: &SessionSnapshot, source_excerpt: Option<&str>) -> String {
    let mut sections: Vec<String> = Vec::new();

    let markers = tag_marker_lines(&snapshot.tags);
    if !markers.is_empty() {
        sections.push(markers.join("\n"));
    }

    sections.push(PREAMBLE.to_string());

    let source = &snapshot.source;
    if !source.file.is_empty() || !source.function.is_empty() {
        sections.push(format!(
            "### Source location\nfile: {}\nfunction: {}",
            source.file, source.function
        ));
    }

    if let Some(error) = snapshot.last_error.as_deref().filter(|e| !e.is_empty()) {
        sections.push(format!("### Latest error\n{}", error));
    }

    if !snapshot.summary.is_empty() {
        sections.push(format!("### Session log\n{}", snapshot.summary));
    }

    if let Some(code) = source_excerpt.filter(|c| !c.is_empty()) {
        sections.push(format!(
            "### Source excerpt ({})\n```\n{}\n```",
            source.file, code
        ));
    }

    sections.push(CLOSING.to_string());

    sections.join("\n\n")
}

/// Drop the leading tag marker block so classification metadata never
/// leaves the process. Everything after it is returned untouched.
pub fn strip_tag_markers(prompt: &str) -> &str {
    let mut rest = prompt;
    while let Some((line, tail)) = rest.split_once('\n') {
        if !is_tag_marker(line) {
            break;
        }
        rest = tail;
    }
    if is_tag_marker(rest) {
        return "";
    }
    rest.trim_start_matches(['\r', '\n'])
}

fn is_tag_marker(line: &str) -> bool {
    let line = line.trim();
    line.starts_with(TAG_MARKER_PREFIX) && line.ends_with(TAG_MARKER_SUFFIX)
}

/// Read at most `max_bytes` of `path`. Any failure, or an empty file,
/// yields `None`.
pub async fn read_source_excerpt(path: &str, max_bytes: usize) -> Option<String> {
    if path.trim().is_empty() || max_bytes == 0 {
        return None;
    }

    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path, error = %e, "Source excerpt unavailable");
            return None;
        }
    };

    let mut buf = Vec::with_capacity(max_bytes.min(64 * 1024));
    if let Err(e) = file.take(max_bytes as u64).read_to_end(&mut buf).await {
        tracing::debug!(path, error = %e, "Failed to read source excerpt");
        return None;
    }

    // The cap may split the last character
    if let Err(e) = std::str::from_utf8(&buf) {
        if e.error_len().is_none() {
            buf.truncate(e.valid_up_to());
        }
    }

    if buf.is_empty() {
        return None;
    }

    let text = String::from_utf8_lossy(&buf);
    Some(truncate_on_char_boundary(&text, max_bytes).to_string())
}
