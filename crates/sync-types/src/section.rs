//! Description-section protocol: a section is a block of text introduced by
//! a `"### "`-prefixed heading line, owned by exactly one provider. Headings
//! are compared by exact string match. Sections are always separated by a
//! single blank line, matching the convention the enricher runtime writes
//! when it appends a provider's section.

const HEADING_PREFIX: &str = "### ";

fn heading_line_start(doc: &str, heading: &str) -> Option<usize> {
    let mut offset = 0;
    for line in doc.split_inclusive('\n') {
        if line.trim_end_matches('\n') == heading {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

/// Byte offset of the next `"### "` heading strictly after `after`, or the
/// end of the document.
fn next_heading_start(doc: &str, after: usize) -> usize {
    let mut offset = after;
    for line in doc[after..].split_inclusive('\n') {
        if offset > after && line.starts_with(HEADING_PREFIX) {
            return offset;
        }
        offset += line.len();
    }
    doc.len()
}

pub fn has_section(doc: &str, heading: &str) -> bool {
    heading_line_start(doc, heading).is_some()
}

/// Content between `heading`'s line and the next heading (or end of
/// document), with surrounding blank lines trimmed.
pub fn extract_section(doc: &str, heading: &str) -> Option<String> {
    let start = heading_line_start(doc, heading)?;
    let content_start = start + doc[start..].find('\n').map(|i| i + 1).unwrap_or(doc.len() - start);
    let end = next_heading_start(doc, start);
    Some(doc[content_start..end].trim_matches('\n').to_string())
}

/// Replaces `heading`'s section content with `new_content`, preserving every
/// other section and any content after the document's end-of-user-content
/// marker byte-for-byte. If the heading is absent, appends a new section.
pub fn replace_section(doc: &str, heading: &str, new_content: &str) -> String {
    let trimmed = new_content.trim_matches('\n');
    match heading_line_start(doc, heading) {
        None => append_section(doc, heading, trimmed),
        Some(start) => {
            let heading_line_end = start + doc[start..].find('\n').map(|i| i + 1).unwrap_or(doc.len() - start);
            let end = next_heading_start(doc, start);
            let has_more = end < doc.len();
            let mut result = String::with_capacity(doc.len() + trimmed.len());
            result.push_str(&doc[..heading_line_end]);
            result.push('\n');
            result.push_str(trimmed);
            result.push('\n');
            if has_more {
                result.push('\n');
            }
            result.push_str(&doc[end..]);
            result
        }
    }
}

/// Appends a new section for a provider that hasn't written one yet:
/// `"\n\n### <heading>\n\n<content>\n"`.
pub fn append_section(doc: &str, heading: &str, content: &str) -> String {
    let content = content.trim_matches('\n');
    let mut result = String::with_capacity(doc.len() + heading.len() + content.len() + 6);
    result.push_str(doc.trim_end_matches('\n'));
    if !result.is_empty() {
        result.push_str("\n\n");
    }
    result.push_str(heading);
    result.push_str("\n\n");
    result.push_str(content);
    result.push('\n');
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_content_between_two_headings() {
        let doc = "X\n\n### E1\n\nold\n\n### E2\n\nkeep\n";
        assert_eq!(extract_section(doc, "### E1").unwrap(), "old");
    }

    #[test]
    fn replace_preserves_sibling_sections_byte_for_byte() {
        let doc = "X\n\n### E1\n\nold\n\n### E2\n\nkeep\n";
        let updated = replace_section(doc, "### E1", "new");
        assert_eq!(updated, "X\n\n### E1\n\nnew\n\n### E2\n\nkeep\n");
    }

    #[test]
    fn replace_appends_when_heading_absent() {
        let doc = "X\n";
        let updated = replace_section(doc, "### E1", "fresh");
        assert_eq!(updated, "X\n\n### E1\n\nfresh\n");
    }

    #[test]
    fn has_section_is_exact_match_only() {
        let doc = "### Weather\n\nsunny\n";
        assert!(has_section(doc, "### Weather"));
        assert!(!has_section(doc, "### weather"));
    }

    #[test]
    fn replace_on_last_section_leaves_no_trailing_heading_gap() {
        let doc = "### E1\n\nold\n";
        let updated = replace_section(doc, "### E1", "new");
        assert_eq!(updated, "### E1\n\nnew\n");
    }
}
