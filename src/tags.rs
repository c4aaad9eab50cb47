//! Pure tag-naming rules: sanitation and folder-tag derivation. No
//! persistence here — callers apply the results through `db::tags`.

const MAX_TAG_LENGTH: usize = 100;

/// Trim, collapse internal whitespace to `_`, replace `:` with `_`,
/// lowercase, cap at 100 characters. Returns `None` if the sanitized name
/// would be empty.
pub fn sanitize_tag_name(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let collapsed = collapse_whitespace(trimmed).replace(':', "_");
    let lowered = collapsed.to_lowercase();
    let capped: String = lowered.chars().take(MAX_TAG_LENGTH).collect();

    if capped.is_empty() {
        None
    } else {
        Some(capped)
    }
}

fn collapse_whitespace(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for ch in s.chars() {
        if ch.is_whitespace() {
            if !last_was_space {
                out.push('_');
            }
            last_was_space = true;
        } else {
            out.push(ch);
            last_was_space = false;
        }
    }
    out
}

/// Derives the ordered, deduped (case-insensitive) set of folder-tag names
/// from a post's relative path: split on `/`, drop the file segment, then
/// sanitize each remaining directory segment (trim, whitespace -> `_`,
/// lowercase, cap 100), dropping empties.
pub fn derive_folder_tags(relative_path: &str) -> Vec<String> {
    let mut segments: Vec<&str> = relative_path.split('/').collect();
    segments.pop(); // drop the file segment

    let mut seen = std::collections::HashSet::new();
    let mut tags = Vec::new();

    for segment in segments {
        let Some(sanitized) = sanitize_tag_name(segment) else {
            continue;
        };
        if seen.insert(sanitized.clone()) {
            tags.push(sanitized);
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_trims_collapses_and_lowercases() {
        assert_eq!(sanitize_tag_name("  Blue   Sky  "), Some("blue_sky".to_string()));
    }

    #[test]
    fn sanitize_replaces_colons() {
        assert_eq!(sanitize_tag_name("series:finale"), Some("series_finale".to_string()));
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "a".repeat(150);
        assert_eq!(sanitize_tag_name(&long).unwrap().len(), 100);
    }

    #[test]
    fn sanitize_rejects_whitespace_only() {
        assert_eq!(sanitize_tag_name("   "), None);
    }

    #[test]
    fn folder_tags_drop_file_segment_and_dedupe() {
        let tags = derive_folder_tags("Vacation/Beach/beach/photo.jpg");
        assert_eq!(tags, vec!["vacation".to_string(), "beach".to_string()]);
    }

    #[test]
    fn folder_tags_empty_for_root_file() {
        assert!(derive_folder_tags("photo.jpg").is_empty());
    }
}
