/// Maximum length for the sanitized name portion of a filename
const MAX_NAME_LENGTH: usize = 100;

/// Check if a character is allowed in filenames (whitelist approach)
fn is_valid_filename_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ')
}

/// Resolve the on-disk filename for an episode from its feed metadata.
///
/// None when the title or mimetype is absent, when the title sanitizes to
/// nothing, or when no extension is known for the mimetype. Callers fall
/// back to naming derived from the enclosure URL in that case.
pub fn resolve_filename(title: Option<&str>, mimetype: Option<&str>) -> Option<String> {
    let stem = sanitize_name(title?);
    if stem.is_empty() {
        return None;
    }

    let ext = extension_for_mime(mimetype?)?;
    Some(format!("{stem}.{ext}"))
}

/// Map a mimetype to a file extension
fn extension_for_mime(mime: &str) -> Option<String> {
    if let Some(ext) = audio_extension_override(mime) {
        return Some(ext.to_string());
    }

    mime_guess::get_mime_extensions_str(mime)
        .and_then(|exts| exts.first())
        .map(|ext| ext.to_string())
}

/// Extensions for common podcast audio types, including spellings the
/// general mimetype database resolves poorly or not at all
fn audio_extension_override(mime: &str) -> Option<&'static str> {
    match mime.to_lowercase().as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/x-mpeg" => Some("mp3"),
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => Some("m4a"),
        "audio/aac" => Some("aac"),
        "audio/ogg" => Some("ogg"),
        "audio/opus" => Some("opus"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/flac" | "audio/x-flac" => Some("flac"),
        _ => None,
    }
}

/// Sanitize a name for filesystem use with a whitelist approach.
///
/// Shared by episode filenames and cast directory names.
pub fn sanitize_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| if is_valid_filename_char(c) { c } else { '-' })
        .collect();

    // Collapse multiple spaces/dashes into single dash
    let collapsed = collapse_separators(&sanitized);

    // Trim and limit length
    let trimmed = collapsed.trim_matches(|c: char| c == '-' || c.is_whitespace());

    if trimmed.len() > MAX_NAME_LENGTH {
        // Truncate at word boundary if possible
        truncate_at_boundary(trimmed, MAX_NAME_LENGTH)
    } else {
        trimmed.to_string()
    }
}

/// Collapse multiple spaces and dashes into single dashes
fn collapse_separators(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut last_was_separator = false;

    for c in s.chars() {
        if c == '-' || c.is_whitespace() {
            if !last_was_separator {
                result.push('-');
                last_was_separator = true;
            }
        } else {
            result.push(c);
            last_was_separator = false;
        }
    }

    result
}

/// Truncate string at a word boundary
fn truncate_at_boundary(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    // Find the last separator before max_len
    let truncated: String = s.chars().take(max_len).collect();
    if let Some(pos) = truncated.rfind('-')
        && pos > max_len / 2
    {
        return truncated[..pos].to_string();
    }

    truncated.trim_end_matches('-').to_string()
}
