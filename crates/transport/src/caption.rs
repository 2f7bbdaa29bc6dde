//! Caption rendering for uploaded files.
//!
//! Templates use brace placeholders: `{filename}` and `{filesize_mb}`.
//! A numeric placeholder may carry a precision spec such as
//! `{filesize_mb:.1f}`. `{{` and `}}` produce literal braces. Placeholders
//! that are not recognized are copied through untouched.

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Telegram rejects captions longer than this many characters.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Upper bound on digits after the point in `{filesize_mb:.Nf}`.
pub const MAX_SIZE_PRECISION: usize = 6;

/// Values available to caption templates.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CaptionContext {
    pub filename: String,
    pub filesize_mb: f64,
}

impl CaptionContext {
    pub fn new(filename: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            filename: filename.into(),
            filesize_mb: size_bytes as f64 / BYTES_PER_MB,
        }
    }
}

/// Render `template` against `ctx`.
pub fn render_caption(template: &str, ctx: &CaptionContext) -> String {
    let mut out = String::with_capacity(template.len() + ctx.filename.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        // `{` opening a placeholder
        match tail.find('}') {
            Some(end) => {
                let field = &tail[1..end];
                match render_field(field, ctx) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&tail[..=end]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_field(field: &str, ctx: &CaptionContext) -> Option<String> {
    let (name, spec) = match field.split_once(':') {
        Some((name, spec)) => (name.trim(), Some(spec.trim())),
        None => (field.trim(), None),
    };
    match name {
        "filename" => Some(ctx.filename.clone()),
        "filesize_mb" => {
            let precision = spec.and_then(parse_precision).unwrap_or(2);
            Some(format!("{:.*}", precision, ctx.filesize_mb))
        }
        _ => None,
    }
}

/// `.1f` / `.3` / `.0f` -> digits after the point, capped at
/// [`MAX_SIZE_PRECISION`].
fn parse_precision(spec: &str) -> Option<usize> {
    let digits = spec.strip_prefix('.')?;
    let digits = digits.strip_suffix('f').unwrap_or(digits);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // Saturate overlong digit runs instead of rejecting them.
    Some(digits.parse::<usize>().map_or(MAX_SIZE_PRECISION, |p| p.min(MAX_SIZE_PRECISION)))
}

/// Clamp a caption to the channel limit without splitting a character.
pub fn truncate_caption(caption: &str) -> &str {
    match caption.char_indices().nth(MAX_CAPTION_CHARS) {
        Some((idx, _)) => &caption[..idx],
        None => caption,
    }
}
