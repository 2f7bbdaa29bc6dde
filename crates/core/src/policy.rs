use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens to a source file once its delivery is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelocationPolicy {
    pub archive_dir: PathBuf,
    pub delete_after_upload: bool,
    /// Lowercase suffixes including the leading dot (e.g. `.mkv`).
    pub allowed_extensions: BTreeSet<String>,
    /// Caption template; `{filename}` and `{filesize_mb}` are substituted.
    pub caption_template: String,
}

impl RelocationPolicy {
    /// Case-insensitive suffix check against the allowed set.
    pub fn accepts(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                self.allowed_extensions
                    .contains(&format!(".{}", e.to_lowercase()))
            })
            .unwrap_or(false)
    }
}

/// Normalize a user-supplied extension list into `.ext` lowercase form.
pub fn normalize_extensions<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|s| s.as_ref().trim().to_lowercase())
        .filter(|s| !s.is_empty() && s != ".")
        .map(|s| if s.starts_with('.') { s } else { format!(".{s}") })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilitySettings {
    pub poll_interval: Duration,
    pub max_polls: u32,
}

impl Default for StabilitySettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_polls: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(exts: &[&str]) -> RelocationPolicy {
        RelocationPolicy {
            archive_dir: PathBuf::from("archive"),
            delete_after_upload: false,
            allowed_extensions: normalize_extensions(exts),
            caption_template: "{filename}".to_string(),
        }
    }

    #[test]
    fn accepts_allowed_extension_case_insensitively() {
        let p = policy(&[".mkv"]);
        assert!(p.accepts(Path::new("/watch/video.mkv")));
        assert!(p.accepts(Path::new("/watch/VIDEO.MKV")));
        assert!(!p.accepts(Path::new("/watch/video.txt")));
        assert!(!p.accepts(Path::new("/watch/mkv")));
    }

    #[test]
    fn normalize_adds_dot_and_lowercases() {
        let set = normalize_extensions(["MP4", " .Mkv ", "", "."]);
        assert_eq!(
            set.into_iter().collect::<Vec<_>>(),
            vec![".mkv".to_string(), ".mp4".to_string()]
        );
    }

    #[test]
    fn stability_defaults() {
        let s = StabilitySettings::default();
        assert_eq!(s.poll_interval, Duration::from_secs(1));
        assert_eq!(s.max_polls, 30);
    }
}
