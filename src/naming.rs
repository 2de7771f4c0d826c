// src/naming.rs
//
// Output-name resolution: header/URL-derived file names, `~` expansion and
// collision suffixing.

use std::path::{Path, PathBuf};

use url::Url;

use crate::config::FALLBACK_FILE_NAME;

/// Resolves the output file name for a probed URL.
///
/// Order: `Content-Disposition` `filename` parameter, then the last path
/// segment of the URL, then `download` plus an extension guessed from
/// `Content-Type` when the name so far has no extension, then a fixed
/// fallback.
pub fn resolve_file_name(
    url: &str,
    content_disposition: Option<&str>,
    content_type: Option<&str>,
) -> String {
    let mut name = content_disposition
        .and_then(filename_from_disposition)
        .or_else(|| filename_from_url(url))
        .unwrap_or_default();

    if name.is_empty() || !name.contains('.') {
        if let Some(ext) = content_type.and_then(extension_for) {
            name = format!("download{ext}");
        }
    }
    if name.is_empty() {
        name = FALLBACK_FILE_NAME.to_string();
    }
    name
}

/// Extracts the `filename` parameter from a `Content-Disposition` value.
/// Handles quoted and bare tokens; `filename*` is not supported.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    for param in value.split(';') {
        if let Some((key, v)) = param.trim().split_once('=') {
            if key.trim().eq_ignore_ascii_case("filename") {
                let v = v.trim().trim_matches('"').trim();
                if !v.is_empty() {
                    return Some(v.to_string());
                }
            }
        }
    }
    None
}

/// Last non-empty path segment of the URL, if any.
pub fn filename_from_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw).ok()?;
    let segment = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .last()?
        .to_string();
    Some(segment)
}

/// Extension guess for the content types the probe commonly sees.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type.split(';').next().unwrap_or(content_type).trim();
    match essence {
        "text/plain" => Some(".txt"),
        "text/html" => Some(".html"),
        "text/csv" => Some(".csv"),
        "application/json" => Some(".json"),
        "application/pdf" => Some(".pdf"),
        "application/zip" => Some(".zip"),
        "application/gzip" => Some(".gz"),
        "application/x-tar" => Some(".tar"),
        "application/octet-stream" => Some(".bin"),
        "image/png" => Some(".png"),
        "image/jpeg" => Some(".jpg"),
        "image/gif" => Some(".gif"),
        "audio/mpeg" => Some(".mp3"),
        "video/mp4" => Some(".mp4"),
        _ => None,
    }
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    if s == "~" {
        return dirs::home_dir().unwrap_or_else(|| path.to_path_buf());
    }
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}

/// Appends `(1)`, `(2)`, ... before the extension until the path names no
/// existing file.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("download");
    let ext = path.extension().and_then(|s| s.to_str());
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();

    let mut i = 1u32;
    loop {
        let name = match ext {
            Some(ext) => format!("{stem}({i}).{ext}"),
            None => format!("{stem}({i})"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_wins_over_url() {
        let name = resolve_file_name(
            "https://example.com/path/other.iso",
            Some("attachment; filename=\"report.pdf\""),
            None,
        );
        assert_eq!(name, "report.pdf");
    }

    #[test]
    fn disposition_bare_token() {
        assert_eq!(
            filename_from_disposition("attachment; filename=report.pdf").as_deref(),
            Some("report.pdf")
        );
    }

    #[test]
    fn url_path_segment_is_used() {
        let name = resolve_file_name("https://example.com/files/archive.zip?sig=abc", None, None);
        assert_eq!(name, "archive.zip");
    }

    #[test]
    fn extension_guessed_from_content_type() {
        let name = resolve_file_name("https://example.com/download", None, Some("application/pdf"));
        assert_eq!(name, "download.pdf");
    }

    #[test]
    fn content_type_parameters_are_ignored() {
        assert_eq!(extension_for("text/plain; charset=utf-8"), Some(".txt"));
    }

    #[test]
    fn fixed_fallback_when_nothing_matches() {
        let name = resolve_file_name("https://example.com/", None, Some("application/x-mystery"));
        assert_eq!(name, FALLBACK_FILE_NAME);
    }

    #[test]
    fn expand_home_replaces_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_home(Path::new("~/Downloads")), home.join("Downloads"));
        assert_eq!(expand_home(Path::new("/abs/path")), PathBuf::from("/abs/path"));
    }

    #[test]
    fn unique_path_appends_numeric_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("a.txt");
        assert_eq!(unique_path(&target), target);

        std::fs::write(&target, b"x").unwrap();
        assert_eq!(unique_path(&target), dir.path().join("a(1).txt"));

        std::fs::write(dir.path().join("a(1).txt"), b"x").unwrap();
        assert_eq!(unique_path(&target), dir.path().join("a(2).txt"));
    }

    #[test]
    fn unique_path_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blob");
        std::fs::write(&target, b"x").unwrap();
        assert_eq!(unique_path(&target), dir.path().join("blob(1)"));
    }
}
