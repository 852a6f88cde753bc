//! Local path to `file://` URI mapping, as engines report filenames.

use std::path::{Path, PathBuf};

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};

/// Everything but RFC 3986 unreserved characters is escaped within a segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Map a local path to the URI form the engine uses for breakpoints.
///
/// The path is resolved through symlinks when it exists, otherwise made
/// absolute as given. Each segment is percent-encoded on its own.
#[must_use]
pub fn to_file_uri(path: impl AsRef<Path>) -> String {
    let resolved = resolve(path.as_ref());
    let text = resolved.to_string_lossy().replace('\\', "/");
    let text = text.strip_prefix("//?/").unwrap_or(&text);

    let mut uri = String::from("file://");
    if !text.starts_with('/') {
        uri.push('/');
    }
    for (i, segment) in text.split('/').enumerate() {
        if i > 0 {
            uri.push('/');
        }
        if i == 0 && is_drive(segment) {
            uri.push_str(segment);
        } else {
            uri.extend(utf8_percent_encode(segment, SEGMENT));
        }
    }
    uri
}

fn resolve(path: &Path) -> PathBuf {
    std::fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn is_drive(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
