// SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//
// URL resolver: turns an input path/URL string into (scheme, host, path).
//
// Mirrors the original's scheme detection (everything before the first
// "://", defaulting to the local scheme when absent) while adding the
// path normalization spec.md requires: backslashes to forward slashes,
// a stripped drive-letter prefix, and collapsed repeated slashes.

pub const LOCAL_SCHEME: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorUrl {
    pub scheme: String,
    pub host: String,
    pub path: String,
}

impl MirrorUrl {
    /// Parse an input string into its scheme/host/path components.
    ///
    /// `local:///abs/path` and bare `/abs/path` both yield scheme
    /// `"local"` and an empty host. `s3://bucket.s3.amazonaws.com/key`
    /// and `mirror://host:port/path` carry the authority component as
    /// `host` (further bucket/region extraction for `s3://` happens in
    /// the S3 backend, per spec.md §4.5).
    pub fn parse(input: &str) -> Self {
        let (scheme, rest) = match input.split_once("://") {
            Some((scheme, rest)) => (scheme.to_string(), rest.to_string()),
            None => (LOCAL_SCHEME.to_string(), input.to_string()),
        };

        let (host, path) = if scheme == LOCAL_SCHEME {
            (String::new(), rest)
        } else {
            match rest.find('/') {
                Some(idx) => (rest[..idx].to_string(), rest[idx..].to_string()),
                None => (rest, String::new()),
            }
        };

        MirrorUrl {
            scheme,
            host,
            path: normalize(&path),
        }
    }

    pub fn to_raw(&self) -> String {
        if self.scheme == LOCAL_SCHEME {
            self.path.clone()
        } else {
            format!("{}://{}{}", self.scheme, self.host, self.path)
        }
    }
}

/// Normalize a path string: backslashes become forward slashes, a leading
/// drive-letter prefix (`C:`) is stripped, and repeated slashes collapse
/// to one. Idempotent: `normalize(normalize(p)) == normalize(p)` for any
/// `p`.
pub fn normalize(path: &str) -> String {
    let mut s = path.replace('\\', "/");

    let bytes = s.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        s = s[2..].to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut prev_slash = false;
    for c in s.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_path_defaults_to_local_scheme() {
        let u = MirrorUrl::parse("/tmp/src");
        assert_eq!(u.scheme, "local");
        assert_eq!(u.host, "");
        assert_eq!(u.path, "/tmp/src");
    }

    #[test]
    fn explicit_local_scheme_strips_prefix() {
        let u = MirrorUrl::parse("local:///tmp/src");
        assert_eq!(u.scheme, "local");
        assert_eq!(u.path, "/tmp/src");
    }

    #[test]
    fn remote_scheme_splits_host_and_path() {
        let u = MirrorUrl::parse("mirror://example.com:8123/tmp/dst");
        assert_eq!(u.scheme, "mirror");
        assert_eq!(u.host, "example.com:8123");
        assert_eq!(u.path, "/tmp/dst");
    }

    #[test]
    fn windows_paths_normalize_to_forward_slashes() {
        let u = MirrorUrl::parse(r"C:\Users\bob\docs");
        assert_eq!(u.scheme, "local");
        assert_eq!(u.path, "/Users/bob/docs");
    }

    #[test]
    fn repeated_slashes_collapse() {
        assert_eq!(normalize("//a///b//c"), "/a/b/c");
    }

    #[test]
    fn normalization_is_idempotent() {
        for p in [
            "/a/b/c",
            r"C:\a\b",
            "//a//b",
            "plain/relative/path",
            r"D:\\weird\\\path",
        ] {
            let once = normalize(p);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {p:?}");
        }
    }
}
