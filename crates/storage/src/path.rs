//! Remote path resolution.
//!
//! The only place remote paths are built. Pure string manipulation: no
//! I/O, no knowledge of which backend will consume the result beyond its
//! separator.

/// Joins a base path, a relative folder and an optional filename.
///
/// Both `/` and `\` are accepted in every input and rewritten to
/// `separator`. Empty segments and `.` are dropped, so duplicate
/// separators never survive. An empty, root-only or absent folder
/// resolves to the base path itself. A leading separator on the base is
/// kept (absolute remote paths stay absolute).
pub fn resolve(
    base_path: &str,
    folder: Option<&str>,
    filename: Option<&str>,
    separator: char,
) -> String {
    let mut out = String::new();
    if base_path.starts_with(['/', '\\']) {
        out.push(separator);
    }

    let folder = folder.unwrap_or("");
    let tail = filename.map(|f| f.trim_matches(['/', '\\']));

    for segment in segments(base_path)
        .chain(segments(folder))
        .chain(tail.into_iter().filter(|f| !f.is_empty()))
    {
        if !out.is_empty() && !out.ends_with(separator) {
            out.push(separator);
        }
        out.push_str(segment);
    }

    out
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
}

/// Path resolver bound to one base path and backend separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathResolver {
    base_path: String,
    separator: char,
}

impl PathResolver {
    pub fn new(base_path: &str, separator: char) -> Self {
        Self {
            base_path: resolve(base_path, None, None, separator),
            separator,
        }
    }

    /// The normalized base path.
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Absolute path of a folder under the base path.
    pub fn folder(&self, folder: Option<&str>) -> String {
        resolve(&self.base_path, folder, None, self.separator)
    }

    /// Absolute path of a file inside a folder under the base path.
    pub fn file(&self, folder: Option<&str>, filename: &str) -> String {
        resolve(&self.base_path, folder, Some(filename), self.separator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_folders_resolve_to_base() {
        for folder in [None, Some(""), Some("/"), Some("\\"), Some("//")] {
            assert_eq!(resolve("/srv/ingest", folder, None, '/'), "/srv/ingest");
        }
    }

    #[test]
    fn joins_without_duplicate_separators() {
        assert_eq!(
            resolve("/srv/ingest/", Some("/304546/"), Some("a-304546.xml"), '/'),
            "/srv/ingest/304546/a-304546.xml"
        );
        assert_eq!(
            resolve("/srv//ingest", Some("1//2"), None, '/'),
            "/srv/ingest/1/2"
        );
    }

    #[test]
    fn normalizes_to_backslash_separator() {
        assert_eq!(
            resolve(
                "/Inbox/QubeXP/Xi-FeatureFiles",
                Some("304546"),
                Some("f-304546.xml"),
                '\\'
            ),
            "\\Inbox\\QubeXP\\Xi-FeatureFiles\\304546\\f-304546.xml"
        );
        assert_eq!(
            resolve("Inbox\\Feature", Some("a/b"), None, '\\'),
            "Inbox\\Feature\\a\\b"
        );
    }

    #[test]
    fn relative_base_stays_relative() {
        assert_eq!(resolve("ingest", Some("1"), None, '/'), "ingest/1");
    }

    #[test]
    fn empty_base_yields_folder_only() {
        assert_eq!(resolve("", None, None, '/'), "");
        assert_eq!(resolve("", Some("1"), None, '/'), "1");
        assert_eq!(resolve("", None, Some("a.xml"), '/'), "a.xml");
        assert_eq!(resolve("/", None, Some("a.xml"), '/'), "/a.xml");
    }

    #[test]
    fn current_dir_segments_are_dropped() {
        assert_eq!(resolve("/srv/./ingest", Some("./1"), None, '/'), "/srv/ingest/1");
    }

    #[test]
    fn resolver_is_deterministic() {
        let resolver = PathResolver::new("\\share\\base\\", '\\');
        assert_eq!(resolver.base_path(), "\\share\\base");
        assert_eq!(resolver.folder(Some("")), resolver.base_path());
        assert_eq!(resolver.folder(Some("/")), resolver.base_path());
        assert_eq!(resolver.folder(None), resolver.base_path());
        assert_eq!(
            resolver.file(Some("7"), "x-7.xml"),
            resolver.file(Some("7"), "x-7.xml")
        );
        assert_eq!(resolver.file(None, "x-7.xml"), "\\share\\base\\x-7.xml");
    }
}
