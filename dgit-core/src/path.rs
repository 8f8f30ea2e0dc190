//! Tree paths of datasets
//!
//! A dataset lives at `<ModelType>/<category>/.../<refId>.json`. Category names
//! are user data and may contain `/` or other characters a tree entry name
//! cannot hold, so every category segment is percent-escaped.

use crate::model::{CategoryPath, ModelType};

/// Extension of a serialized dataset
pub const DATASET_SUFFIX: &str = ".json";

/// Suffix of the folder holding a dataset's binary attachments
pub const BINARY_SUFFIX: &str = "_bin";

/// Name of the repository metadata blob at the tree root
pub const REPOSITORY_INFO: &str = "repository.json";

fn needs_escape(c: char) -> bool {
    matches!(c, '%' | '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') || c.is_control()
}

/// Escape a single name so it can be used as one tree entry name.
///
/// Only attachment folders may end in [`BINARY_SUFFIX`], so the `_` of a
/// trailing `_bin` in a name is escaped as well.
pub fn escape_segment(name: &str) -> String {
    let suffix_at = name.strip_suffix(BINARY_SUFFIX).map(str::len);
    let mut out = String::with_capacity(name.len());
    for (i, c) in name.char_indices() {
        // a leading dot would allow "." / ".." / ".git"
        if needs_escape(c) || (i == 0 && c == '.') || Some(i) == suffix_at {
            let mut buf = [0u8; 4];
            for b in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{:02X}", b));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Reverse [`escape_segment`]; `None` if the escape sequences are malformed
pub fn unescape_segment(segment: &str) -> Option<String> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = segment.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Join an (already escaped) parent path and entry name
pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Last segment of a path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Whether `path` equals `prefix` or lies below it, on segment boundaries
pub fn is_within(path: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'/')
}

/// Whether `a` and `b` lie on one line of ancestry (either contains the other)
pub fn overlaps(a: &str, b: &str) -> bool {
    is_within(a, b) || is_within(b, a)
}

/// Binary attachments are stored below `<refId>_bin/` folders
pub fn is_binary_path(path: &str) -> bool {
    path.split('/').any(|segment| segment.ends_with(BINARY_SUFFIX))
}

/// Tree path of a category folder
pub fn category_path(model_type: ModelType, category: &CategoryPath) -> String {
    let mut path = model_type.as_str().to_string();
    for segment in category.segments() {
        path.push('/');
        path.push_str(&escape_segment(segment));
    }
    path
}

/// Tree file name of a dataset
pub fn dataset_file_name(ref_id: &str) -> String {
    format!("{}{}", ref_id, DATASET_SUFFIX)
}

/// Reference id of a dataset file name, if it is one
pub fn ref_id_of(file_name: &str) -> Option<&str> {
    let ref_id = file_name.strip_suffix(DATASET_SUFFIX)?;
    (!ref_id.is_empty() && !ref_id.contains('.')).then_some(ref_id)
}

/// Identity of a dataset as encoded in its tree path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPath {
    pub model_type: ModelType,
    pub category: CategoryPath,
    pub ref_id: String,
}

impl DatasetPath {
    pub fn new(model_type: ModelType, category: CategoryPath, ref_id: impl Into<String>) -> Self {
        Self {
            model_type,
            category,
            ref_id: ref_id.into(),
        }
    }

    /// Full, escaped tree path
    pub fn to_path(&self) -> String {
        join(
            &category_path(self.model_type, &self.category),
            &dataset_file_name(&self.ref_id),
        )
    }

    /// Parse a tree path; `None` for anything that is not a dataset file
    pub fn parse(path: &str) -> Option<Self> {
        let mut segments: Vec<&str> = path.split('/').collect();
        if segments.len() < 2 {
            return None;
        }
        let file = segments.pop()?;
        let ref_id = ref_id_of(file)?;
        let model_type = segments.first()?.parse().ok()?;
        let category = segments[1..]
            .iter()
            .map(|s| unescape_segment(s))
            .collect::<Option<Vec<_>>>()?;
        Some(Self::new(model_type, CategoryPath::new(category), ref_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_escape_separators() {
        assert_eq!(escape_segment("a/b"), "a%2Fb");
        assert_eq!(escape_segment("100%"), "100%25");
        assert_eq!(escape_segment(".hidden"), "%2Ehidden");
        assert_eq!(escape_segment("plain name"), "plain name");
        assert_eq!(escape_segment("scrap_bin"), "scrap%5Fbin");
        assert_eq!(escape_segment("_bin"), "%5Fbin");
        assert_eq!(escape_segment("bin_binder"), "bin_binder");
        assert_eq!(unescape_segment("scrap%5Fbin").as_deref(), Some("scrap_bin"));
        assert_eq!(unescape_segment("a%2Fb").as_deref(), Some("a/b"));
        assert_eq!(unescape_segment("bad%2"), None);
    }

    #[test]
    fn test_dataset_path() {
        let path = DatasetPath::new(
            ModelType::Flow,
            CategoryPath::new(vec!["Elementary flows".into(), "air/water".into()]),
            "rec2",
        );
        assert_eq!(path.to_path(), "Flow/Elementary flows/air%2Fwater/rec2.json");
        assert_eq!(DatasetPath::parse(&path.to_path()), Some(path));

        assert_eq!(DatasetPath::parse("Flow/cat1"), None);
        assert_eq!(DatasetPath::parse("Unknown/rec.json"), None);
        assert_eq!(DatasetPath::parse("repository.json"), None);
    }

    #[test]
    fn test_is_within_respects_segments() {
        assert!(is_within("Flow/cat1/rec.json", "Flow/cat1"));
        assert!(is_within("Flow/cat1", "Flow/cat1"));
        assert!(!is_within("Flow/cat10/rec.json", "Flow/cat1"));
        assert!(is_within("anything", ""));
        assert!(overlaps("Flow", "Flow/cat1/rec.json"));
    }

    #[test]
    fn test_binary_paths() {
        assert!(is_binary_path("Process/rec1_bin/report.pdf"));
        assert!(!is_binary_path("Process/rec1.json"));
        let category = CategoryPath::from(&["scrap_bin"][..]);
        assert!(!is_binary_path(&DatasetPath::new(ModelType::Flow, category, "rec1").to_path()));
    }

    proptest! {
        #[test]
        fn escaped_segments_are_single_reversible_names(name in "\\PC*") {
            let escaped = escape_segment(&name);
            prop_assert!(!escaped.contains('/'));
            prop_assert!(!escaped.starts_with('.'));
            prop_assert!(!escaped.ends_with(BINARY_SUFFIX));
            prop_assert_eq!(unescape_segment(&escaped), Some(name));
        }
    }
}
