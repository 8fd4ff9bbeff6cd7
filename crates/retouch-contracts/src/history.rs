use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One immutable image in an editing session.
///
/// `name` is the display identifier (source filename for uploads,
/// `<operation>-<millis>` for generated versions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVersion {
    pub name: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub digest: String,
    pub created_at: String,
}

impl ImageVersion {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let digest = short_digest(&bytes);
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            bytes,
            digest,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false),
        }
    }

    /// Name for a generated version: `<operation>-<unix millis>`.
    pub fn generated(operation: &str, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let stamp = Utc::now().timestamp_millis();
        Self::new(format!("{operation}-{stamp}"), mime_type, bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn short_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(&digest[..6])
}

/// Linear undo/redo list of image versions.
///
/// Index 0 always holds the original upload. `append` discards every version
/// after the current index before pushing, so a new edit made after `undo`
/// drops the old redo branch.
#[derive(Debug, Clone, Default)]
pub struct History {
    versions: Vec<ImageVersion>,
    index: Option<usize>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self, image: ImageVersion) {
        self.versions = vec![image];
        self.index = Some(0);
    }

    pub fn append(&mut self, image: ImageVersion) {
        match self.index {
            Some(index) => self.versions.truncate(index + 1),
            None => self.versions.clear(),
        }
        self.versions.push(image);
        self.index = Some(self.versions.len() - 1);
    }

    /// Returns true when the index moved.
    pub fn undo(&mut self) -> bool {
        match self.index {
            Some(index) if index > 0 => {
                self.index = Some(index - 1);
                true
            }
            _ => false,
        }
    }

    /// Returns true when the index moved.
    pub fn redo(&mut self) -> bool {
        match self.index {
            Some(index) if index + 1 < self.versions.len() => {
                self.index = Some(index + 1);
                true
            }
            _ => false,
        }
    }

    /// Jumps back to the original upload without discarding the redo branch.
    pub fn reset_to_original(&mut self) {
        if !self.versions.is_empty() {
            self.index = Some(0);
        }
    }

    pub fn current(&self) -> Option<&ImageVersion> {
        self.index.and_then(|index| self.versions.get(index))
    }

    pub fn original(&self) -> Option<&ImageVersion> {
        self.versions.first()
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn can_undo(&self) -> bool {
        matches!(self.index, Some(index) if index > 0)
    }

    pub fn can_redo(&self) -> bool {
        matches!(self.index, Some(index) if index + 1 < self.versions.len())
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn versions(&self) -> &[ImageVersion] {
        self.versions.as_slice()
    }

    pub fn clear(&mut self) {
        self.versions.clear();
        self.index = None;
    }
}

#[cfg(test)]
mod tests {
    use super::{History, ImageVersion};

    fn image(name: &str) -> ImageVersion {
        ImageVersion::new(name, "image/png", name.as_bytes().to_vec())
    }

    fn names(history: &History) -> Vec<&str> {
        history
            .versions()
            .iter()
            .map(|version| version.name.as_str())
            .collect()
    }

    fn current_name(history: &History) -> Option<&str> {
        history.current().map(|version| version.name.as_str())
    }

    #[test]
    fn empty_history_has_no_index_or_navigation() {
        let mut history = History::new();
        assert_eq!(history.index(), None);
        assert!(history.current().is_none());
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(!history.undo());
        assert!(!history.redo());
        history.reset_to_original();
        assert_eq!(history.index(), None);
    }

    #[test]
    fn reset_replaces_everything_with_single_version() {
        let mut history = History::new();
        history.reset(image("a"));
        history.append(image("b"));
        history.reset(image("z"));
        assert_eq!(names(&history), vec!["z"]);
        assert_eq!(history.index(), Some(0));
        assert_eq!(current_name(&history), Some("z"));
    }

    #[test]
    fn append_after_undo_discards_redo_branch() {
        let mut history = History::new();
        history.reset(image("A"));
        history.append(image("B"));
        history.append(image("C"));
        assert_eq!(history.index(), Some(2));

        assert!(history.undo());
        assert_eq!(history.index(), Some(1));
        history.append(image("D"));

        assert_eq!(names(&history), vec!["A", "B", "D"]);
        assert_eq!(history.index(), Some(2));
        assert!(!history.can_redo());
    }

    #[test]
    fn reset_to_original_keeps_redo_branch() {
        let mut history = History::new();
        history.reset(image("A"));
        history.append(image("B"));
        history.append(image("C"));

        history.reset_to_original();
        assert_eq!(history.index(), Some(0));
        assert_eq!(history.len(), 3);
        assert!(history.redo());
        assert_eq!(current_name(&history), Some("B"));
    }

    #[test]
    fn navigation_is_noop_at_bounds() {
        let mut history = History::new();
        history.reset(image("A"));
        history.append(image("B"));

        assert!(!history.redo());
        assert_eq!(history.index(), Some(1));
        assert!(history.undo());
        assert!(!history.undo());
        assert_eq!(history.index(), Some(0));
        assert_eq!(current_name(&history), Some("A"));
    }

    #[test]
    fn current_tracks_latest_append_or_navigation() {
        let mut history = History::new();
        history.reset(image("v0"));
        let script = [
            ("append", "v1"),
            ("append", "v2"),
            ("undo", ""),
            ("undo", ""),
            ("redo", ""),
            ("append", "v3"),
            ("undo", ""),
            ("append", "v4"),
            ("redo", ""),
        ];
        let mut expected = vec!["v0".to_string()];
        let mut index = 0usize;
        for (op, name) in script {
            match op {
                "append" => {
                    history.append(image(name));
                    expected.truncate(index + 1);
                    expected.push(name.to_string());
                    index = expected.len() - 1;
                    assert_eq!(current_name(&history), Some(name));
                }
                "undo" => {
                    history.undo();
                    index = index.saturating_sub(1);
                }
                _ => {
                    history.redo();
                    if index + 1 < expected.len() {
                        index += 1;
                    }
                }
            }
            assert_eq!(history.index(), Some(index));
            assert_eq!(current_name(&history), Some(expected[index].as_str()));
            assert_eq!(history.can_undo(), index > 0);
            assert_eq!(history.can_redo(), index + 1 < expected.len());
        }
        assert_eq!(names(&history), vec!["v0", "v1", "v4"]);
    }

    #[test]
    fn append_on_empty_history_starts_at_zero() {
        let mut history = History::new();
        history.append(image("first"));
        assert_eq!(history.index(), Some(0));
        assert_eq!(
            history.original().map(|version| version.name.as_str()),
            Some("first")
        );
    }

    #[test]
    fn generated_versions_carry_operation_name_and_digest() {
        let version = ImageVersion::generated("filter", "image/png", vec![1, 2, 3]);
        assert!(version.name.starts_with("filter-"));
        assert_eq!(version.digest.len(), 12);
        assert_eq!(version.len(), 3);
    }
}
