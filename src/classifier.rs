//! Decides which paths never reach the document store.
//!
//! Matching is case-insensitive and treats `/` and `\` alike, so the same rules
//! apply to paths from any platform. Rules are checked in a fixed order and the
//! first hit wins; [`IgnoreReason`] names it for logging.

use std::path::{Path, PathBuf};

/// Why a path was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A component that starts with `.`.
    Hidden,
    /// A package or dependency directory.
    Dependency,
    /// A version-control directory that is not already hidden.
    VersionControl,
    /// Desktop or thumbnail index files written by the OS.
    OsMetadata,
    /// Editor swap, backup, lock, and partial-download files.
    EditorArtifact,
    /// A reserved device name such as `con` or `lpt1`.
    ReservedName,
}

const DEPENDENCY_DIRS: &[&str] = &[
    "node_modules",
    "bower_components",
    "jspm_packages",
    "__pycache__",
    "site-packages",
];

const VCS_DIRS: &[&str] = &["cvs", "_darcs", "_svn", "_fossil"];

const OS_METADATA_FILES: &[&str] = &[
    "thumbs.db",
    "ehthumbs.db",
    "ehthumbs_vista.db",
    "desktop.ini",
    "$recycle.bin",
    "system volume information",
    "icon\r",
];

const EDITOR_SUFFIXES: &[&str] = &[
    "~", ".swp", ".swo", ".swx", ".swn", ".tmp", ".temp", ".bak", ".orig", ".crdownload",
    ".part",
];

const RESERVED_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

/// Returns the first rule `path` matches, if any.
pub fn classify(path: &str) -> Option<IgnoreReason> {
    let normalized = path.replace('\\', "/").to_lowercase();
    let components: Vec<&str> = normalized
        .split('/')
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect();
    let file_name = components.last().copied()?;

    if components.iter().any(|c| c.starts_with('.')) {
        return Some(IgnoreReason::Hidden);
    }
    if components.iter().any(|c| DEPENDENCY_DIRS.contains(c)) {
        return Some(IgnoreReason::Dependency);
    }
    if components.iter().any(|c| VCS_DIRS.contains(c)) {
        return Some(IgnoreReason::VersionControl);
    }
    if components.iter().any(|c| OS_METADATA_FILES.contains(c)) {
        return Some(IgnoreReason::OsMetadata);
    }
    if is_editor_artifact(file_name) {
        return Some(IgnoreReason::EditorArtifact);
    }
    if is_reserved_name(file_name) {
        return Some(IgnoreReason::ReservedName);
    }
    None
}

/// Whether `path` is excluded from reconciliation.
pub fn should_ignore(path: &str) -> bool {
    classify(path).is_some()
}

fn is_editor_artifact(name: &str) -> bool {
    EDITOR_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
        // emacs autosave `#file#`, office lock `~$file`, vim's write probe `4913`
        || (name.len() > 1 && name.starts_with('#') && name.ends_with('#'))
        || name.starts_with("~$")
        || name == "4913"
}

fn is_reserved_name(name: &str) -> bool {
    let stem = name.split('.').next().unwrap_or(name).trim_end();
    RESERVED_NAMES.contains(&stem)
}

/// Classifier bound to a watch root.
///
/// Only the part of a path below the root is matched, so a root that itself lives
/// under a hidden directory does not hide everything inside it.
#[derive(Debug, Clone)]
pub struct PathClassifier {
    root: PathBuf,
}

impl PathClassifier {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn classify(&self, path: &Path) -> Option<IgnoreReason> {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        classify(&relative.to_string_lossy())
    }

    pub fn should_ignore(&self, path: &Path) -> bool {
        self.classify(path).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_hidden_files_and_directories() {
        assert_eq!(classify("notes/.hidden.md"), Some(IgnoreReason::Hidden));
        assert_eq!(classify(".git/HEAD"), Some(IgnoreReason::Hidden));
        assert_eq!(classify("a/.DS_Store"), Some(IgnoreReason::Hidden));
        assert!(!should_ignore("notes/visible.md"));
    }

    #[test]
    fn ignores_dependency_and_vcs_directories() {
        assert_eq!(
            classify("web/node_modules/pkg/readme.md"),
            Some(IgnoreReason::Dependency)
        );
        assert_eq!(classify("src/CVS/Entries"), Some(IgnoreReason::VersionControl));
    }

    #[test]
    fn ignores_os_metadata_and_editor_artifacts() {
        assert_eq!(classify("photos/Thumbs.db"), Some(IgnoreReason::OsMetadata));
        assert_eq!(classify("desktop.ini"), Some(IgnoreReason::OsMetadata));
        assert_eq!(classify("notes.txt~"), Some(IgnoreReason::EditorArtifact));
        assert_eq!(classify("notes.txt.swp"), Some(IgnoreReason::EditorArtifact));
        assert_eq!(classify("#notes.txt#"), Some(IgnoreReason::EditorArtifact));
        assert_eq!(classify("~$report.docx"), Some(IgnoreReason::EditorArtifact));
        assert_eq!(classify("dir/4913"), Some(IgnoreReason::EditorArtifact));
    }

    #[test]
    fn ignores_reserved_device_names() {
        assert_eq!(classify("CON"), Some(IgnoreReason::ReservedName));
        assert_eq!(classify("docs/nul.txt"), Some(IgnoreReason::ReservedName));
        assert_eq!(classify("lpt9"), Some(IgnoreReason::ReservedName));
        assert!(!should_ignore("console.md"));
        assert!(!should_ignore("com10.md"));
    }

    #[test]
    fn separators_and_case_do_not_matter() {
        for path in [
            "C:\\work\\Node_Modules\\x.md",
            "/work/node_modules/x.md",
            "work\\NODE_MODULES/x.md",
        ] {
            assert_eq!(classify(path), Some(IgnoreReason::Dependency), "{path}");
        }
        assert_eq!(classify("docs\\.Hidden\\a.md"), Some(IgnoreReason::Hidden));
    }

    #[test]
    fn empty_path_is_not_ignored() {
        assert!(!should_ignore(""));
        assert!(!should_ignore("/"));
    }

    #[test]
    fn rooted_classifier_only_looks_below_root() {
        let classifier = PathClassifier::new("/home/me/.config/notes");
        assert!(!classifier.should_ignore(Path::new("/home/me/.config/notes/todo.md")));
        assert!(classifier.should_ignore(Path::new("/home/me/.config/notes/.cache/x.md")));
    }
}
