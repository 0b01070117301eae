//! Change events delivered to subscribers.

use std::path::PathBuf;

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::EventKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
}

impl ChangeType {
    /// Merge a newer change into a pending one for the same path.
    ///
    /// The newer kind wins, except that a file created and then written
    /// within one window is still reported as created.
    pub fn coalesce(self, newer: ChangeType) -> ChangeType {
        match (self, newer) {
            (ChangeType::Created, ChangeType::Modified) => ChangeType::Created,
            (_, newer) => newer,
        }
    }
}

/// The `"file-changed"` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChangedEvent {
    pub file_path: PathBuf,
    pub language: String,
    pub change_type: ChangeType,
}

impl FileChangedEvent {
    pub const NAME: &'static str = "file-changed";
}

/// Map a raw notification to per-path changes. Directory, metadata and
/// access events produce nothing.
pub(crate) fn classify(kind: &EventKind, paths: &[PathBuf]) -> Vec<(PathBuf, ChangeType)> {
    let all = |change: ChangeType| -> Vec<(PathBuf, ChangeType)> {
        paths.iter().map(|p| (p.clone(), change)).collect()
    };

    match kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Create(_) => all(ChangeType::Created),
        EventKind::Remove(_) => all(ChangeType::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeType::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeType::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => paths
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let change = if i == 0 {
                    ChangeType::Deleted
                } else {
                    ChangeType::Created
                };
                (p.clone(), change)
            })
            .collect(),
        // Backends that cannot tell the two sides of a rename apart.
        EventKind::Modify(ModifyKind::Name(_)) => paths
            .iter()
            .map(|p| {
                let change = if p.exists() {
                    ChangeType::Created
                } else {
                    ChangeType::Deleted
                };
                (p.clone(), change)
            })
            .collect(),
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => all(ChangeType::Modified),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, DataChange, MetadataKind};

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn test_coalesce() {
        use ChangeType::*;
        assert_eq!(Created.coalesce(Modified), Created);
        assert_eq!(Created.coalesce(Deleted), Deleted);
        assert_eq!(Modified.coalesce(Modified), Modified);
        assert_eq!(Modified.coalesce(Deleted), Deleted);
        assert_eq!(Deleted.coalesce(Created), Created);
    }

    #[test]
    fn test_classify_basic_kinds() {
        let p = paths(&["/w/a.py"]);

        assert_eq!(
            classify(&EventKind::Create(CreateKind::File), &p),
            vec![(p[0].clone(), ChangeType::Created)]
        );
        assert_eq!(
            classify(&EventKind::Modify(ModifyKind::Data(DataChange::Content)), &p),
            vec![(p[0].clone(), ChangeType::Modified)]
        );
        assert_eq!(
            classify(&EventKind::Remove(RemoveKind::File), &p),
            vec![(p[0].clone(), ChangeType::Deleted)]
        );
    }

    #[test]
    fn test_classify_ignores_noise() {
        let p = paths(&["/w/a.py"]);

        assert!(classify(&EventKind::Access(AccessKind::Any), &p).is_empty());
        assert!(classify(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)), &p).is_empty());
        assert!(classify(&EventKind::Create(CreateKind::Folder), &p).is_empty());
    }

    #[test]
    fn test_classify_rename_both() {
        let p = paths(&["/w/old.py", "/w/new.py"]);
        let changes = classify(&EventKind::Modify(ModifyKind::Name(RenameMode::Both)), &p);

        assert_eq!(
            changes,
            vec![
                (p[0].clone(), ChangeType::Deleted),
                (p[1].clone(), ChangeType::Created)
            ]
        );
    }

    #[test]
    fn test_event_json_shape() {
        let event = FileChangedEvent {
            file_path: PathBuf::from("/w/a.py"),
            language: "python".to_string(),
            change_type: ChangeType::Modified,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["filePath"], "/w/a.py");
        assert_eq!(value["changeType"], "modified");
    }
}
