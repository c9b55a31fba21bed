use std::{
    collections::BTreeMap,
    io,
    path::{Component, Path},
};

use tempfile::TempDir;
use uuid::Uuid;

/// A private scratch directory for one test case. The directory and
/// everything in it is removed when the workspace is dropped.
#[derive(Debug)]
pub struct Workspace {
    id: Uuid,
    dir: TempDir,
}

impl Workspace {
    pub fn create(root: &Path) -> io::Result<Self> {
        std::fs::create_dir_all(root)?;
        let id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("judge-{}-", id.as_simple()))
            .tempdir_in(root)?;
        Ok(Self { id, dir })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `contents` to a file directly inside the workspace.
    pub async fn write_file(&self, name: &str, contents: &str) -> io::Result<()> {
        let mut components = Path::new(name).components();
        let is_plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !is_plain {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("workspace file name must be a plain name: {name}"),
            ));
        }
        tokio::fs::write(self.dir.path().join(name), contents).await
    }

    pub async fn write_files(&self, files: &BTreeMap<String, String>) -> io::Result<()> {
        for (name, contents) in files {
            self.write_file(name, contents).await?;
        }
        Ok(())
    }

    /// Removes the directory now and reports failures, instead of silently on drop.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_files_and_removes_directory_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path()).unwrap();
        let path = workspace.path().to_path_buf();

        workspace.write_file("solution.py", "print(1)").await.unwrap();
        assert_eq!(
            std::fs::read_to_string(path.join("solution.py")).unwrap(),
            "print(1)"
        );

        drop(workspace);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn rejects_names_that_leave_the_workspace() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(root.path()).unwrap();

        for name in ["../escape.txt", "/etc/passwd", "nested/file.txt", ""] {
            let err = workspace.write_file(name, "x").await.unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput, "{name}");
        }
    }

    #[test]
    fn concurrent_workspaces_are_distinct() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(root.path()).unwrap();
        let b = Workspace::create(root.path()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_ne!(a.path(), b.path());
        a.close().unwrap();
        assert!(b.path().exists());
    }
}
