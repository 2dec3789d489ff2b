//! Durable note store
//!
//! Memories are authoritative as git notes, one notes ref per namespace
//! (`refs/notes/mem/<namespace>`), one note per commit and namespace.
//! [`NoteStore`] is the seam the engine consumes; [`GitNoteStore`] backs it
//! with the `git` CLI.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use crate::error::{MemoryError, Result};
use crate::memory::{CommitInfo, Namespace};

/// Notes ref prefix; the namespace is appended
pub const NOTES_REF_PREFIX: &str = "refs/notes/mem";

/// A raw note and the commit it is attached to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredNote {
    pub commit_sha: String,
    pub text: String,
}

/// Authoritative, append-only store of note texts
pub trait NoteStore: Send + Sync {
    /// Raw note text for a commit and namespace, `None` when absent
    fn show_note(&self, commit: &str, namespace: Namespace) -> Result<Option<String>>;

    /// Commit metadata
    fn get_commit_info(&self, commit: &str) -> Result<CommitInfo>;

    /// Paths touched by a commit, in git's order
    fn get_changed_files(&self, commit: &str) -> Result<Vec<String>>;

    /// File content at a commit, `None` when the path does not exist there
    fn get_file_at_commit(&self, commit: &str, path: &str) -> Result<Option<String>>;

    /// Every note in a namespace
    fn list_notes(&self, namespace: Namespace) -> Result<Vec<StoredNote>>;

    /// Attach a new note; fails with `AlreadyCaptured` if one exists
    fn add_note(&self, commit: &str, namespace: Namespace, text: &str) -> Result<()>;

    /// Resolve a revision (e.g. `HEAD`) to a full commit sha
    fn resolve_commit(&self, rev: &str) -> Result<String>;
}

/// Notes ref for a namespace
pub fn notes_ref(namespace: Namespace) -> String {
    format!("{NOTES_REF_PREFIX}/{namespace}")
}

/// [`NoteStore`] backed by git notes in a local repository.
pub struct GitNoteStore {
    repo_path: PathBuf,
}

impl GitNoteStore {
    /// Open the repository at `repo_path`.
    pub fn new(repo_path: &Path) -> Result<Self> {
        // Verify git is available
        let output = Command::new("git")
            .arg("--version")
            .output()
            .map_err(|_| MemoryError::GitNotAvailable)?;

        if !output.status.success() {
            return Err(MemoryError::GitNotAvailable);
        }

        // Verify path is a git repository
        let output = Command::new("git")
            .current_dir(repo_path)
            .args(["rev-parse", "--git-dir"])
            .output()?;

        if !output.status.success() {
            return Err(MemoryError::NotARepository(repo_path.to_path_buf()));
        }

        Ok(Self {
            repo_path: repo_path.to_path_buf(),
        })
    }

    /// Get repository root path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_path);
        cmd
    }

    fn output(&self, args: &[&str]) -> Result<Output> {
        Ok(self.command().args(args).output()?)
    }

    /// Run git and return stdout, failing on a non-zero exit
    fn run(&self, args: &[&str]) -> Result<String> {
        let output = self.output(args)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MemoryError::git(stderr.trim().to_string()));
        }

        Ok(String::from_utf8(output.stdout)?)
    }
}

impl NoteStore for GitNoteStore {
    fn show_note(&self, commit: &str, namespace: Namespace) -> Result<Option<String>> {
        let ref_arg = format!("--ref={}", notes_ref(namespace));
        let output = self.output(&["notes", &ref_arg, "show", commit])?;

        if output.status.success() {
            return Ok(Some(String::from_utf8(output.stdout)?));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("no note found") {
            Ok(None)
        } else {
            Err(MemoryError::git(stderr.trim().to_string()))
        }
    }

    fn get_commit_info(&self, commit: &str) -> Result<CommitInfo> {
        let stdout = self.run(&[
            "show",
            "-s",
            "--format=%H%x00%an%x00%ae%x00%aI%x00%B",
            commit,
        ])?;

        let mut fields = stdout.splitn(5, '\0');
        let mut next = || fields.next().map(str::to_string);
        match (next(), next(), next(), next(), next()) {
            (Some(sha), Some(author_name), Some(author_email), Some(date), Some(message)) => {
                Ok(CommitInfo {
                    sha,
                    author_name,
                    author_email,
                    date,
                    message: message.trim().to_string(),
                })
            }
            _ => Err(MemoryError::git(format!(
                "unexpected `git show` output for {commit}"
            ))),
        }
    }

    fn get_changed_files(&self, commit: &str) -> Result<Vec<String>> {
        let stdout = self.run(&["show", "--name-only", "--format=", commit])?;
        Ok(stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn get_file_at_commit(&self, commit: &str, path: &str) -> Result<Option<String>> {
        let spec = format!("{commit}:{path}");
        let output = self.output(&["show", &spec])?;

        if !output.status.success() {
            // Deleted or renamed away in this commit
            log::debug!("{} not present at {}", path, commit);
            return Ok(None);
        }

        Ok(Some(String::from_utf8_lossy(&output.stdout).into_owned()))
    }

    fn list_notes(&self, namespace: Namespace) -> Result<Vec<StoredNote>> {
        let ref_arg = format!("--ref={}", notes_ref(namespace));
        let listing = self.run(&["notes", &ref_arg, "list"])?;

        let mut notes = Vec::new();
        for line in listing.lines() {
            let Some((blob, commit)) = line.split_once(' ') else {
                continue;
            };
            let text = self.run(&["cat-file", "blob", blob])?;
            notes.push(StoredNote {
                commit_sha: commit.trim().to_string(),
                text,
            });
        }

        Ok(notes)
    }

    fn add_note(&self, commit: &str, namespace: Namespace, text: &str) -> Result<()> {
        let ref_arg = format!("--ref={}", notes_ref(namespace));
        let mut child = self
            .command()
            .args(["notes", &ref_arg, "add", "-F", "-", commit])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(text.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("existing notes") {
            Err(MemoryError::AlreadyCaptured {
                commit: commit.to_string(),
                namespace: namespace.to_string(),
            })
        } else {
            Err(MemoryError::git(stderr.trim().to_string()))
        }
    }

    fn resolve_commit(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        Ok(self
            .run(&["rev-parse", "--verify", "--quiet", &spec])
            .map_err(|_| MemoryError::git(format!("unknown revision: {rev}")))?
            .trim()
            .to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notes_ref() {
        assert_eq!(notes_ref(Namespace::Decisions), "refs/notes/mem/decisions");
    }

    #[test]
    fn test_not_a_repository() {
        let temp = tempfile::TempDir::new().unwrap();
        match GitNoteStore::new(temp.path()) {
            Err(MemoryError::NotARepository(path)) => assert_eq!(path, temp.path()),
            // No git binary on this machine
            Err(MemoryError::GitNotAvailable) => {}
            other => panic!("unexpected: {:?}", other.map(|s| s.repo_path)),
        }
    }
}
