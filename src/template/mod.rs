//! Template file trees mounted into a sandbox.
//!
//! A [`FileTree`] maps entry names to [`FileNode`]s. Its serialized form is
//! the mount shape sandbox runtimes consume:
//!
//! ```json
//! { "src": { "directory": { "main.ts": { "file": { "contents": "..." } } } } }
//! ```

pub mod starter;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A node in a template tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileNode {
    /// A file holding textual content.
    File { contents: String },
    /// A directory holding more entries.
    Directory(FileTree),
}

impl FileNode {
    /// Creates a file node.
    pub fn file(contents: impl Into<String>) -> Self {
        Self::File {
            contents: contents.into(),
        }
    }

    /// Returns the file contents, or `None` for directories.
    pub fn contents(&self) -> Option<&str> {
        match self {
            Self::File { contents } => Some(contents),
            Self::Directory(_) => None,
        }
    }
}

/// A finite, acyclic tree of named entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree {
    entries: BTreeMap<String, FileNode>,
}

impl FileTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file entry.
    pub fn with_file(mut self, name: impl Into<String>, contents: impl Into<String>) -> Self {
        self.entries.insert(name.into(), FileNode::file(contents));
        self
    }

    /// Adds a directory entry.
    pub fn with_directory(mut self, name: impl Into<String>, tree: FileTree) -> Self {
        self.entries.insert(name.into(), FileNode::Directory(tree));
        self
    }

    /// Inserts an entry, returning the node it replaced.
    pub fn insert(&mut self, name: impl Into<String>, node: FileNode) -> Option<FileNode> {
        self.entries.insert(name.into(), node)
    }

    /// Iterates over the direct entries in name order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &FileNode)> {
        self.entries.iter().map(|(name, node)| (name.as_str(), node))
    }

    /// Returns true if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up the node at a forward-slash-delimited path.
    pub fn get(&self, path: &str) -> Option<&FileNode> {
        let segments = path_segments(path).ok()?;
        let (last, parents) = segments.split_last()?;

        let mut tree = self;
        for segment in parents {
            match tree.entries.get(*segment)? {
                FileNode::Directory(child) => tree = child,
                FileNode::File { .. } => return None,
            }
        }
        tree.entries.get(*last)
    }

    /// Returns the contents of the file at `path`.
    pub fn file_contents(&self, path: &str) -> Result<&str> {
        match self.get(path) {
            Some(FileNode::File { contents }) => Ok(contents),
            Some(FileNode::Directory(_)) => {
                Err(Error::Template(format!("{} is a directory, not a file", path)))
            }
            None => Err(Error::TemplateNotFound(path.to_string())),
        }
    }

    /// Lists every file as `(path, contents)`, depth-first in name order.
    ///
    /// Paths are relative to the tree root and have no leading slash.
    pub fn files(&self) -> Vec<(String, &str)> {
        let mut out = Vec::new();
        self.collect_files("", &mut out);
        out
    }

    fn collect_files<'a>(&'a self, prefix: &str, out: &mut Vec<(String, &'a str)>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", prefix, name)
            };
            match node {
                FileNode::File { contents } => out.push((path, contents)),
                FileNode::Directory(child) => child.collect_files(&path, out),
            }
        }
    }

    /// Checks that every entry name is usable as a path segment.
    pub fn validate(&self) -> Result<()> {
        for (name, node) in &self.entries {
            if name.is_empty() || name == "." || name == ".." || name.contains('/') {
                return Err(Error::Template(format!("invalid entry name {:?}", name)));
            }
            if let FileNode::Directory(child) = node {
                child.validate()?;
            }
        }
        Ok(())
    }

    /// Parses a tree from its JSON mount shape.
    pub fn from_json(json: &str) -> Result<Self> {
        let tree: FileTree = serde_json::from_str(json)?;
        tree.validate()?;
        Ok(tree)
    }

    /// Loads a tree from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }
}

/// Splits a sandbox path into its segments.
///
/// A single leading `/` is allowed. Empty, `.` and `..` segments are
/// rejected so a path can never leave the sandbox root.
pub fn path_segments(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Err(Error::InvalidPath(path.to_string()));
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == "..")
    {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segments)
}
