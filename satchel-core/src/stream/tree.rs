use crate::error::{Result, SatchelError};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Always excluded from file scans.
const ALWAYS_EXCLUDED_FILES: &[&str] = &[".", "..", ".DS_Store"];

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DirNode {
    pub dir_id: u32,
    /// Relative to the scan root; the root itself is `/`.
    pub path: String,
    pub mtime: i64,
    pub perm: u32,
    pub props_included: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemNode {
    pub item_id: u32,
    /// Owning directory node.
    pub dir_id: u32,
    pub name: String,
    pub size: u64,
    pub mtime: i64,
    pub perm: u32,
    pub props_included: bool,
}

/// In-memory description of one scanned root. Dir and item ids are drawn
/// from a single counter starting at 1, so the two id sets never overlap.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    /// Basename of the scan root; empty for filesystem roots. Reproduced
    /// on extraction to namespace this tree inside a multi-tree archive.
    pub parent_path_prefix: String,
    pub dir_nodes: Vec<DirNode>,
    pub item_nodes: Vec<ItemNode>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub dirs: u64,
    pub items: u64,
    pub bytes: u64,
}

impl Tree {
    pub fn stats(&self) -> TreeStats {
        TreeStats {
            dirs: self.dir_nodes.len() as u64,
            items: self.item_nodes.len() as u64,
            bytes: self.item_nodes.iter().map(|i| i.size).sum(),
        }
    }

    pub fn dir_by_id(&self, dir_id: u32) -> Option<&DirNode> {
        self.dir_nodes.iter().find(|d| d.dir_id == dir_id)
    }

    pub fn item_by_id(&self, item_id: u32) -> Option<&ItemNode> {
        self.item_nodes.iter().find(|i| i.item_id == item_id)
    }

    /// Path of an item relative to the tree root (no prefix applied).
    pub fn item_rel_path(&self, item: &ItemNode) -> Result<String> {
        let dir = self
            .dir_by_id(item.dir_id)
            .ok_or_else(|| SatchelError::Format(format!("item {} has unknown dir", item.item_id)))?;
        Ok(if dir.path == "/" {
            item.name.clone()
        } else {
            format!("{}/{}", dir.path, item.name)
        })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(self, &mut out)
            .map_err(|e| SatchelError::Format(format!("encode tree: {e}")))?;
        Ok(out)
    }

    pub fn from_cbor(bytes: &[u8]) -> Result<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| SatchelError::Format(format!("decode tree: {e}")))
    }
}

/// Enumerated scan controls. Patterns are shell globs matched against
/// basenames; exclusions dominate inclusions, and a non-empty inclusion
/// list with no match excludes the entry.
#[derive(Clone, Debug, Default)]
pub struct ScanOptions {
    pub include_item_details: bool,
    pub include_empty_paths: bool,
    pub dir_include_patterns: Vec<String>,
    pub dir_exclude_patterns: Vec<String>,
    pub file_include_patterns: Vec<String>,
    pub file_exclude_patterns: Vec<String>,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p).map_err(|e| SatchelError::InvalidInput(format!("bad pattern {p:?}: {e}")))
        })
        .collect()
}

fn admitted(name: &str, includes: &[Pattern], excludes: &[Pattern]) -> bool {
    if excludes.iter().any(|p| p.matches(name)) {
        return false;
    }
    if !includes.is_empty() {
        return includes.iter().any(|p| p.matches(name));
    }
    true
}

fn mode_from(md: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        md.permissions().mode()
    }
    #[cfg(not(unix))]
    {
        let _ = md;
        0o100644
    }
}

fn mtime_from(md: &fs::Metadata) -> i64 {
    md.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Walks one root and produces a `Tree`.
pub struct TreeScanner {
    root: PathBuf,
    opts: ScanOptions,
}

impl TreeScanner {
    pub fn new(root: impl Into<PathBuf>, opts: ScanOptions) -> Self {
        Self {
            root: root.into(),
            opts,
        }
    }

    pub fn scan(&self) -> Result<Tree> {
        let md = fs::metadata(&self.root)
            .map_err(|e| SatchelError::InvalidInput(format!("{}: {e}", self.root.display())))?;
        if !md.is_dir() {
            return Err(SatchelError::InvalidInput(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        let dir_inc = compile(&self.opts.dir_include_patterns)?;
        let dir_exc = compile(&self.opts.dir_exclude_patterns)?;
        let file_inc = compile(&self.opts.file_include_patterns)?;
        let file_exc = compile(&self.opts.file_exclude_patterns)?;

        let prefix = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut tree = Tree {
            parent_path_prefix: prefix,
            ..Tree::default()
        };
        let mut next_id: u32 = 0;
        let mut dir_ids: HashMap<String, u32> = HashMap::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                admitted(&name, &dir_inc, &dir_exc)
            });

        for entry in walker {
            let entry = entry.map_err(|e| SatchelError::Io(std::io::Error::other(e)))?;
            let rel = rel_path(&self.root, entry.path())?;

            if entry.file_type().is_dir() {
                next_id += 1;
                let emd = entry.metadata().ok();
                tree.dir_nodes.push(DirNode {
                    dir_id: next_id,
                    path: rel.clone(),
                    mtime: emd.as_ref().map(mtime_from).unwrap_or(0),
                    perm: emd.as_ref().map(mode_from).unwrap_or(0o040755),
                    props_included: self.opts.include_item_details,
                });
                dir_ids.insert(rel, next_id);
            } else if entry.file_type().is_file() {
                let name = entry.file_name().to_string_lossy().to_string();
                if ALWAYS_EXCLUDED_FILES.contains(&name.as_str()) {
                    continue;
                }
                if !admitted(&name, &file_inc, &file_exc) {
                    continue;
                }
                let parent_rel = match entry.path().parent() {
                    Some(p) => rel_path(&self.root, p)?,
                    None => "/".to_string(),
                };
                let dir_id = match dir_ids.get(&parent_rel) {
                    Some(&id) => id,
                    // parent excluded by a dir pattern; file goes with it
                    None => continue,
                };
                let emd = entry.metadata().ok();
                next_id += 1;
                tree.item_nodes.push(ItemNode {
                    item_id: next_id,
                    dir_id,
                    name,
                    size: emd.as_ref().map(|m| m.len()).unwrap_or(0),
                    mtime: emd.as_ref().map(mtime_from).unwrap_or(0),
                    perm: emd.as_ref().map(mode_from).unwrap_or(0o100644),
                    props_included: self.opts.include_item_details,
                });
            }
            // symlinks and special files are not archived
        }

        if !self.opts.include_empty_paths {
            prune_empty_dirs(&mut tree);
        }

        Ok(tree)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn rel_path(root: &Path, p: &Path) -> Result<String> {
    let rel = p
        .strip_prefix(root)
        .map_err(|_| SatchelError::Format(format!("{} escapes scan root", p.display())))?;
    let s = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok(if s.is_empty() { "/".to_string() } else { s })
}

/// Drop directories with no items anywhere beneath them. The root node
/// always stays.
fn prune_empty_dirs(tree: &mut Tree) {
    let item_dirs: Vec<String> = tree
        .item_nodes
        .iter()
        .filter_map(|i| tree.dir_by_id(i.dir_id).map(|d| d.path.clone()))
        .collect();

    tree.dir_nodes.retain(|d| {
        if d.path == "/" {
            return true;
        }
        item_dirs
            .iter()
            .any(|ip| ip == &d.path || ip.starts_with(&format!("{}/", d.path)))
    });
}
