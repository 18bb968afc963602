//! Template linker: include and inheritance resolution.
//!
//! Both passes splice node lists in place while the replace map describes
//! live tree locations. The discipline is snapshot-then-reindex: the map
//! is snapshotted into `(parent, offset)` order before a pass, and after
//! every single splice all affected entries are reindexed, so the
//! invariant `parent.children[offset] == node` holds at all times between
//! mutations.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ast::{BlockMode, IncludeMode, Node, NodeList, TextNode};
use crate::error::{CompileError, ErrorKind, ParseError};
use crate::parser::{self, ExtendsDecl, Pos, ReplaceSlot, SlotKind};

/// One file opened during compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
}

/// Every file visited, template or plain, in first-open order.
pub type Manifest = Vec<FileRecord>;

/// A loaded template: parse output plus the file identity needed for
/// diagnostics.
#[derive(Debug)]
pub struct Template {
    pub path: PathBuf,
    pub source: Arc<str>,
    pub ast: NodeList,
    pub replace_map: HashMap<String, ReplaceSlot>,
    pub extends: Option<ExtendsDecl>,
}

/// Read, lex and parse a template file, recording it in the manifest.
pub fn load_template(path: &Path, io: &mut Manifest) -> Result<Template, CompileError> {
    log::info!("loading template file: {}", path.display());
    let text = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
    io.push(FileRecord {
        path: path.to_path_buf(),
        size: text.len() as u64,
    });
    let source: Arc<str> = Arc::from(text.as_str());
    let parsed =
        parser::parse(&source).map_err(|e| CompileError::parse(e, path, source.clone()))?;
    Ok(Template {
        path: path.to_path_buf(),
        source,
        ast: parsed.ast,
        replace_map: parsed.replace_map,
        extends: parsed.extends,
    })
}

/// Resolves includes and `extends`/`block` inheritance for one primary
/// template.
pub struct Linker {
    base_dir: PathBuf,
    /// Stack of files currently being loaded, for cycle detection.
    loading: Vec<PathBuf>,
}

impl Linker {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            loading: Vec::new(),
        }
    }

    /// Resolve the template in place. After linking, the replace map holds
    /// no include or block entries.
    pub fn link(&mut self, tpl: &mut Template, io: &mut Manifest) -> Result<(), CompileError> {
        self.loading.push(stack_key(&tpl.path));
        let result = self.link_inner(tpl, io);
        self.loading.pop();
        result
    }

    fn link_inner(&mut self, tpl: &mut Template, io: &mut Manifest) -> Result<(), CompileError> {
        self.resolve_includes(tpl, io)?;

        let Some(extends) = tpl.extends.clone() else {
            // no inheritance: remaining named blocks keep their default
            // children in place
            resolve_default_blocks(tpl)?;
            return Ok(());
        };

        let layout_path = self.base_dir.join(&extends.path);
        self.check_cycle(&layout_path, extends.pos, tpl)?;
        let mut layout = load_template(&layout_path, io)?;
        self.loading.push(stack_key(&layout_path));
        let resolved = self.resolve_includes(&mut layout, io);
        self.loading.pop();
        resolved?;

        resolve_blocks(&mut layout, tpl)?;
        tpl.ast = layout.ast;
        tpl.replace_map.clear();
        Ok(())
    }

    fn resolve_includes(&mut self, tpl: &mut Template, io: &mut Manifest) -> Result<(), CompileError> {
        for key in snapshot_keys(&tpl.replace_map, SlotKind::Include) {
            let Some(slot) = tpl.replace_map.remove(&key) else {
                continue;
            };

            let (path_str, mode, pos) = {
                let vec = children_at(&mut tpl.ast, &slot.parent)?;
                match vec.get(slot.offset) {
                    Some(Node::Include(inc)) => (inc.path.clone(), inc.mode, inc.pos),
                    _ => {
                        return Err(CompileError::Invariant(format!(
                            "replace slot for '{}' does not point at an include node",
                            key
                        )))
                    }
                }
            };
            let full = self.base_dir.join(&path_str);

            let replacement = match mode {
                IncludeMode::Plain => {
                    log::info!("loading file: {}", full.display());
                    let bytes = fs::read(&full).map_err(|e| CompileError::io(&full, e))?;
                    io.push(FileRecord {
                        path: full.clone(),
                        size: bytes.len() as u64,
                    });
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    vec![Node::Text(TextNode { text, pos })]
                }
                IncludeMode::Template => {
                    self.check_cycle(&full, pos, tpl)?;
                    let mut inc = load_template(&full, io)?;
                    self.loading.push(stack_key(&full));
                    let resolved = self.resolve_includes(&mut inc, io);
                    self.loading.pop();
                    resolved?;
                    inc.ast
                }
            };

            splice(&mut tpl.ast, &mut tpl.replace_map, &slot, replacement, SubtreeRemap::Drop)?;
        }
        Ok(())
    }

    fn check_cycle(&self, path: &Path, pos: Pos, tpl: &Template) -> Result<(), CompileError> {
        let key = stack_key(path);
        if self.loading.contains(&key) {
            let error = ParseError::new(
                ErrorKind::IncludeCycle,
                format!("include cycle: {} is already being loaded", path.display()),
                pos,
            );
            return Err(CompileError::parse(error, &tpl.path, tpl.source.clone()));
        }
        Ok(())
    }
}

/// Identity used on the loading stack. Canonical when the file exists so
/// different spellings of one path still collide.
fn stack_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Merge layout blocks with the child template's overrides, splicing the
/// final children in place of each block node.
fn resolve_blocks(layout: &mut Template, child: &mut Template) -> Result<(), CompileError> {
    for key in snapshot_keys(&layout.replace_map, SlotKind::Block) {
        let Some(slot) = layout.replace_map.remove(&key) else {
            continue;
        };

        let (mut layout_children, name) = {
            let vec = children_at(&mut layout.ast, &slot.parent)?;
            match vec.get_mut(slot.offset) {
                Some(Node::Block(b)) => (std::mem::take(&mut b.children), b.name.clone()),
                _ => {
                    return Err(CompileError::Invariant(format!(
                        "replace slot for block '{}' does not point at a block node",
                        key
                    )))
                }
            }
        };

        let (final_children, remap) = match take_child_block(child, &name) {
            None => (layout_children, SubtreeRemap::Lift { base: 0 }),
            Some((BlockMode::Replace, child_children)) => (child_children, SubtreeRemap::Drop),
            Some((BlockMode::Prepend, mut child_children)) => {
                let base = child_children.len();
                child_children.append(&mut layout_children);
                (child_children, SubtreeRemap::Lift { base })
            }
            Some((BlockMode::Append, child_children)) => {
                layout_children.extend(child_children);
                (layout_children, SubtreeRemap::Lift { base: 0 })
            }
        };

        splice(&mut layout.ast, &mut layout.replace_map, &slot, final_children, remap)?;
    }
    Ok(())
}

/// Pull the override children for `name` out of the child template, if it
/// declares a matching block. A stale slot (its node moved by an earlier
/// splice) counts as no override.
fn take_child_block(child: &mut Template, name: &str) -> Option<(BlockMode, NodeList)> {
    let slot = child.replace_map.get(name)?;
    if slot.kind != SlotKind::Block {
        return None;
    }
    let slot = slot.clone();
    let Ok(vec) = children_at(&mut child.ast, &slot.parent) else {
        log::warn!("block [{}] override could not be located; using defaults", name);
        return None;
    };
    match vec.get_mut(slot.offset) {
        Some(Node::Block(b)) => Some((b.mode, std::mem::take(&mut b.children))),
        _ => {
            log::warn!("block [{}] override could not be located; using defaults", name);
            None
        }
    }
}

/// Without inheritance, a named block renders its own children.
fn resolve_default_blocks(tpl: &mut Template) -> Result<(), CompileError> {
    for key in snapshot_keys(&tpl.replace_map, SlotKind::Block) {
        let Some(slot) = tpl.replace_map.remove(&key) else {
            continue;
        };
        let children = {
            let vec = children_at(&mut tpl.ast, &slot.parent)?;
            match vec.get_mut(slot.offset) {
                Some(Node::Block(b)) => std::mem::take(&mut b.children),
                _ => {
                    return Err(CompileError::Invariant(format!(
                        "replace slot for block '{}' does not point at a block node",
                        key
                    )))
                }
            }
        };
        splice(
            &mut tpl.ast,
            &mut tpl.replace_map,
            &slot,
            children,
            SubtreeRemap::Lift { base: 0 },
        )?;
    }
    Ok(())
}

/// Keys of every entry of `kind`, sorted by `(parent, offset)`.
fn snapshot_keys(map: &HashMap<String, ReplaceSlot>, kind: SlotKind) -> Vec<String> {
    let mut entries: Vec<(&String, &ReplaceSlot)> =
        map.iter().filter(|(_, s)| s.kind == kind).collect();
    entries.sort_by(|a, b| {
        a.1.parent
            .cmp(&b.1.parent)
            .then(a.1.offset.cmp(&b.1.offset))
    });
    entries.into_iter().map(|(k, _)| k.clone()).collect()
}

/// Walk a parent path down to its child list.
fn children_at<'t>(root: &'t mut NodeList, path: &[usize]) -> Result<&'t mut NodeList, CompileError> {
    let mut list = root;
    for &index in path {
        let node = list.get_mut(index).ok_or_else(|| {
            CompileError::Invariant(format!("replace slot path component {} out of range", index))
        })?;
        list = node.children_mut().ok_or_else(|| {
            CompileError::Invariant("replace slot path traverses a leaf node".to_string())
        })?;
    }
    Ok(list)
}

/// What happens to map entries living under a replaced node.
#[derive(Debug, Clone, Copy)]
enum SubtreeRemap {
    /// The node's subtree is discarded; entries under it are erased.
    Drop,
    /// The node's children were spliced into its parent starting at
    /// `slot.offset + base`; entries under it lift one level up.
    Lift { base: usize },
}

/// Replace the node at `slot` with `replacement`, then reindex the map.
fn splice(
    ast: &mut NodeList,
    map: &mut HashMap<String, ReplaceSlot>,
    slot: &ReplaceSlot,
    replacement: NodeList,
    remap: SubtreeRemap,
) -> Result<(), CompileError> {
    let vec = children_at(ast, &slot.parent)?;
    if slot.offset >= vec.len() {
        return Err(CompileError::Invariant(format!(
            "replace slot offset {} out of range ({} children)",
            slot.offset,
            vec.len()
        )));
    }
    let inserted = replacement.len();
    vec.splice(slot.offset..slot.offset + 1, replacement);
    reindex(map, &slot.parent, slot.offset, inserted, remap);
    Ok(())
}

/// Reindex every entry affected by replacing one node at
/// `(parent, at)` with `inserted` nodes.
fn reindex(
    map: &mut HashMap<String, ReplaceSlot>,
    parent: &[usize],
    at: usize,
    inserted: usize,
    remap: SubtreeRemap,
) {
    let shift = |offset: usize| offset - 1 + inserted;
    let mut dead = Vec::new();

    for (key, slot) in map.iter_mut() {
        if slot.parent.as_slice() == parent {
            if slot.offset == at {
                dead.push(key.clone());
            } else if slot.offset > at {
                slot.offset = shift(slot.offset);
            }
            continue;
        }
        if slot.parent.len() > parent.len() && slot.parent.starts_with(parent) {
            let component = slot.parent[parent.len()];
            if component > at {
                slot.parent[parent.len()] = shift(component);
            } else if component == at {
                match remap {
                    SubtreeRemap::Drop => dead.push(key.clone()),
                    SubtreeRemap::Lift { base } => {
                        if slot.parent.len() > parent.len() + 1 {
                            // [parent, at, j, ...] -> [parent, at + base + j, ...]
                            let j = slot.parent[parent.len() + 1];
                            slot.parent.remove(parent.len());
                            slot.parent[parent.len()] = at + base + j;
                        } else {
                            // the replaced node itself was the parent
                            slot.parent.truncate(parent.len());
                            slot.offset += at + base;
                        }
                    }
                }
            }
        }
    }

    for key in dead {
        map.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(kind: SlotKind, parent: &[usize], offset: usize) -> ReplaceSlot {
        ReplaceSlot {
            kind,
            parent: parent.to_vec(),
            offset,
        }
    }

    #[test]
    fn reindex_shifts_later_siblings() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), slot(SlotKind::Block, &[], 3));
        map.insert("b".to_string(), slot(SlotKind::Block, &[], 1));
        // node at offset 2 replaced by 4 nodes
        reindex(&mut map, &[], 2, 4, SubtreeRemap::Drop);
        assert_eq!(map["a"].offset, 6);
        assert_eq!(map["b"].offset, 1);
    }

    #[test]
    fn reindex_shifts_paths_through_later_siblings() {
        let mut map = HashMap::new();
        map.insert("deep".to_string(), slot(SlotKind::Block, &[2, 0], 1));
        reindex(&mut map, &[], 0, 3, SubtreeRemap::Drop);
        assert_eq!(map["deep"].parent, vec![4, 0]);
    }

    #[test]
    fn reindex_drops_entries_under_a_discarded_subtree() {
        let mut map = HashMap::new();
        map.insert("inner".to_string(), slot(SlotKind::Block, &[1, 0], 0));
        reindex(&mut map, &[], 1, 2, SubtreeRemap::Drop);
        assert!(map.is_empty());
    }

    #[test]
    fn reindex_lifts_entries_when_children_move_up() {
        let mut map = HashMap::new();
        // parent chain [1(block), 2(div)], offset 0
        map.insert("inner".to_string(), slot(SlotKind::Block, &[1, 2], 0));
        // entry whose parent IS the replaced block
        map.insert("direct".to_string(), slot(SlotKind::Block, &[1], 1));
        // block at root offset 1 replaced by its 3 children, base 0
        reindex(&mut map, &[], 1, 3, SubtreeRemap::Lift { base: 0 });
        assert_eq!(map["inner"].parent, vec![3]);
        assert_eq!(map["inner"].offset, 0);
        assert_eq!(map["direct"].parent, Vec::<usize>::new());
        assert_eq!(map["direct"].offset, 2);
    }

    #[test]
    fn reindex_lift_honors_a_prepend_base() {
        let mut map = HashMap::new();
        map.insert("inner".to_string(), slot(SlotKind::Block, &[0, 1], 0));
        // 2 override children prepended before the block's own children
        reindex(&mut map, &[], 0, 4, SubtreeRemap::Lift { base: 2 });
        assert_eq!(map["inner"].parent, vec![3]);
    }
}
