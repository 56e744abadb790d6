//! Traversal over a table B-Tree: a cursor holds a trail of `(node, cell index)` pairs from the
//! root down to its current position, and walks that trail with explicit loops rather than
//! recursion.

use tracing::trace;

use crate::btree::BTree;
use crate::cell::Cell;
use crate::error::{err, Error};
use crate::node::Node;
use crate::pager::PageNum;

/// One entry in a cursor's trail: a loaded node and the cell index the cursor is positioned at
/// within it. For an internal node, `cell_num == node.n_cells` means "positioned at the
/// right-page child" rather than at any numbered cell.
struct TrailEntry {
    node: Node,
    cell_num: u16,
}

/// A forward/backward iterator over the table B-Tree rooted at `root_page`.
///
/// Three logical states: `Uninitialized` (just after `new`, trail holds only the unexplored
/// root), `PositionedOnLeafCell` (trail's tail is a leaf with a valid cell index), and
/// `Exhausted` (the trail has been fully popped by a step running off either end).
pub struct Cursor<'a> {
    tree: &'a mut BTree,
    root_page: PageNum,
    trail: Vec<TrailEntry>,
}

impl<'a> Cursor<'a> {
    /// Pins the root page and pushes it onto the trail at cell index 0, without descending.
    /// Callers must call `rewind` before `next`/`prev`.
    pub fn new(tree: &'a mut BTree, root_page: PageNum) -> Result<Cursor<'a>, Error> {
        let node = tree.load_node(root_page)?;
        Ok(Cursor { tree, root_page, trail: vec![TrailEntry { node, cell_num: 0 }] })
    }

    /// Releases every pinned node in the trail, leaving the cursor `Exhausted`.
    fn clear_trail(&mut self) {
        while let Some(entry) = self.trail.pop() {
            self.tree.release_node(entry.node);
        }
    }

    /// Positions the cursor at the first (lowest-key) cell in the tree. Fails with `CantMove`
    /// only if the root is an empty leaf, i.e. the tree holds no cells at all.
    pub fn rewind(&mut self) -> Result<(), Error> {
        self.clear_trail();
        let mut page_no = self.root_page;
        loop {
            let node = self.tree.load_node(page_no)?;
            let is_internal = node.node_type.is_internal();
            let child = if is_internal {
                if node.n_cells > 0 {
                    node.get_cell(0)?.child()
                } else {
                    Some(node.right_page)
                }
            } else {
                None
            };
            let empty_leaf = !is_internal && node.n_cells == 0;
            self.trail.push(TrailEntry { node, cell_num: 0 });

            match child {
                Some(next_page) => page_no = next_page,
                None => {
                    if empty_leaf {
                        self.clear_trail();
                        return Err(err!(CantMove, "tree rooted at page {} is empty", self.root_page));
                    }
                    break;
                }
            }
        }
        trace!(root_page = self.root_page, "cursor rewound");
        Ok(())
    }

    /// Descends from the trail's current bottom into the child pointed at by its current cell,
    /// pushing a new trail entry. If `from_end` is set the new node's position starts past its
    /// last cell (i.e. at its right-page child), matching a backward descent.
    fn table_down(&mut self, child_page: PageNum, from_end: bool) -> Result<(), Error> {
        let node = self.tree.load_node(child_page)?;
        let cell_num = if from_end { node.n_cells } else { 0 };
        self.trail.push(TrailEntry { node, cell_num });
        Ok(())
    }

    /// Pops the trail's bottom entry, releasing its node, returning to the parent.
    fn table_up(&mut self) {
        if let Some(entry) = self.trail.pop() {
            self.tree.release_node(entry.node);
        }
    }

    /// Advances the cursor to the next cell in key order. Fails with `CantMove` once the cursor
    /// has advanced past the last cell, leaving it `Exhausted`.
    pub fn next(&mut self) -> Result<(), Error> {
        loop {
            let Some(top) = self.trail.last_mut() else {
                return Err(err!(CantMove, "cursor is exhausted"));
            };

            if !top.node.node_type.is_internal() {
                if top.cell_num + 1 < top.node.n_cells {
                    top.cell_num += 1;
                    return Ok(());
                }
                self.table_up();
                continue;
            }

            // Internal node: after visiting the child for `cell_num`, move to the child for
            // `cell_num + 1` (or the right-page child once past the last cell).
            let n_cells = top.node.n_cells;
            if top.cell_num >= n_cells {
                self.table_up();
                continue;
            }
            top.cell_num += 1;
            let child = if top.cell_num < n_cells {
                top.node.get_cell(top.cell_num)?.child().ok_or_else(|| {
                    err!(CorruptHeader, "internal cell is missing a child pointer")
                })?
            } else {
                top.node.right_page
            };
            self.table_down(child, false)?;
            return self.descend_to_leftmost();
        }
    }

    /// Moves the cursor to the previous cell in key order. Fails with `CantMove` once the
    /// cursor has moved before the first cell, leaving it `Exhausted`.
    pub fn prev(&mut self) -> Result<(), Error> {
        loop {
            let Some(top) = self.trail.last_mut() else {
                return Err(err!(CantMove, "cursor is exhausted"));
            };

            if !top.node.node_type.is_internal() {
                if top.cell_num > 0 {
                    top.cell_num -= 1;
                    return Ok(());
                }
                self.table_up();
                continue;
            }

            if top.cell_num == 0 {
                self.table_up();
                continue;
            }
            top.cell_num -= 1;
            let child = top.node.get_cell(top.cell_num)?.child().ok_or_else(|| {
                err!(CorruptHeader, "internal cell is missing a child pointer")
            })?;
            self.table_down(child, true)?;
            return self.descend_to_rightmost();
        }
    }

    /// After pushing a fresh internal-node trail entry during `next`, walks down its leftmost
    /// path to the next leaf cell.
    fn descend_to_leftmost(&mut self) -> Result<(), Error> {
        loop {
            let top = self.trail.last().expect("just pushed");
            if !top.node.node_type.is_internal() {
                return Ok(());
            }
            let child = if top.node.n_cells > 0 {
                top.node.get_cell(0)?.child().ok_or_else(|| {
                    err!(CorruptHeader, "internal cell is missing a child pointer")
                })?
            } else {
                top.node.right_page
            };
            self.table_down(child, false)?;
        }
    }

    /// After pushing a fresh internal-node trail entry during `prev` (positioned past its last
    /// cell), walks down its rightmost path to the previous leaf cell.
    fn descend_to_rightmost(&mut self) -> Result<(), Error> {
        loop {
            let top = self.trail.last_mut().expect("just pushed");
            if !top.node.node_type.is_internal() {
                if top.node.n_cells > 0 {
                    top.cell_num = top.node.n_cells - 1;
                }
                return Ok(());
            }
            let child = top.node.right_page;
            self.table_down(child, true)?;
        }
    }

    /// The cell the cursor is currently positioned at, if any (`None` while `Uninitialized` or
    /// `Exhausted`).
    pub fn current(&self) -> Result<Option<Cell>, Error> {
        let Some(top) = self.trail.last() else {
            return Ok(None);
        };
        if top.node.node_type.is_internal() {
            return Ok(None);
        }
        if top.cell_num >= top.node.n_cells {
            return Ok(None);
        }
        Ok(Some(top.node.get_cell(top.cell_num)?))
    }
}

impl<'a> Drop for Cursor<'a> {
    fn drop(&mut self) {
        self.clear_trail();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::btree::{BTree, SCHEMA_ROOT};
    use tempfile::NamedTempFile;

    fn tree_with_keys(keys: &[u32]) -> (NamedTempFile, BTree) {
        let file = NamedTempFile::new().unwrap();
        let mut tree = BTree::open(file.path()).unwrap();
        let payload = vec![0xAB; 300];
        for &key in keys {
            tree.insert(SCHEMA_ROOT, Cell::TableLeaf { key, payload: payload.clone() }).unwrap();
        }
        (file, tree)
    }

    #[test]
    fn sweeps_in_ascending_order_then_cant_move() {
        let keys: Vec<u32> = (1..=10).collect();
        let (_file, mut tree) = tree_with_keys(&keys);

        let mut seen = Vec::new();
        let mut cursor = Cursor::new(&mut tree, SCHEMA_ROOT).unwrap();
        cursor.rewind().unwrap();
        loop {
            match cursor.current().unwrap() {
                Some(cell) => seen.push(cell.key()),
                None => break,
            }
            if cursor.next().is_err() {
                break;
            }
        }
        assert_eq!(seen, keys);

        // The cursor is now exhausted: stepping again still fails with `CantMove`.
        assert!(matches!(cursor.next(), Err(Error::CantMove(_))));
    }

    #[test]
    fn the_tenth_next_on_a_ten_row_table_returns_cant_move() {
        let keys: Vec<u32> = (1..=10).map(|i| i * 10).collect();
        let (_file, mut tree) = tree_with_keys(&keys);

        let mut cursor = Cursor::new(&mut tree, SCHEMA_ROOT).unwrap();
        cursor.rewind().unwrap();
        for _ in 0..9 {
            cursor.next().unwrap();
        }
        assert!(matches!(cursor.next(), Err(Error::CantMove(_))));
    }

    #[test]
    fn sweeps_in_descending_order_after_reaching_the_end() {
        let keys: Vec<u32> = (1..=10).collect();
        let (_file, mut tree) = tree_with_keys(&keys);

        let mut cursor = Cursor::new(&mut tree, SCHEMA_ROOT).unwrap();
        cursor.rewind().unwrap();
        let mut forward = Vec::new();
        loop {
            match cursor.current().unwrap() {
                Some(cell) => forward.push(cell.key()),
                None => break,
            }
            if cursor.next().is_err() {
                break;
            }
        }
        assert_eq!(forward, keys);

        let mut backward = Vec::new();
        while cursor.prev().is_ok() {
            if let Some(cell) = cursor.current().unwrap() {
                backward.push(cell.key());
            }
        }
        let mut expected = keys.clone();
        expected.pop();
        expected.reverse();
        assert_eq!(backward, expected);
    }

    #[test]
    fn empty_tree_rewind_fails_with_cant_move() {
        let (_file, mut tree) = tree_with_keys(&[]);
        let mut cursor = Cursor::new(&mut tree, SCHEMA_ROOT).unwrap();
        assert!(matches!(cursor.rewind(), Err(Error::CantMove(_))));
        assert!(cursor.current().unwrap().is_none());
    }

    #[test]
    fn uninitialized_cursor_has_no_current_cell() {
        let (_file, mut tree) = tree_with_keys(&[1, 2, 3]);
        let cursor = Cursor::new(&mut tree, SCHEMA_ROOT).unwrap();
        assert!(cursor.current().unwrap().is_none());
    }
}
