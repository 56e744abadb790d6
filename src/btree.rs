//! The B-Tree layer: file open/create, keyed lookup, and key-ordered insertion with top-down,
//! preemptive splitting.
//!
//! A single `BTree` wraps one paged file and can host any number of individual B-Trees within
//! it, each identified by its root page number — this is the "file of B-Trees" the storage
//! engine is named for. `SCHEMA_ROOT` is the root of the one tree every fresh file starts with.

use std::path::Path;

use tracing::{debug, trace};

use crate::cell::Cell;
use crate::error::{err, Error};
use crate::header;
use crate::node::{Node, NodeType};
use crate::pager::{PageNum, Pager};

pub const DEFAULT_PAGE_SIZE: u16 = 1024;
pub const SCHEMA_ROOT: PageNum = 1;

pub struct BTree {
    pager: Pager,
}

impl BTree {
    /// Opens `path`, creating and initializing it (page size `DEFAULT_PAGE_SIZE`, an empty
    /// table-leaf root at page 1) if it does not exist or is empty. Otherwise validates the
    /// on-disk header bit-exactly.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let mut pager = Pager::open(path)?;

        if pager.is_new()? {
            pager.set_page_size(DEFAULT_PAGE_SIZE)?;
            let page_no = pager.allocate_page()?;
            let mut page = pager.read_page(page_no)?;
            header::init(&mut page.data, DEFAULT_PAGE_SIZE)?;
            let node = Node::init_empty(page, NodeType::TableLeaf);
            pager.write_page(node.page())?;
            pager.release_page(node.into_page());
            debug!(page_size = DEFAULT_PAGE_SIZE, "initialized new database file");
        } else {
            let header_bytes = pager.read_header()?;
            let page_size = header::validate(&header_bytes)?;
            pager.set_page_size(page_size)?;
            debug!(page_size, "opened existing database file");
        }

        Ok(BTree { pager })
    }

    pub fn close(self) -> Result<(), Error> {
        self.pager.close()
    }

    pub(crate) fn pager_mut(&mut self) -> &mut Pager {
        &mut self.pager
    }

    fn create_node(&mut self, node_type: NodeType) -> Result<Node, Error> {
        let page_no = self.pager.allocate_page()?;
        let mut page = self.pager.read_page(page_no)?;
        if page_no == 1 {
            let page_size = self.pager.page_size()? as u16;
            header::init(&mut page.data, page_size)?;
        }
        Ok(Node::init_empty(page, node_type))
    }

    pub(crate) fn load_node(&mut self, page_no: PageNum) -> Result<Node, Error> {
        let page = self.pager.read_page(page_no)?;
        Node::from_page(page)
    }

    fn write_node(&mut self, node: &Node) -> Result<(), Error> {
        self.pager.write_page(node.page())
    }

    pub(crate) fn release_node(&mut self, node: Node) {
        self.pager.release_page(node.into_page());
    }

    /// Looks up `key` in the table B-Tree rooted at `root_page`, returning its leaf payload.
    pub fn find(&mut self, root_page: PageNum, key: u32) -> Result<Vec<u8>, Error> {
        let mut page_no = root_page;
        loop {
            let node = self.load_node(page_no)?;

            let mut found: Option<Vec<u8>> = None;
            let mut child: Option<PageNum> = None;
            let mut miss_on_leaf = false;

            for i in 0..node.n_cells {
                let cell = node.get_cell(i)?;
                let ck = cell.key();
                if ck == key && !node.node_type.is_internal() {
                    if let Cell::TableLeaf { payload, .. } = cell {
                        found = Some(payload);
                    }
                    break;
                }
                if key <= ck {
                    if node.node_type.is_internal() {
                        child = cell.child();
                    } else {
                        miss_on_leaf = true;
                    }
                    break;
                }
            }

            let is_internal = node.node_type.is_internal();
            let right_page = node.right_page;
            self.release_node(node);

            if let Some(payload) = found {
                return Ok(payload);
            }
            if miss_on_leaf {
                return Err(err!(NotFound, "key {} not found", key));
            }
            if let Some(next) = child {
                page_no = next;
                continue;
            }
            if is_internal {
                page_no = right_page;
                continue;
            }
            return Err(err!(NotFound, "key {} not found", key));
        }
    }

    /// Inserts `cell` into the B-Tree rooted at `root_page`, using a top-down preemptive split
    /// so no ascending rebalancing is needed. Fails with `Duplicate` if the key is already
    /// present.
    pub fn insert(&mut self, root_page: PageNum, cell: Cell) -> Result<(), Error> {
        let root = self.load_node(root_page)?;
        let root_type = root.node_type;
        let fits = root.can_hold(cell.encoded_len());
        self.release_node(root);

        if !fits {
            self.handle_root_overflow(root_page, root_type)?;
        }

        self.insert_non_full(root_page, cell)
    }

    /// Handles a full root by moving its contents to a fresh sibling, re-initializing the root
    /// page in place as an internal node pointing only at that sibling, and splitting the
    /// sibling against the now-empty root. This is the only place the root's node type changes;
    /// its page number never does.
    fn handle_root_overflow(&mut self, root_page: PageNum, root_type: NodeType) -> Result<(), Error> {
        trace!(root_page, "root overflow, promoting to internal node");
        let mut root = self.load_node(root_page)?;

        let mut sibling = self.create_node(root_type)?;
        for i in 0..root.n_cells {
            let c = root.get_cell(i)?;
            let next = sibling.n_cells;
            sibling.insert_cell(next, &c)?;
        }
        sibling.set_right_page(root.right_page);
        let sibling_page = sibling.page_no();
        self.write_node(&sibling)?;
        self.release_node(sibling);

        let new_root_type = if root_type.is_table() { NodeType::TableInternal } else { NodeType::IndexInternal };
        root.reinit(new_root_type);
        root.set_right_page(sibling_page);
        self.write_node(&root)?;
        self.release_node(root);

        // R' holds exactly what the old root held, so it overflows this incoming cell's
        // capacity iff the old root itself did; it is therefore always splittable here.
        self.split(root_page, sibling_page, 0)?;
        Ok(())
    }

    /// Descends from `start_page` inserting `cell`, splitting any full child it must pass
    /// through on the way down. Implemented as an explicit loop (rather than recursion) so no
    /// page stays pinned across a recursive call.
    fn insert_non_full(&mut self, start_page: PageNum, cell: Cell) -> Result<(), Error> {
        let mut page_no = start_page;
        loop {
            let mut node = self.load_node(page_no)?;

            let order_key = cell.order_key();

            if !node.node_type.is_internal() {
                let mut insert_at = node.n_cells;
                let mut duplicate = false;
                for i in 0..node.n_cells {
                    let existing_key = node.get_cell(i)?.order_key();
                    if existing_key == order_key {
                        duplicate = true;
                        break;
                    }
                    if order_key < existing_key {
                        insert_at = i;
                        break;
                    }
                }
                if duplicate {
                    self.release_node(node);
                    return Err(err!(Duplicate, "key {:?} already present", order_key));
                }
                node.insert_cell(insert_at, &cell)?;
                self.write_node(&node)?;
                self.release_node(node);
                return Ok(());
            }

            let mut target_i = node.n_cells;
            let mut duplicate = false;
            for i in 0..node.n_cells {
                let existing = node.get_cell(i)?;
                if existing.order_key() == order_key {
                    duplicate = true;
                    break;
                }
                if existing.order_key() > order_key {
                    target_i = i;
                    break;
                }
            }
            if duplicate {
                self.release_node(node);
                return Err(err!(Duplicate, "key {:?} already present", order_key));
            }

            let target_page = if target_i < node.n_cells {
                node.get_cell(target_i)?
                    .child()
                    .ok_or_else(|| err!(CorruptHeader, "internal cell is missing a child pointer"))?
            } else {
                node.right_page
            };
            self.release_node(node);

            let target = self.load_node(target_page)?;
            let fits = target.can_hold(cell.encoded_len());
            self.release_node(target);

            if !fits {
                self.split(page_no, target_page, target_i)?;
                // The child set under `page_no` has grown; restart from the same parent.
                continue;
            }
            page_no = target_page;
        }
    }

    /// Splits `child` into a new left sibling and a trimmed `child`, inserting the promoted
    /// median cell into `parent` at `parent_ncell`. Returns the new sibling's page number.
    fn split(&mut self, parent_page: PageNum, child_page: PageNum, parent_ncell: u16) -> Result<PageNum, Error> {
        let mut parent = self.load_node(parent_page)?;
        let mut child = self.load_node(child_page)?;
        let child_type = child.node_type;

        trace!(parent_page, child_page, n_cells = child.n_cells, "splitting node");

        let median_idx = child.n_cells / 2;

        let mut left = self.create_node(child_type)?;
        for i in 0..median_idx {
            let c = child.get_cell(i)?;
            let next = left.n_cells;
            left.insert_cell(next, &c)?;
        }

        let median = child.get_cell(median_idx)?;

        if child_type == NodeType::TableLeaf {
            let next = left.n_cells;
            left.insert_cell(next, &median)?;
        }
        if let Some(median_child) = median.child() {
            left.set_right_page(median_child);
        }

        // Collect the upper half in memory before touching `child`'s page: no scratch page is
        // allocated or erased to hold it.
        let mut upper_half = Vec::new();
        for i in (median_idx + 1)..child.n_cells {
            upper_half.push(child.get_cell(i)?);
        }
        let preserved_right_page = child.right_page;
        child.reinit(child_type);
        for c in &upper_half {
            let next = child.n_cells;
            child.insert_cell(next, c)?;
        }
        if child_type.is_internal() {
            child.set_right_page(preserved_right_page);
        }

        let left_page = left.page_no();

        let promoted = match (child_type, &median) {
            (NodeType::TableLeaf, _) | (NodeType::TableInternal, _) => {
                Cell::TableInternal { child: left_page, key: median.key() }
            }
            (NodeType::IndexLeaf, Cell::IndexLeaf { idx_key, pk }) => {
                Cell::IndexInternal { child: left_page, idx_key: *idx_key, pk: *pk }
            }
            (NodeType::IndexInternal, Cell::IndexInternal { idx_key, pk, .. }) => {
                Cell::IndexInternal { child: left_page, idx_key: *idx_key, pk: *pk }
            }
            _ => return Err(err!(CorruptHeader, "median cell variant does not match its node type")),
        };

        parent.insert_cell(parent_ncell, &promoted)?;

        self.write_node(&parent)?;
        self.write_node(&child)?;
        self.write_node(&left)?;
        self.release_node(parent);
        self.release_node(child);
        self.release_node(left);

        Ok(left_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_fresh() -> (NamedTempFile, BTree) {
        let file = NamedTempFile::new().unwrap();
        let tree = BTree::open(file.path()).unwrap();
        (file, tree)
    }

    fn create_index_root(tree: &mut BTree) -> PageNum {
        let node = tree.create_node(NodeType::IndexLeaf).unwrap();
        let page_no = node.page_no();
        tree.write_node(&node).unwrap();
        tree.release_node(node);
        page_no
    }

    #[test]
    fn empty_create_and_reopen() {
        let file = NamedTempFile::new().unwrap();
        let tree = BTree::open(file.path()).unwrap();
        tree.close().unwrap();
        let tree = BTree::open(file.path()).unwrap();
        tree.close().unwrap();
    }

    #[test]
    fn single_insert_and_find() {
        let (_file, mut tree) = open_fresh();
        tree.insert(
            SCHEMA_ROOT,
            Cell::TableLeaf { key: 42, payload: vec![0xDE, 0xAD, 0xBE, 0xEF] },
        )
        .unwrap();
        assert_eq!(tree.find(SCHEMA_ROOT, 42).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(matches!(tree.find(SCHEMA_ROOT, 41), Err(Error::NotFound(_))));
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let (_file, mut tree) = open_fresh();
        tree.insert(SCHEMA_ROOT, Cell::TableLeaf { key: 42, payload: vec![1] }).unwrap();
        let err = tree.insert(SCHEMA_ROOT, Cell::TableLeaf { key: 42, payload: vec![0] });
        assert!(matches!(err, Err(Error::Duplicate(_))));
    }

    #[test]
    fn root_split_preserves_root_page_and_order() {
        let (_file, mut tree) = open_fresh();
        let payload = vec![0xAB; 400];
        for key in [1u32, 2, 3] {
            tree.insert(SCHEMA_ROOT, Cell::TableLeaf { key, payload: payload.clone() }).unwrap();
        }

        let root = tree.load_node(SCHEMA_ROOT).unwrap();
        assert_eq!(root.node_type, NodeType::TableInternal);
        assert_eq!(root.n_cells, 1);
        let right_page = root.right_page;
        let left_cell = root.get_cell(0).unwrap();
        let left_page = left_cell.child().unwrap();
        tree.release_node(root);

        let mut keys = Vec::new();
        let left = tree.load_node(left_page).unwrap();
        for i in 0..left.n_cells {
            keys.push(left.get_cell(i).unwrap().key());
        }
        tree.release_node(left);
        let right = tree.load_node(right_page).unwrap();
        for i in 0..right.n_cells {
            keys.push(right.get_cell(i).unwrap().key());
        }
        tree.release_node(right);

        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn corrupt_header_is_rejected_on_reopen() {
        let file = NamedTempFile::new().unwrap();
        BTree::open(file.path()).unwrap().close().unwrap();

        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new().write(true).open(file.path()).unwrap();
            f.seek(SeekFrom::Start(0)).unwrap();
            f.write_all(&[0x00]).unwrap();
        }

        assert!(matches!(BTree::open(file.path()), Err(Error::CorruptHeader(_))));
    }

    #[test]
    fn index_tree_allows_non_unique_idx_key_with_distinct_pk() {
        let (_file, mut tree) = open_fresh();
        let idx_root = create_index_root(&mut tree);

        tree.insert(idx_root, Cell::IndexLeaf { idx_key: 7, pk: 1 }).unwrap();
        tree.insert(idx_root, Cell::IndexLeaf { idx_key: 7, pk: 2 }).unwrap();
        let err = tree.insert(idx_root, Cell::IndexLeaf { idx_key: 7, pk: 1 });
        assert!(matches!(err, Err(Error::Duplicate(_))));

        let node = tree.load_node(idx_root).unwrap();
        assert_eq!(node.n_cells, 2);
        let mut pks: Vec<u32> = (0..node.n_cells).map(|i| match node.get_cell(i).unwrap() {
            Cell::IndexLeaf { pk, .. } => pk,
            other => panic!("expected IndexLeaf, got {:?}", other),
        }).collect();
        tree.release_node(node);
        pks.sort_unstable();
        assert_eq!(pks, vec![1, 2]);
    }

    #[test]
    fn index_tree_splits_on_overflow() {
        let (_file, mut tree) = open_fresh();
        let idx_root = create_index_root(&mut tree);

        for i in 0..100u32 {
            tree.insert(idx_root, Cell::IndexLeaf { idx_key: i, pk: i }).unwrap();
        }

        let root = tree.load_node(idx_root).unwrap();
        assert_eq!(root.node_type, NodeType::IndexInternal);
        assert!(root.n_cells >= 1);
        tree.release_node(root);
    }
}
