//! In-memory index over a snapshot of folders.
//!
//! The snapshot is usually every folder a caller is allowed to see, which means some folders can
//! reference a parent that isn't in the snapshot. Those parents get a placeholder node so the tree
//! stays fully linked, but they are never reported as visible.

use std::collections::{HashMap, VecDeque};

use crate::model::{is_root_uid, Folder, GENERAL_FOLDER_UID};


/// position of the implicit general folder in [`FolderTree::nodes`]
pub const ROOT: usize = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// the folder was part of the snapshot
    Accessible,
    /// the folder is only known because something in the snapshot names it as its parent
    Placeholder,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderNode {
    /// 0 for placeholders, which never had an id supplied
    pub id: i64,
    pub uid: String,
    /// empty for placeholders
    pub title: String,
    /// `None` only for the root
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub visibility: Visibility,
}

impl FolderNode {
    pub fn is_accessible(&self) -> bool {
        self.visibility == Visibility::Accessible
    }
}

#[derive(Debug, Clone)]
pub struct FolderTree {
    nodes: Vec<FolderNode>,
    index: HashMap<String, usize>,
    id_index: HashMap<i64, usize>,
}

impl FolderTree {
    /// builds the tree from a flat list of folders. Parents may come before or after their children
    pub fn new(folders: &[Folder]) -> Self {
        let mut tree = Self {
            nodes: vec![FolderNode {
                id: 0,
                uid: GENERAL_FOLDER_UID.to_string(),
                title: String::new(),
                parent: None,
                children: Vec::new(),
                visibility: Visibility::Accessible,
            }],
            index: HashMap::from([
                (GENERAL_FOLDER_UID.to_string(), ROOT),
                (String::new(), ROOT),
            ]),
            id_index: HashMap::new(),
        };
        for folder in folders {
            tree.insert(
                folder.id,
                &folder.uid,
                &folder.title,
                &folder.parent_uid,
                Visibility::Accessible,
            );
        }
        for i in 0..tree.nodes.len() {
            if let Some(parent) = tree.nodes[i].parent {
                tree.nodes[parent].children.push(i);
            }
        }
        tree
    }

    fn insert(
        &mut self,
        id: i64,
        uid: &str,
        title: &str,
        parent_uid: &str,
        visibility: Visibility,
    ) -> usize {
        if is_root_uid(uid) {
            return ROOT;
        }
        let parent = if is_root_uid(parent_uid) || parent_uid == uid {
            ROOT
        } else {
            match self.index.get(parent_uid) {
                Some(&parent) => parent,
                None => self.insert(0, parent_uid, "", "", Visibility::Placeholder),
            }
        };

        if let Some(&existing) = self.index.get(uid) {
            // a placeholder (or an earlier copy) gets filled in with the real data
            if visibility == Visibility::Accessible {
                let node = &mut self.nodes[existing];
                node.id = id;
                node.title = title.to_string();
                node.parent = Some(parent);
                node.visibility = Visibility::Accessible;
                if id != 0 {
                    self.id_index.insert(id, existing);
                }
            }
            return existing;
        }

        let position = self.nodes.len();
        self.nodes.push(FolderNode {
            id,
            uid: uid.to_string(),
            title: title.to_string(),
            parent: Some(parent),
            children: Vec::new(),
            visibility,
        });
        self.index.insert(uid.to_string(), position);
        if id != 0 {
            self.id_index.insert(id, position);
        }
        position
    }

    /// every node, with the root at position [`ROOT`]
    pub fn nodes(&self) -> &[FolderNode] {
        &self.nodes
    }

    pub fn get(&self, uid: &str) -> Option<&FolderNode> {
        self.index.get(uid).map(|&i| &self.nodes[i])
    }

    pub fn get_by_id(&self, id: i64) -> Option<&FolderNode> {
        self.id_index.get(&id).map(|&i| &self.nodes[i])
    }

    /// the folder is in the tree and isn't a placeholder
    pub fn contains(&self, uid: &str) -> bool {
        self.get(uid).is_some_and(FolderNode::is_accessible)
    }

    /// empty for placeholders and unknown folders
    pub fn get_title(&self, uid: &str) -> &str {
        match self.get(uid) {
            Some(node) if node.is_accessible() => &node.title,
            _ => "",
        }
    }

    /// Walks up from the immediate parent of `uid`, stopping before the first placeholder.
    ///
    /// A chain that is visible all the way up ends with the general folder at [`ROOT`], whose title is
    /// empty. Callers building breadcrumbs should skip it, for example with
    /// `.take_while(|node| node.parent.is_some())`.
    pub fn ancestors(&self, uid: &str) -> Ancestors<'_> {
        let next = self.index.get(uid).and_then(|&i| self.nodes[i].parent);
        Ancestors {
            tree: self,
            next,
            remaining: self.nodes.len(),
        }
    }

    /// every node below `uid`, breadth first
    pub fn children(&self, uid: &str) -> Descendants<'_> {
        let queue = self
            .index
            .get(uid)
            .map(|&i| self.nodes[i].children.iter().copied().collect())
            .unwrap_or_default();
        Descendants {
            tree: self,
            queue,
            remaining: self.nodes.len(),
        }
    }
}

pub struct Ancestors<'a> {
    tree: &'a FolderTree,
    next: Option<usize>,
    /// no walk can visit more nodes than the tree holds, even over a cyclic snapshot
    remaining: usize,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a FolderNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.tree.nodes[self.next?];
        if !node.is_accessible() || self.remaining == 0 {
            self.next = None;
            return None;
        }
        self.remaining -= 1;
        self.next = node.parent;
        Some(node)
    }
}

pub struct Descendants<'a> {
    tree: &'a FolderTree,
    queue: VecDeque<usize>,
    remaining: usize,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a FolderNode;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let node = &self.tree.nodes[self.queue.pop_front()?];
        self.queue.extend(node.children.iter().copied());
        Some(node)
    }
}
