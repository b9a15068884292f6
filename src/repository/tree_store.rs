//! Nested set (modified preorder tree traversal) folder store.
//!
//! Every folder carries a `lft`/`rgt` interval that strictly contains the intervals of all of its
//! descendants, so ancestor, descendant and height lookups are single range queries instead of
//! recursive walks of `parent_uid`.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::model::{
    join_fullpath, normalize_parent_uid, CreateFolderCommand, Folder, FolderError,
    GetChildrenQuery, GetFolderQuery, GetFoldersQuery, GetParentsQuery, UpdateFolderCommand,
    MAX_NESTED_FOLDER_DEPTH,
};
use crate::repository::sql_store::{map_folder, validate_create, SqlStore};
use crate::repository::{fill_paths, get_org_ids, in_transaction, FolderStore};

/// a new leaf takes up 2 slots: its own lft and rgt
const LEAF_WIDTH: i64 = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct TreeStore {
    sql: SqlStore,
}

/// a folder row as seen by [`TreeStore::migrate_org`]
struct AdjacencyRow {
    id: i64,
    uid: String,
    parent_uid: String,
    lft: i64,
    rgt: i64,
}

/// one level of the explicit traversal stack. `node` is `None` for the implicit root
struct Frame {
    node: Option<usize>,
    next_child: usize,
}

impl TreeStore {
    pub fn new() -> Self {
        Self { sql: SqlStore }
    }

    /// Recomputes the interval of every folder in the org from `parent_uid`.
    ///
    /// Children are numbered in title order so running this twice over the same tree changes nothing.
    /// Only rows whose interval changed are written. Returns the last number handed out, which is
    /// `2 * number of folders`. Fails with [`FolderError::CircularReference`] and writes nothing when some
    /// folders can't be reached from the top level because their parents form a cycle.
    pub fn migrate_org(&self, org_id: i64, con: &Connection) -> Result<i64, FolderError> {
        in_transaction(con, |con| {
            let rows = load_adjacency(org_id, con)?;
            let children = children_by_parent(&rows);
            let root_children = children.get("").map(Vec::as_slice).unwrap_or(&[]);

            let mut counter: i64 = 0;
            let mut intervals = vec![(0_i64, 0_i64); rows.len()];
            let mut visited = vec![false; rows.len()];
            let mut stack = vec![Frame {
                node: None,
                next_child: 0,
            }];
            while let Some(frame) = stack.last_mut() {
                let siblings = match frame.node {
                    None => root_children,
                    Some(i) => children
                        .get(rows[i].uid.as_str())
                        .map(Vec::as_slice)
                        .unwrap_or(&[]),
                };
                if frame.next_child < siblings.len() {
                    let child = siblings[frame.next_child];
                    frame.next_child += 1;
                    if visited[child] {
                        continue;
                    }
                    visited[child] = true;
                    counter += 1;
                    intervals[child].0 = counter;
                    stack.push(Frame {
                        node: Some(child),
                        next_child: 0,
                    });
                } else {
                    if let Some(i) = frame.node {
                        counter += 1;
                        intervals[i].1 = counter;
                    }
                    stack.pop();
                }
            }

            let unreachable = visited.iter().filter(|v| !**v).count();
            if unreachable > 0 {
                // their old intervals would overlap the new numbering, so nothing is written
                log::error!(
                    "{unreachable} folder(s) in org {org_id} are part of a parent_uid cycle, aborting renumbering"
                );
                return Err(FolderError::CircularReference);
            }

            let mut pst = con
                .prepare(include_str!("../assets/queries/tree/update_interval.sql"))
                .map_err(FolderError::internal("prepare interval write-back"))?;
            let mut written = 0;
            for (i, row) in rows.iter().enumerate() {
                let (lft, rgt) = intervals[i];
                if row.lft != lft || row.rgt != rgt {
                    pst.execute(params![row.id, lft, rgt])
                        .map_err(FolderError::internal("write back migrated interval"))?;
                    written += 1;
                }
            }
            log::debug!(
                "Renumbered org {org_id}: {} folders, {written} intervals changed",
                rows.len()
            );
            Ok(counter)
        })
    }

    /// distance from the general folder; top level folders are at depth 1
    fn depth(&self, uid: &str, org_id: i64, con: &Connection) -> Result<usize, FolderError> {
        let parents = self.get_parents(
            &GetParentsQuery {
                uid: uid.to_string(),
                org_id,
            },
            con,
        )?;
        Ok(parents.len() + 1)
    }

    fn fullpath(&self, folder: &Folder, con: &Connection) -> Result<String, FolderError> {
        let parents = self.get_parents(
            &GetParentsQuery {
                uid: folder.uid.clone(),
                org_id: folder.org_id,
            },
            con,
        )?;
        Ok(join_fullpath(
            parents
                .iter()
                .map(|p| p.title.as_str())
                .chain(std::iter::once(folder.title.as_str())),
        ))
    }

    /// makes sure `folder` can be placed underneath `new_parent_uid` without creating a cycle
    /// or pushing any of its descendants past the maximum depth
    fn validate_move(
        &self,
        folder: &Folder,
        new_parent_uid: &str,
        con: &Connection,
    ) -> Result<(), FolderError> {
        let new_parent_uid = normalize_parent_uid(new_parent_uid);
        if new_parent_uid == folder.uid {
            return Err(FolderError::CannotBeParentOfItself);
        }
        let parent_depth = if new_parent_uid.is_empty() {
            0
        } else {
            // fails with not found if the new parent doesn't exist
            self.sql
                .get(&GetFolderQuery::by_uid(new_parent_uid, folder.org_id), con)?;
            self.depth(new_parent_uid, folder.org_id, con)?
        };
        let height = self.get_height(&folder.uid, folder.org_id, Some(new_parent_uid), con)?;
        if parent_depth + 1 + height > MAX_NESTED_FOLDER_DEPTH {
            return Err(FolderError::MaxDepthExceeded {
                max: MAX_NESTED_FOLDER_DEPTH,
            });
        }
        Ok(())
    }
}

impl FolderStore for TreeStore {
    fn create(&self, cmd: &CreateFolderCommand, con: &Connection) -> Result<Folder, FolderError> {
        validate_create(cmd)?;
        in_transaction(con, |con| {
            let parent_uid = normalize_parent_uid(&cmd.parent_uid);
            let (lft, rgt) = if parent_uid.is_empty() {
                let max_rgt: i64 = con
                    .query_row(
                        include_str!("../assets/queries/tree/get_max_rgt.sql"),
                        params![cmd.org_id],
                        |row| row.get(0),
                    )
                    .map_err(FolderError::internal("read max rgt"))?;
                (max_rgt + 1, max_rgt + 2)
            } else {
                let parent = self
                    .sql
                    .get(&GetFolderQuery::by_uid(parent_uid, cmd.org_id), con)?;
                if self.depth(parent_uid, cmd.org_id, con)? + 1 > MAX_NESTED_FOLDER_DEPTH {
                    return Err(FolderError::MaxDepthExceeded {
                        max: MAX_NESTED_FOLDER_DEPTH,
                    });
                }
                // open a gap right before the parent's closing bound
                let p = parent.rgt;
                con.execute(
                    include_str!("../assets/queries/tree/open_gap_rgt.sql"),
                    params![cmd.org_id, p, LEAF_WIDTH],
                )
                .map_err(FolderError::internal("shift rgt bounds"))?;
                con.execute(
                    include_str!("../assets/queries/tree/open_gap_lft.sql"),
                    params![cmd.org_id, p, LEAF_WIDTH],
                )
                .map_err(FolderError::internal("shift lft bounds"))?;
                (p, p + 1)
            };
            self.sql.insert(cmd, lft, rgt, con)?;
            let mut folder = self
                .sql
                .get(&GetFolderQuery::by_uid(&cmd.uid, cmd.org_id), con)?;
            folder.fullpath = Some(self.fullpath(&folder, con)?);
            log::debug!(
                "Created folder {} in org {} at [{lft}, {rgt}]",
                folder.uid,
                folder.org_id
            );
            Ok(folder)
        })
    }

    fn delete(&self, uid: &str, org_id: i64, con: &Connection) -> Result<(), FolderError> {
        if uid.is_empty() {
            return Err(FolderError::BadRequest("missing uid".to_string()));
        }
        in_transaction(con, |con| {
            let folder = self.sql.get(&GetFolderQuery::by_uid(uid, org_id), con)?;
            let width = folder.rgt - folder.lft + 1;
            let deleted = con
                .execute(
                    include_str!("../assets/queries/tree/delete_subtree.sql"),
                    params![org_id, folder.lft, folder.rgt],
                )
                .map_err(FolderError::internal("delete subtree"))?;
            con.execute(
                include_str!("../assets/queries/tree/close_gap_rgt.sql"),
                params![org_id, folder.rgt, width],
            )
            .map_err(FolderError::internal("close gap in rgt bounds"))?;
            con.execute(
                include_str!("../assets/queries/tree/close_gap_lft.sql"),
                params![org_id, folder.rgt, width],
            )
            .map_err(FolderError::internal("close gap in lft bounds"))?;
            log::debug!("Deleted folder {uid} in org {org_id}, {deleted} row(s) removed");
            Ok(())
        })
    }

    fn update(&self, cmd: &UpdateFolderCommand, con: &Connection) -> Result<Folder, FolderError> {
        if cmd.uid.is_empty() {
            return Err(FolderError::BadRequest("missing uid".to_string()));
        }
        in_transaction(con, |con| {
            if let Some(new_parent_uid) = &cmd.new_parent_uid {
                let folder = self
                    .sql
                    .get(&GetFolderQuery::by_uid(&cmd.uid, cmd.org_id), con)?;
                self.validate_move(&folder, new_parent_uid, con)?;
            }
            let updated = self.sql.update(cmd, con)?;
            if !cmd.is_move() {
                return Ok(updated);
            }
            // renumbering the whole org also repairs any interval drift
            self.migrate_org(cmd.org_id, con)?;
            self.sql
                .get(&GetFolderQuery::by_uid(&updated.uid, cmd.org_id), con)
        })
    }

    fn get(&self, query: &GetFolderQuery, con: &Connection) -> Result<Folder, FolderError> {
        let mut folder = self.sql.get(query, con)?;
        if query.with_fullpath {
            folder.fullpath = Some(self.fullpath(&folder, con)?);
        }
        Ok(folder)
    }

    fn get_folders(
        &self,
        query: &GetFoldersQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError> {
        let mut folders = self.sql.get_folders(query, con)?;
        if query.with_fullpath || query.with_fullpath_uids {
            for folder in &mut folders {
                let parents = self.get_parents(
                    &GetParentsQuery {
                        uid: folder.uid.clone(),
                        org_id: folder.org_id,
                    },
                    con,
                )?;
                fill_paths(folder, &parents, query);
            }
        }
        Ok(folders)
    }

    fn get_parents(
        &self,
        query: &GetParentsQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError> {
        let mut pst = con
            .prepare(include_str!("../assets/queries/tree/get_parents.sql"))
            .map_err(FolderError::internal("prepare parent lookup"))?;
        let rows = pst
            .query_map(params![query.org_id, query.uid], map_folder)
            .map_err(FolderError::internal("get parents"))?;
        let mut parents = Vec::new();
        for parent in rows {
            parents.push(parent.map_err(FolderError::internal("read parent"))?);
        }
        Ok(parents)
    }

    fn get_children(
        &self,
        query: &GetChildrenQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError> {
        self.sql.get_children(query, con)
    }

    fn get_height(
        &self,
        uid: &str,
        org_id: i64,
        parent_uid: Option<&str>,
        con: &Connection,
    ) -> Result<usize, FolderError> {
        let folder = self.sql.get(&GetFolderQuery::by_uid(uid, org_id), con)?;
        if let Some(parent_uid) = parent_uid.map(normalize_parent_uid) {
            if !parent_uid.is_empty() {
                let inside: i64 = con
                    .query_row(
                        include_str!("../assets/queries/tree/count_in_subtree.sql"),
                        params![org_id, parent_uid, folder.lft, folder.rgt],
                        |row| row.get(0),
                    )
                    .map_err(FolderError::internal("check subtree membership"))?;
                if inside > 0 {
                    return Err(FolderError::CircularReference);
                }
            }
        }
        let height: i64 = con
            .query_row(
                include_str!("../assets/queries/tree/get_subtree_height.sql"),
                params![org_id, folder.lft, folder.rgt],
                |row| row.get(0),
            )
            .map_err(FolderError::internal("compute subtree height"))?;
        Ok(height as usize)
    }

    fn get_descendants(
        &self,
        uid: &str,
        org_id: i64,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError> {
        let folder = self.sql.get(&GetFolderQuery::by_uid(uid, org_id), con)?;
        let mut pst = con
            .prepare(include_str!("../assets/queries/tree/get_descendants.sql"))
            .map_err(FolderError::internal("prepare descendant lookup"))?;
        let rows = pst
            .query_map(params![org_id, folder.lft, folder.rgt], map_folder)
            .map_err(FolderError::internal("get descendants"))?;
        let mut folders = Vec::new();
        for folder in rows {
            folders.push(folder.map_err(FolderError::internal("read descendant"))?);
        }
        Ok(folders)
    }

    fn migrate(&self, con: &Connection) -> Result<(), FolderError> {
        let org_ids = get_org_ids(con).map_err(FolderError::internal("list orgs"))?;
        for org_id in org_ids {
            let counter = self.migrate_org(org_id, con)?;
            log::info!("Nested set for org {org_id} rebuilt, {counter} bounds assigned");
        }
        Ok(())
    }
}

fn load_adjacency(org_id: i64, con: &Connection) -> Result<Vec<AdjacencyRow>, FolderError> {
    let mut pst = con
        .prepare(include_str!("../assets/queries/tree/get_adjacency.sql"))
        .map_err(FolderError::internal("prepare adjacency lookup"))?;
    let rows = pst
        .query_map(params![org_id], |row| {
            Ok(AdjacencyRow {
                id: row.get(0)?,
                uid: row.get(1)?,
                parent_uid: row.get(2)?,
                lft: row.get(3)?,
                rgt: row.get(4)?,
            })
        })
        .map_err(FolderError::internal("load adjacency list"))?;
    let mut adjacency = Vec::new();
    for row in rows {
        adjacency.push(row.map_err(FolderError::internal("read adjacency row"))?);
    }
    Ok(adjacency)
}

/// groups row positions by their parent's uid, keeping the title order the rows were loaded in.
/// Rows whose parent is missing from the org are treated as top level folders
fn children_by_parent(rows: &[AdjacencyRow]) -> HashMap<&str, Vec<usize>> {
    let known: HashMap<&str, usize> = rows
        .iter()
        .enumerate()
        .map(|(i, row)| (row.uid.as_str(), i))
        .collect();
    let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, row) in rows.iter().enumerate() {
        let parent = normalize_parent_uid(&row.parent_uid);
        let parent = if parent.is_empty() || known.contains_key(parent) {
            parent
        } else {
            log::warn!(
                "Folder {} references missing parent {parent}, numbering it as a top level folder",
                row.uid
            );
            ""
        };
        children.entry(parent).or_default().push(i);
    }
    children
}
