use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use rusqlite::{params, Connection};

use crate::model::{
    join_fullpath, normalize_parent_uid, CreateFolderCommand, Folder, FolderError,
    GetChildrenQuery, GetFolderQuery, GetFoldersQuery, GetParentsQuery, UpdateFolderCommand,
    MAX_NESTED_FOLDER_DEPTH,
};
use crate::repository::sql_store::{validate_create, SqlStore};
use crate::repository::{fill_paths, in_transaction, open_connection_at, FolderStore};

/// Folder store that caches each folder's full path in the `fullpath` column.
///
/// A folder's path is only recomputed when that folder itself is written. Renaming or moving a folder
/// leaves the cached paths of its descendants as they were.
#[derive(Debug, Clone)]
pub struct MaterializedPathStore {
    sql: SqlStore,
    /// database file each bootstrap worker opens its own connection to
    location: PathBuf,
    workers: usize,
}

impl MaterializedPathStore {
    pub fn new(location: PathBuf, workers: usize) -> Self {
        Self {
            sql: SqlStore,
            location,
            workers: workers.max(1),
        }
    }

    /// Computes and stores the full path of every folder that doesn't have one yet.
    ///
    /// Folders are handed out to a pool of worker threads, each with its own connection. Every path is
    /// computed by walking the folder's ancestors in the database, so folders can be processed in any order.
    /// Returns how many paths were written.
    pub fn migrate_missing_paths(&self) -> Result<usize, FolderError> {
        let pending = {
            let con = open_connection_at(&self.location)
                .map_err(FolderError::internal("open connection"))?;
            missing_fullpaths(&con)?
        };
        if pending.is_empty() {
            return Ok(0);
        }
        let workers = self.workers.min(pending.len());
        log::info!(
            "Computing {} missing full path(s) with {workers} worker(s)",
            pending.len()
        );
        let next = AtomicUsize::new(0);
        let results: Vec<Result<usize, FolderError>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| s.spawn(|| self.migrate_worker(&pending, &next)))
                .collect();
            handles
                .into_iter()
                .map(|handle| match handle.join() {
                    Ok(result) => result,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });
        let mut written = 0;
        for result in results {
            written += result?;
        }
        Ok(written)
    }

    fn migrate_worker(
        &self,
        pending: &[(i64, String)],
        next: &AtomicUsize,
    ) -> Result<usize, FolderError> {
        let con =
            open_connection_at(&self.location).map_err(FolderError::internal("open connection"))?;
        let mut written = 0;
        loop {
            let i = next.fetch_add(1, Ordering::Relaxed);
            let Some((org_id, uid)) = pending.get(i) else {
                break;
            };
            let folder = match self.sql.get(&GetFolderQuery::by_uid(uid, *org_id), &con) {
                Ok(folder) => folder,
                // deleted since the batch was listed
                Err(FolderError::NotFound) => continue,
                Err(e) => return Err(e),
            };
            self.write_fullpath(&folder, &con)?;
            written += 1;
        }
        Ok(written)
    }

    /// the folder's full path from the current titles of its ancestors
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

    /// recomputes the folder's full path and stores it
    fn write_fullpath(&self, folder: &Folder, con: &Connection) -> Result<String, FolderError> {
        let fullpath = self.fullpath(folder, con)?;
        con.execute(
            include_str!("../assets/queries/path/update_fullpath.sql"),
            params![folder.org_id, folder.uid, fullpath],
        )
        .map_err(FolderError::internal("write back full path"))?;
        Ok(fullpath)
    }

    /// every folder underneath `uid`, grouped by level from the closest down
    fn descendant_levels(
        &self,
        uid: &str,
        org_id: i64,
        con: &Connection,
    ) -> Result<Vec<Vec<Folder>>, FolderError> {
        let mut levels = Vec::new();
        let mut seen = HashSet::from([uid.to_string()]);
        let mut current = vec![uid.to_string()];
        while !current.is_empty() {
            let mut level = Vec::new();
            for parent in &current {
                let children = self.sql.get_children(
                    &GetChildrenQuery {
                        uid: parent.clone(),
                        org_id,
                        ..Default::default()
                    },
                    con,
                )?;
                for child in children {
                    if seen.insert(child.uid.clone()) {
                        level.push(child);
                    }
                }
            }
            if level.is_empty() {
                break;
            }
            current = level.iter().map(|f| f.uid.clone()).collect();
            levels.push(level);
        }
        Ok(levels)
    }

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
}

impl FolderStore for MaterializedPathStore {
    fn create(&self, cmd: &CreateFolderCommand, con: &Connection) -> Result<Folder, FolderError> {
        validate_create(cmd)?;
        in_transaction(con, |con| {
            let parent_uid = normalize_parent_uid(&cmd.parent_uid);
            if !parent_uid.is_empty() {
                self.sql
                    .get(&GetFolderQuery::by_uid(parent_uid, cmd.org_id), con)?;
                if self.depth(parent_uid, cmd.org_id, con)? + 1 > MAX_NESTED_FOLDER_DEPTH {
                    return Err(FolderError::MaxDepthExceeded {
                        max: MAX_NESTED_FOLDER_DEPTH,
                    });
                }
            }
            let mut folder = self.sql.create(cmd, con)?;
            folder.fullpath = Some(self.write_fullpath(&folder, con)?);
            Ok(folder)
        })
    }

    fn delete(&self, uid: &str, org_id: i64, con: &Connection) -> Result<(), FolderError> {
        if uid.is_empty() {
            return Err(FolderError::BadRequest("missing uid".to_string()));
        }
        in_transaction(con, |con| {
            self.sql.get(&GetFolderQuery::by_uid(uid, org_id), con)?;
            let levels = self.descendant_levels(uid, org_id, con)?;
            // deepest level first so no row is ever left pointing at a deleted parent
            for level in levels.iter().rev() {
                for folder in level {
                    self.sql.delete(&folder.uid, org_id, con)?;
                }
            }
            self.sql.delete(uid, org_id, con)?;
            log::debug!(
                "Deleted folder {uid} in org {org_id} and {} descendant(s)",
                levels.iter().map(Vec::len).sum::<usize>()
            );
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
            let mut folder = self.sql.update(cmd, con)?;
            // only this folder's path is refreshed; descendants keep whatever they had cached
            folder.fullpath = Some(self.write_fullpath(&folder, con)?);
            Ok(folder)
        })
    }

    fn get(&self, query: &GetFolderQuery, con: &Connection) -> Result<Folder, FolderError> {
        let mut folder = self.sql.get(query, con)?;
        if query.with_fullpath {
            // computed fresh and not written back; the stored column keeps what it had
            folder.fullpath = Some(self.fullpath(&folder, con)?);
        }
        Ok(folder)
    }

    /// stored paths are ignored when `with_fullpath` is set, since they can be stale
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
        let folder = match self.sql.get(&GetFolderQuery::by_uid(&query.uid, query.org_id), con) {
            Ok(folder) => folder,
            Err(FolderError::NotFound) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut parents = VecDeque::new();
        let mut seen = HashSet::from([folder.uid.clone()]);
        let mut parent_uid = folder.parent_uid;
        while !parent_uid.is_empty() {
            if !seen.insert(parent_uid.clone()) {
                return Err(FolderError::CircularReference);
            }
            let parent = self
                .sql
                .get(&GetFolderQuery::by_uid(&parent_uid, query.org_id), con)?;
            parent_uid = parent.parent_uid.clone();
            parents.push_front(parent);
        }
        Ok(parents.into())
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
        self.sql.get(&GetFolderQuery::by_uid(uid, org_id), con)?;
        let levels = self.descendant_levels(uid, org_id, con)?;
        if let Some(parent_uid) = parent_uid.map(normalize_parent_uid) {
            if parent_uid == uid
                || levels
                    .iter()
                    .flatten()
                    .any(|folder| folder.uid == parent_uid)
            {
                return Err(FolderError::CircularReference);
            }
        }
        Ok(levels.len())
    }

    /// deepest level first, so every folder comes before its parent
    fn get_descendants(
        &self,
        uid: &str,
        org_id: i64,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError> {
        self.sql.get(&GetFolderQuery::by_uid(uid, org_id), con)?;
        let levels = self.descendant_levels(uid, org_id, con)?;
        Ok(levels.into_iter().rev().flatten().collect())
    }

    fn migrate(&self, _con: &Connection) -> Result<(), FolderError> {
        let written = self.migrate_missing_paths()?;
        log::info!("Full path bootstrap done, {written} path(s) written");
        Ok(())
    }
}

fn missing_fullpaths(con: &Connection) -> Result<Vec<(i64, String)>, FolderError> {
    let mut pst = con
        .prepare(include_str!("../assets/queries/path/get_missing_fullpaths.sql"))
        .map_err(FolderError::internal("prepare missing full path lookup"))?;
    let rows = pst
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(FolderError::internal("list folders without a full path"))?;
    let mut pending = Vec::new();
    for row in rows {
        pending.push(row.map_err(FolderError::internal("read folder without a full path"))?);
    }
    Ok(pending)
}
