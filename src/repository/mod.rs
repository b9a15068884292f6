use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Transaction, TransactionBehavior};
use serde::Deserialize;

use crate::model::{
    join_fullpath, join_fullpath_uids, CreateFolderCommand, Folder, FolderError, GetChildrenQuery,
    GetFolderQuery, GetFoldersQuery, GetParentsQuery, UpdateFolderCommand,
};

pub mod path_store;
pub mod sql_store;
pub mod tree_store;

#[cfg(test)]
mod tests;

pub use path_store::MaterializedPathStore;
pub use sql_store::SqlStore;
pub use tree_store::TreeStore;

/// how long a connection waits on another writer's lock before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// The operations every folder backend supports.
///
/// Every method runs against the passed connection. Mutations open their own transaction when the
/// connection is idle, and join the caller's transaction (through a savepoint) otherwise, so a
/// failure never leaves half of a mutation behind.
pub trait FolderStore: Send + Sync {
    fn create(&self, cmd: &CreateFolderCommand, con: &Connection) -> Result<Folder, FolderError>;

    /// deletes the folder and every folder underneath it
    fn delete(&self, uid: &str, org_id: i64, con: &Connection) -> Result<(), FolderError>;

    fn update(&self, cmd: &UpdateFolderCommand, con: &Connection) -> Result<Folder, FolderError>;

    fn get(&self, query: &GetFolderQuery, con: &Connection) -> Result<Folder, FolderError>;

    /// every requested folder that exists, ordered by title. Unknown uids are skipped
    fn get_folders(
        &self,
        query: &GetFoldersQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError>;

    /// ancestors of the folder, ordered from the top level folder down to the immediate parent
    fn get_parents(
        &self,
        query: &GetParentsQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError>;

    fn get_children(
        &self,
        query: &GetChildrenQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError>;

    /// number of levels below `uid`. When `parent_uid` is passed, fails with
    /// [`FolderError::CircularReference`] if that folder is inside of `uid`'s subtree
    fn get_height(
        &self,
        uid: &str,
        org_id: i64,
        parent_uid: Option<&str>,
        con: &Connection,
    ) -> Result<usize, FolderError>;

    /// every folder underneath `uid`, children before their parents
    fn get_descendants(
        &self,
        uid: &str,
        org_id: i64,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError>;

    fn get_descendant_count(
        &self,
        uid: &str,
        org_id: i64,
        con: &Connection,
    ) -> Result<usize, FolderError> {
        Ok(self.get_descendants(uid, org_id, con)?.len())
    }

    /// fills in the columns this store derives from the adjacency list, for every org
    fn migrate(&self, con: &Connection) -> Result<(), FolderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    NestedSet,
    MaterializedPath,
}

/// builds the store selected by `kind`. `location` and `workers` are only used by the materialized path
/// store, which opens a connection per worker when bootstrapping
pub fn new_store(kind: StoreKind, location: &Path, workers: usize) -> Box<dyn FolderStore> {
    match kind {
        StoreKind::NestedSet => Box::new(TreeStore::new()),
        StoreKind::MaterializedPath => {
            Box::new(MaterializedPathStore::new(location.to_path_buf(), workers))
        }
    }
}

/// the location of the database file every connection is opened against
#[cfg(not(test))]
pub fn db_location() -> PathBuf {
    use crate::config::FOLDER_STORE_CONFIG;

    PathBuf::from(FOLDER_STORE_CONFIG.database.location.as_str())
}

#[cfg(test)]
pub fn db_location() -> PathBuf {
    PathBuf::from(format!("{}.sqlite", crate::test::current_thread_name()))
}

pub fn open_connection() -> Result<Connection, rusqlite::Error> {
    open_connection_at(&db_location())
}

pub fn open_connection_at(location: &Path) -> Result<Connection, rusqlite::Error> {
    let con = Connection::open_with_flags(location, OpenFlags::default())?;
    con.busy_timeout(BUSY_TIMEOUT)?;
    // batch lookups bind their uid lists through rarray()
    rusqlite::vtab::array::load_module(&con)?;
    Ok(con)
}

/// runs init.sql on the database. Safe to run against an already initialized database
pub fn initialize_db(con: &Connection) -> Result<(), rusqlite::Error> {
    con.execute_batch(include_str!("../assets/init.sql"))
}

/// every org that has at least one folder
pub fn get_org_ids(con: &Connection) -> Result<Vec<i64>, rusqlite::Error> {
    let mut pst = con.prepare(include_str!("../assets/queries/folder/get_org_ids.sql"))?;
    let rows = pst.query_map([], |row| row.get(0))?;
    let mut ids = Vec::new();
    for id in rows {
        ids.push(id?);
    }
    Ok(ids)
}

/// sets the requested full path and full path uids on `folder`, given its ancestors from the top down
pub(crate) fn fill_paths(folder: &mut Folder, parents: &[Folder], query: &GetFoldersQuery) {
    if query.with_fullpath {
        folder.fullpath = Some(join_fullpath(
            parents
                .iter()
                .map(|p| p.title.as_str())
                .chain(std::iter::once(folder.title.as_str())),
        ));
    }
    if query.with_fullpath_uids {
        folder.fullpath_uids = Some(join_fullpath_uids(
            parents
                .iter()
                .map(|p| p.uid.as_str())
                .chain(std::iter::once(folder.uid.as_str())),
        ));
    }
}

/// Runs `f` as one atomic unit of work.
///
/// An idle connection gets an immediate transaction, which takes the database write lock up front so
/// that concurrent tree mutations are serialized rather than interleaved. A connection that is already
/// inside of a transaction gets a savepoint instead, so that a failure only rolls back what `f` did.
pub fn in_transaction<T, F>(con: &Connection, f: F) -> Result<T, FolderError>
where
    F: FnOnce(&Connection) -> Result<T, FolderError>,
{
    if !con.is_autocommit() {
        return in_savepoint(con, f);
    }
    let tx = Transaction::new_unchecked(con, TransactionBehavior::Immediate)
        .map_err(FolderError::internal("begin transaction"))?;
    // dropping the transaction on error rolls it back
    let result = f(&tx)?;
    tx.commit()
        .map_err(FolderError::internal("commit transaction"))?;
    Ok(result)
}

fn in_savepoint<T, F>(con: &Connection, f: F) -> Result<T, FolderError>
where
    F: FnOnce(&Connection) -> Result<T, FolderError>,
{
    con.execute_batch("savepoint folder_store")
        .map_err(FolderError::internal("begin savepoint"))?;
    match f(con) {
        Ok(result) => {
            con.execute_batch("release folder_store")
                .map_err(FolderError::internal("release savepoint"))?;
            Ok(result)
        }
        Err(e) => {
            if let Err(rollback_err) =
                con.execute_batch("rollback to folder_store; release folder_store")
            {
                log::error!("Failed to roll back savepoint: {rollback_err:?}");
            }
            Err(e)
        }
    }
}
