use std::rc::Rc;

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, Connection};

use crate::model::{
    normalize_parent_uid, CreateFolderCommand, Folder, FolderError, GetChildrenQuery,
    GetFolderQuery, GetFoldersQuery, UpdateFolderCommand, GENERAL_FOLDER_UID,
};

/// Single row access to the folder table.
///
/// Nothing in here knows about the hierarchy: intervals and full paths are left alone,
/// so the other stores wrap these calls with their own bookkeeping
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlStore;

impl SqlStore {
    /// creates a folder record in the database.
    /// This does not check that the parent exists, and that must be done before this function is called
    pub fn create(&self, cmd: &CreateFolderCommand, con: &Connection) -> Result<Folder, FolderError> {
        validate_create(cmd)?;
        self.insert(cmd, 0, 0, con)?;
        self.get(&GetFolderQuery::by_uid(&cmd.uid, cmd.org_id), con)
    }

    /// inserts the row with the passed interval and returns its id
    pub(crate) fn insert(
        &self,
        cmd: &CreateFolderCommand,
        lft: i64,
        rgt: i64,
        con: &Connection,
    ) -> Result<i64, FolderError> {
        let mut pst = con
            .prepare(include_str!("../assets/queries/folder/create_folder.sql"))
            .map_err(FolderError::internal("prepare folder insert"))?;
        let parent_uid = normalize_parent_uid(&cmd.parent_uid);
        let parent_uid = if parent_uid.is_empty() {
            None
        } else {
            Some(parent_uid)
        };
        let now = Utc::now().naive_utc();
        let id = pst
            .insert(params![
                cmd.org_id,
                cmd.uid,
                cmd.title,
                cmd.description,
                parent_uid,
                lft,
                rgt,
                now
            ])
            .map_err(FolderError::write("insert folder"))?;
        Ok(id)
    }

    pub fn get(&self, query: &GetFolderQuery, con: &Connection) -> Result<Folder, FolderError> {
        if let Some(uid) = &query.uid {
            let mut pst = con
                .prepare(include_str!("../assets/queries/folder/get_folder_by_uid.sql"))
                .map_err(FolderError::internal("prepare folder lookup"))?;
            return pst
                .query_row(params![query.org_id, uid], map_folder)
                .map_err(FolderError::lookup("get folder by uid"));
        }
        if let Some(id) = query.id {
            let mut pst = con
                .prepare(include_str!("../assets/queries/folder/get_folder_by_id.sql"))
                .map_err(FolderError::internal("prepare folder lookup"))?;
            return pst
                .query_row(params![query.org_id, id], map_folder)
                .map_err(FolderError::lookup("get folder by id"));
        }
        if let Some(title) = &query.title {
            let parent_uid = normalize_parent_uid(query.parent_uid.as_deref().unwrap_or(""));
            let mut pst = con
                .prepare(include_str!("../assets/queries/folder/get_folder_by_title.sql"))
                .map_err(FolderError::internal("prepare folder lookup"))?;
            return pst
                .query_row(params![query.org_id, title, parent_uid], map_folder)
                .map_err(FolderError::lookup("get folder by title"));
        }
        Err(FolderError::BadRequest(
            "one of uid, id or title must be present".to_string(),
        ))
    }

    /// the stored rows for `query.uids`, or for the whole org when no uids are passed.
    /// Paths are left as stored
    pub fn get_folders(
        &self,
        query: &GetFoldersQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError> {
        let mut folders = Vec::new();
        if query.uids.is_empty() {
            let mut pst = con
                .prepare(include_str!("../assets/queries/folder/get_folders_by_org.sql"))
                .map_err(FolderError::internal("prepare org folder lookup"))?;
            let rows = pst
                .query_map(params![query.org_id], map_folder)
                .map_err(FolderError::internal("get org folders"))?;
            for folder in rows {
                folders.push(folder.map_err(FolderError::internal("read org folder"))?);
            }
        } else {
            let uids: Vec<Value> = query.uids.iter().cloned().map(Value::from).collect();
            let mut pst = con
                .prepare(include_str!("../assets/queries/folder/get_folders_by_uids.sql"))
                .map_err(FolderError::internal("prepare folder batch lookup"))?;
            let rows = pst
                .query_map(params![query.org_id, Rc::new(uids)], map_folder)
                .map_err(FolderError::internal("get folders by uid"))?;
            for folder in rows {
                folders.push(folder.map_err(FolderError::internal("read folder"))?);
            }
        }
        Ok(folders)
    }

    /// direct children only, ordered by title
    pub fn get_children(
        &self,
        query: &GetChildrenQuery,
        con: &Connection,
    ) -> Result<Vec<Folder>, FolderError> {
        let parent_uid = normalize_parent_uid(&query.uid);
        // sqlite treats a negative limit as no limit at all
        let (limit, offset) = if query.limit == 0 {
            (-1, 0)
        } else {
            let page = query.page.max(1) as i64 - 1;
            (query.limit as i64, page * query.limit as i64)
        };
        let mut pst = con
            .prepare(include_str!("../assets/queries/folder/get_child_folders.sql"))
            .map_err(FolderError::internal("prepare child folder lookup"))?;
        let rows = pst
            .query_map(params![query.org_id, parent_uid, limit, offset], map_folder)
            .map_err(FolderError::internal("get child folders"))?;
        let mut folders = Vec::new();
        for folder in rows {
            folders.push(folder.map_err(FolderError::internal("read child folder"))?);
        }
        Ok(folders)
    }

    /// updates a folder record in place.
    /// Moving a folder here only rewrites its `parent_uid`; the caller owns any interval or path bookkeeping
    pub fn update(&self, cmd: &UpdateFolderCommand, con: &Connection) -> Result<Folder, FolderError> {
        if cmd.uid.is_empty() {
            return Err(FolderError::BadRequest("missing uid".to_string()));
        }
        if cmd.is_empty() {
            return Err(FolderError::BadRequest("nothing to update".to_string()));
        }
        if let Some(new_uid) = &cmd.new_uid {
            if new_uid.is_empty() || new_uid == GENERAL_FOLDER_UID {
                return Err(FolderError::BadRequest(format!(
                    "cannot rename folder to uid '{new_uid}'"
                )));
            }
        }
        let existing = self.get(&GetFolderQuery::by_uid(&cmd.uid, cmd.org_id), con)?;
        let uid = cmd.new_uid.clone().unwrap_or_else(|| existing.uid.clone());
        let title = cmd.new_title.clone().unwrap_or_else(|| existing.title.clone());
        let description = cmd
            .new_description
            .clone()
            .unwrap_or_else(|| existing.description.clone());
        let parent_uid = match &cmd.new_parent_uid {
            Some(new_parent) => normalize_parent_uid(new_parent).to_string(),
            None => existing.parent_uid.clone(),
        };
        let parent_uid = if parent_uid.is_empty() {
            None
        } else {
            Some(parent_uid)
        };
        let mut pst = con
            .prepare(include_str!("../assets/queries/folder/update_folder.sql"))
            .map_err(FolderError::internal("prepare folder update"))?;
        pst.execute(params![
            uid,
            title,
            description,
            parent_uid,
            Utc::now().naive_utc(),
            cmd.org_id,
            existing.id
        ])
        .map_err(FolderError::write("update folder"))?;
        if uid != existing.uid {
            // keep the children pointing at their renamed parent
            con.execute(
                include_str!("../assets/queries/folder/update_child_parent_uid.sql"),
                params![cmd.org_id, existing.uid, uid],
            )
            .map_err(FolderError::internal("re-parent children of renamed folder"))?;
        }
        self.get(&GetFolderQuery::by_uid(&uid, cmd.org_id), con)
    }

    /// deletes the single folder row. Children are left alone.
    /// This _does not_ check if the folder exists first
    pub fn delete(&self, uid: &str, org_id: i64, con: &Connection) -> Result<(), FolderError> {
        let mut pst = con
            .prepare(include_str!("../assets/queries/folder/delete_folder_by_uid.sql"))
            .map_err(FolderError::internal("prepare folder delete"))?;
        pst.execute(params![org_id, uid])
            .map_err(FolderError::internal("delete folder"))?;
        Ok(())
    }
}

/// checks that are shared by every store when creating a folder
pub(crate) fn validate_create(cmd: &CreateFolderCommand) -> Result<(), FolderError> {
    if cmd.uid.is_empty() {
        return Err(FolderError::BadRequest("missing uid".to_string()));
    }
    if cmd.uid == GENERAL_FOLDER_UID {
        return Err(FolderError::BadRequest(format!(
            "cannot create folder with uid {GENERAL_FOLDER_UID}"
        )));
    }
    if cmd.uid == cmd.parent_uid {
        return Err(FolderError::CannotBeParentOfItself);
    }
    Ok(())
}

pub(crate) fn map_folder(row: &rusqlite::Row) -> Result<Folder, rusqlite::Error> {
    let parent_uid: Option<String> = row.get(5)?;
    Ok(Folder {
        id: row.get(0)?,
        org_id: row.get(1)?,
        uid: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        parent_uid: parent_uid.unwrap_or_default(),
        lft: row.get(6)?,
        rgt: row.get(7)?,
        fullpath: row.get(8)?,
        fullpath_uids: None,
        created: row.get(9)?,
        updated: row.get(10)?,
    })
}
