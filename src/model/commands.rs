/// request to create a single folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateFolderCommand {
    pub uid: String,
    pub org_id: i64,
    pub title: String,
    pub description: String,
    /// empty (or `general`) to create the folder at the top level
    pub parent_uid: String,
}

/// request to change a folder. Every `None` field is left alone.
/// A `Some` in `new_parent_uid` marks the request as a move, with `Some("")` moving to the top level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateFolderCommand {
    pub uid: String,
    pub org_id: i64,
    pub new_uid: Option<String>,
    pub new_title: Option<String>,
    pub new_description: Option<String>,
    pub new_parent_uid: Option<String>,
}

impl UpdateFolderCommand {
    pub fn is_move(&self) -> bool {
        self.new_parent_uid.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.new_uid.is_none()
            && self.new_title.is_none()
            && self.new_description.is_none()
            && self.new_parent_uid.is_none()
    }
}

/// looks up a single folder. Selectors are checked in the order uid, id, title;
/// `parent_uid` only narrows a title lookup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetFolderQuery {
    pub uid: Option<String>,
    pub id: Option<i64>,
    pub title: Option<String>,
    pub parent_uid: Option<String>,
    pub org_id: i64,
    /// compute the full path from the folder's ancestors instead of returning the stored one
    pub with_fullpath: bool,
}

impl GetFolderQuery {
    pub fn by_uid(uid: &str, org_id: i64) -> Self {
        Self {
            uid: Some(uid.to_string()),
            org_id,
            ..Default::default()
        }
    }

    pub fn by_id(id: i64, org_id: i64) -> Self {
        Self {
            id: Some(id),
            org_id,
            ..Default::default()
        }
    }

    pub fn by_title(title: &str, parent_uid: Option<&str>, org_id: i64) -> Self {
        Self {
            title: Some(title.to_string()),
            parent_uid: parent_uid.map(str::to_string),
            org_id,
            ..Default::default()
        }
    }
}

/// looks up many folders of one org at once, ordered by title. An empty `uids` returns every folder in the org
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetFoldersQuery {
    pub uids: Vec<String>,
    pub org_id: i64,
    /// compute each folder's full path from its ancestors
    pub with_fullpath: bool,
    /// fill in the uids of each folder's ancestors, ending with its own
    pub with_fullpath_uids: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetParentsQuery {
    pub uid: String,
    pub org_id: i64,
}

/// direct children of `uid`, ordered by title. An empty uid lists the top level
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetChildrenQuery {
    pub uid: String,
    pub org_id: i64,
    /// 0 means no limit
    pub limit: u32,
    /// 1 based; 0 is treated as the first page
    pub page: u32,
}
