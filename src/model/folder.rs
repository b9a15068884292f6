use chrono::NaiveDateTime;

/// the deepest a folder may sit below the general folder. Folders directly under general are at depth 1
pub const MAX_NESTED_FOLDER_DEPTH: usize = 8;

/// uid reserved for the implicit root folder. It never exists as a row in the folder table
pub const GENERAL_FOLDER_UID: &str = "general";

pub const FULLPATH_SEPARATOR: char = '/';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    /// legacy numeric id, assigned by the database
    pub id: i64,
    pub org_id: i64,
    /// unique within `org_id`
    pub uid: String,
    /// empty if the folder sits directly under the general folder
    pub parent_uid: String,
    pub title: String,
    pub description: String,
    /// nested set bounds, only maintained by the tree store
    pub lft: i64,
    pub rgt: i64,
    /// `/` separated titles from the top level folder down to this one.
    /// Only persisted by the materialized path store
    pub fullpath: Option<String>,
    /// `/` separated uids from the top level folder down to this one. Never persisted
    pub fullpath_uids: Option<String>,
    pub created: NaiveDateTime,
    pub updated: NaiveDateTime,
}

impl Folder {
    pub fn is_top_level(&self) -> bool {
        self.parent_uid.is_empty()
    }
}

/// both an empty uid and the general folder's uid refer to the implicit root
pub fn is_root_uid(uid: &str) -> bool {
    uid.is_empty() || uid == GENERAL_FOLDER_UID
}

/// translates any way of referring to the root into the empty string stored as a null parent
pub fn normalize_parent_uid(uid: &str) -> &str {
    if is_root_uid(uid) {
        ""
    } else {
        uid
    }
}

/// escapes the separator inside of a title so that it can be joined into a full path
pub fn escape_title(title: &str) -> String {
    title.replace(FULLPATH_SEPARATOR, "\\/")
}

/// joins the passed titles into a full path, escaping any separator found in a title
pub fn join_fullpath<'a, I>(titles: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    titles
        .into_iter()
        .map(escape_title)
        .collect::<Vec<String>>()
        .join("/")
}

/// joins uids from the top level folder down with the separator. Uids are never escaped
pub fn join_fullpath_uids<'a, I>(uids: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    uids.into_iter().collect::<Vec<&str>>().join("/")
}

/// splits a full path back into titles. An escaped separator (`\/`) stays part of its title,
/// and empty segments are dropped
pub fn split_fullpath(path: &str) -> Vec<String> {
    let mut titles = Vec::new();
    let mut current = String::new();
    for segment in path.split(FULLPATH_SEPARATOR) {
        if current.ends_with('\\') {
            current.pop();
            current.push(FULLPATH_SEPARATOR);
            current.push_str(segment);
        } else {
            if !current.is_empty() {
                titles.push(current);
            }
            current = segment.to_string();
        }
    }
    if !current.is_empty() {
        titles.push(current);
    }
    titles
}
