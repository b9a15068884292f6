use std::collections::HashMap;
use std::fs::remove_file;

use rusqlite::Connection;

use crate::model::{CreateFolderCommand, Folder};
use crate::repository::{db_location, initialize_db, open_connection, FolderStore};

pub static ORG_ID: i64 = 1;

pub fn current_thread_name() -> String {
    let current_thread = std::thread::current();
    current_thread.name().unwrap().to_string()
}

/// removes any database left over by this test and creates a fresh one
pub fn refresh_db() -> Connection {
    cleanup();
    let con = open_connection().unwrap();
    initialize_db(&con).unwrap();
    con
}

pub fn cleanup() {
    let location = db_location();
    remove_file(&location).unwrap_or(());
    remove_file(format!("{}-journal", location.display())).unwrap_or(());
}

pub fn create_folder(
    store: &dyn FolderStore,
    uid: &str,
    title: &str,
    parent_uid: &str,
    con: &Connection,
) -> Folder {
    store
        .create(
            &CreateFolderCommand {
                uid: uid.to_string(),
                org_id: ORG_ID,
                title: title.to_string(),
                description: format!("{title} description"),
                parent_uid: parent_uid.to_string(),
            },
            con,
        )
        .unwrap()
}

/// creates a chain of `depth` folders underneath `parent_uid`, returning their uids from the top down
pub fn create_subtree(
    store: &dyn FolderStore,
    parent_uid: &str,
    depth: usize,
    prefix: &str,
    con: &Connection,
) -> Vec<String> {
    let mut uids = Vec::new();
    let mut parent = parent_uid.to_string();
    for i in 0..depth {
        let uid = format!("{prefix}{i}");
        create_folder(store, &uid, &format!("{prefix} folder {i}"), &parent, con);
        parent = uid.clone();
        uids.push(uid);
    }
    uids
}

pub fn folder_count(con: &Connection) -> i64 {
    con.query_row(
        "select count(*) from folder where org_id = ?1",
        [ORG_ID],
        |row| row.get(0),
    )
    .unwrap()
}

/// checks every nested set invariant against the parent_uid adjacency of the org
pub fn assert_nested_set(con: &Connection) {
    let mut pst = con
        .prepare("select uid, coalesce(parent_uid, ''), lft, rgt from folder where org_id = ?1")
        .unwrap();
    let rows: Vec<(String, String, i64, i64)> = pst
        .query_map([ORG_ID], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })
        .unwrap()
        .map(Result::unwrap)
        .collect();
    let by_uid: HashMap<&str, &(String, String, i64, i64)> =
        rows.iter().map(|row| (row.0.as_str(), row)).collect();

    let mut bounds: Vec<i64> = rows.iter().flat_map(|row| [row.2, row.3]).collect();
    bounds.sort();
    let expected: Vec<i64> = (1..=rows.len() as i64 * 2).collect();
    assert_eq!(expected, bounds, "bounds must be unique and gap free");

    for (uid, parent_uid, lft, rgt) in &rows {
        assert!(lft < rgt, "{uid}: lft {lft} must be less than rgt {rgt}");
        let subtree_size = rows
            .iter()
            .filter(|other| is_descendant_or_self(&other.0, uid, &by_uid))
            .count() as i64;
        assert_eq!(
            2 * subtree_size,
            rgt - lft + 1,
            "{uid}: width must be twice the subtree size"
        );
        if !parent_uid.is_empty() {
            let parent = by_uid[parent_uid.as_str()];
            assert!(
                parent.2 < *lft && *rgt < parent.3,
                "{uid} must be nested inside of {parent_uid}"
            );
        }
    }

    for a in &rows {
        for b in &rows {
            if a.0 != b.0 && a.1 == b.1 {
                assert!(
                    a.3 < b.2 || b.3 < a.2,
                    "siblings {} and {} must not overlap",
                    a.0,
                    b.0
                );
            }
        }
    }
}

fn is_descendant_or_self(
    uid: &str,
    ancestor: &str,
    by_uid: &HashMap<&str, &(String, String, i64, i64)>,
) -> bool {
    let mut current = uid;
    loop {
        if current == ancestor {
            return true;
        }
        match by_uid.get(current) {
            Some(row) if !row.1.is_empty() => current = row.1.as_str(),
            _ => return false,
        }
    }
}
