use rusqlite::Connection;

use crate::model::{
    CreateFolderCommand, FolderError, GetFolderQuery, GetParentsQuery, UpdateFolderCommand,
    MAX_NESTED_FOLDER_DEPTH,
};
use crate::repository::{
    db_location, new_store, FolderStore, MaterializedPathStore, SqlStore, StoreKind,
};
use crate::test::*;

fn store() -> MaterializedPathStore {
    MaterializedPathStore::new(db_location(), 2)
}

fn fullpath(uid: &str, con: &Connection) -> Option<String> {
    SqlStore
        .get(&GetFolderQuery::by_uid(uid, ORG_ID), con)
        .unwrap()
        .fullpath
}

fn update(store: &MaterializedPathStore, cmd: UpdateFolderCommand, con: &Connection) {
    store
        .update(
            &UpdateFolderCommand {
                org_id: ORG_ID,
                ..cmd
            },
            con,
        )
        .unwrap();
}

mod create_tests {
    use super::*;

    #[test]
    fn create_stores_fullpath() {
        let con = refresh_db();
        let store = store();
        let a = create_folder(&store, "a", "A", "", &con);
        let b = create_folder(&store, "b", "B", "a", &con);
        let c = create_folder(&store, "c", "C/D", "b", &con);
        assert_eq!(Some("A/B".to_string()), fullpath("b", &con));
        con.close().unwrap();
        assert_eq!(Some("A".to_string()), a.fullpath);
        assert_eq!(Some("A/B".to_string()), b.fullpath);
        assert_eq!(Some("A/B/C\\/D".to_string()), c.fullpath);
        cleanup();
    }

    #[test]
    fn create_with_unknown_parent_fails() {
        let con = refresh_db();
        let res = store().create(
            &CreateFolderCommand {
                uid: "a".to_string(),
                org_id: ORG_ID,
                title: "A".to_string(),
                parent_uid: "unknown".to_string(),
                ..Default::default()
            },
            &con,
        );
        assert!(matches!(res.unwrap_err(), FolderError::NotFound));
        assert_eq!(0, folder_count(&con));
        con.close().unwrap();
        cleanup();
    }

    #[test]
    fn create_past_max_depth_fails() {
        let con = refresh_db();
        let store = store();
        let uids = create_subtree(&store, "", MAX_NESTED_FOLDER_DEPTH, "level", &con);
        let res = store.create(
            &CreateFolderCommand {
                uid: "too_deep".to_string(),
                org_id: ORG_ID,
                title: "Too deep".to_string(),
                parent_uid: uids.last().unwrap().clone(),
                ..Default::default()
            },
            &con,
        );
        assert!(matches!(
            res.unwrap_err(),
            FolderError::MaxDepthExceeded { .. }
        ));
        assert_eq!(MAX_NESTED_FOLDER_DEPTH as i64, folder_count(&con));
        con.close().unwrap();
        cleanup();
    }

    #[test]
    fn new_store_builds_materialized_path_store() {
        let con = refresh_db();
        let store = new_store(StoreKind::MaterializedPath, &db_location(), 1);
        create_folder(store.as_ref(), "a", "A", "", &con);
        create_folder(store.as_ref(), "b", "B", "a", &con);
        assert_eq!(Some("A/B".to_string()), fullpath("b", &con));
        con.close().unwrap();
        cleanup();
    }
}

mod update_tests {
    use super::*;

    #[test]
    fn rename_does_not_cascade_to_descendants() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "a", "A", "", &con);
        create_folder(&store, "b", "B", "a", &con);
        create_folder(&store, "c", "C", "b", &con);
        update(
            &store,
            UpdateFolderCommand {
                uid: "a".to_string(),
                new_title: Some("Renamed".to_string()),
                ..Default::default()
            },
            &con,
        );
        assert_eq!(Some("Renamed".to_string()), fullpath("a", &con));
        assert_eq!(Some("A/B".to_string()), fullpath("b", &con));
        assert_eq!(Some("A/B/C".to_string()), fullpath("c", &con));
        // the computed path always reflects the current titles
        let computed = store
            .get(
                &GetFolderQuery {
                    with_fullpath: true,
                    ..GetFolderQuery::by_uid("c", ORG_ID)
                },
                &con,
            )
            .unwrap();
        con.close().unwrap();
        assert_eq!(Some("Renamed/B/C".to_string()), computed.fullpath);
        cleanup();
    }

    #[test]
    fn move_only_refreshes_moved_folder() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "a", "A", "", &con);
        create_folder(&store, "b", "B", "a", &con);
        create_folder(&store, "c", "C", "b", &con);
        create_folder(&store, "p", "P", "", &con);
        update(
            &store,
            UpdateFolderCommand {
                uid: "b".to_string(),
                new_parent_uid: Some("p".to_string()),
                ..Default::default()
            },
            &con,
        );
        let parents: Vec<String> = store
            .get_parents(
                &GetParentsQuery {
                    uid: "c".to_string(),
                    org_id: ORG_ID,
                },
                &con,
            )
            .unwrap()
            .into_iter()
            .map(|f| f.uid)
            .collect();
        assert_eq!(Some("P/B".to_string()), fullpath("b", &con));
        assert_eq!(Some("A/B/C".to_string()), fullpath("c", &con));
        con.close().unwrap();
        assert_eq!(vec!["p".to_string(), "b".to_string()], parents);
        cleanup();
    }

    #[test]
    fn move_under_own_descendant_fails() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "a", "A", "", &con);
        create_folder(&store, "b", "B", "a", &con);
        create_folder(&store, "c", "C", "b", &con);
        let res = store.update(
            &UpdateFolderCommand {
                uid: "a".to_string(),
                org_id: ORG_ID,
                new_parent_uid: Some("c".to_string()),
                ..Default::default()
            },
            &con,
        );
        assert!(matches!(res.unwrap_err(), FolderError::CircularReference));
        let a = store.get(&GetFolderQuery::by_uid("a", ORG_ID), &con).unwrap();
        con.close().unwrap();
        assert!(a.is_top_level());
        cleanup();
    }

    #[test]
    fn move_past_max_depth_fails() {
        let con = refresh_db();
        let store = store();
        create_subtree(&store, "", 4, "x", &con);
        create_subtree(&store, "", 5, "y", &con);
        let res = store.update(
            &UpdateFolderCommand {
                uid: "x0".to_string(),
                org_id: ORG_ID,
                new_parent_uid: Some("y4".to_string()),
                ..Default::default()
            },
            &con,
        );
        assert!(matches!(
            res.unwrap_err(),
            FolderError::MaxDepthExceeded { .. }
        ));
        update(
            &store,
            UpdateFolderCommand {
                uid: "x0".to_string(),
                new_parent_uid: Some("y3".to_string()),
                ..Default::default()
            },
            &con,
        );
        assert_eq!(
            Some("y folder 0/y folder 1/y folder 2/y folder 3/x folder 0".to_string()),
            fullpath("x0", &con)
        );
        con.close().unwrap();
        cleanup();
    }
}

mod delete_tests {
    use super::*;

    #[test]
    fn delete_cascades_to_every_level() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "a", "A", "", &con);
        create_subtree(&store, "a", 4, "sub", &con);
        create_folder(&store, "side", "Side", "a", &con);
        create_folder(&store, "other", "Other", "", &con);
        store.delete("a", ORG_ID, &con).unwrap();
        assert_eq!(1, folder_count(&con));
        let res = store.get(&GetFolderQuery::by_uid("sub3", ORG_ID), &con);
        con.close().unwrap();
        assert!(matches!(res.unwrap_err(), FolderError::NotFound));
        cleanup();
    }

    #[test]
    fn delete_unknown_folder_fails() {
        let con = refresh_db();
        let res = store().delete("unknown", ORG_ID, &con);
        con.close().unwrap();
        assert!(matches!(res.unwrap_err(), FolderError::NotFound));
        cleanup();
    }
}

mod query_tests {
    use super::*;

    #[test]
    fn get_parents_detects_cycles() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "a", "A", "", &con);
        create_folder(&store, "b", "B", "a", &con);
        create_folder(&store, "c", "C", "b", &con);
        con.execute(
            "update folder set parent_uid = 'c' where uid = 'a'",
            [],
        )
        .unwrap();
        let res = store.get_parents(
            &GetParentsQuery {
                uid: "c".to_string(),
                org_id: ORG_ID,
            },
            &con,
        );
        con.close().unwrap();
        assert!(matches!(res.unwrap_err(), FolderError::CircularReference));
        cleanup();
    }

    #[test]
    fn get_with_fullpath_computes_without_storing() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "a", "A", "", &con);
        create_folder(&store, "b", "B", "a", &con);
        update(
            &store,
            UpdateFolderCommand {
                uid: "a".to_string(),
                new_title: Some("Renamed".to_string()),
                ..Default::default()
            },
            &con,
        );
        let stored = store.get(&GetFolderQuery::by_uid("b", ORG_ID), &con).unwrap();
        let computed = store
            .get(
                &GetFolderQuery {
                    with_fullpath: true,
                    ..GetFolderQuery::by_uid("b", ORG_ID)
                },
                &con,
            )
            .unwrap();
        assert_eq!(Some("A/B".to_string()), stored.fullpath);
        assert_eq!(Some("Renamed/B".to_string()), computed.fullpath);
        // reading the fresh path doesn't repair the stored one
        assert_eq!(Some("A/B".to_string()), fullpath("b", &con));
        con.close().unwrap();
        cleanup();
    }

    #[test]
    fn get_parents_of_unknown_folder_is_empty() {
        let con = refresh_db();
        let parents = store()
            .get_parents(
                &GetParentsQuery {
                    uid: "unknown".to_string(),
                    org_id: ORG_ID,
                },
                &con,
            )
            .unwrap();
        con.close().unwrap();
        assert!(parents.is_empty());
        cleanup();
    }

    #[test]
    fn get_height() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "parent", "Parent", "", &con);
        create_subtree(&store, "parent", 3, "sub", &con);
        create_folder(&store, "side", "Side", "parent", &con);
        assert_eq!(3, store.get_height("parent", ORG_ID, None, &con).unwrap());
        assert_eq!(0, store.get_height("side", ORG_ID, None, &con).unwrap());
        let res = store.get_height("parent", ORG_ID, Some("sub2"), &con);
        assert!(matches!(res.unwrap_err(), FolderError::CircularReference));
        let res = store.get_height("parent", ORG_ID, Some("parent"), &con);
        assert!(matches!(res.unwrap_err(), FolderError::CircularReference));
        assert_eq!(
            3,
            store
                .get_height("parent", ORG_ID, Some("general"), &con)
                .unwrap()
        );
        con.close().unwrap();
        cleanup();
    }
}

mod migrate_tests {
    use super::*;

    /// builds `width` top level folders, each with `width` children that each have 2 children of their own,
    /// without computing any full paths
    fn create_without_paths(width: usize, con: &Connection) -> usize {
        let mut count = 0;
        let mut create = |uid: &str, title: &str, parent_uid: &str| {
            SqlStore
                .create(
                    &CreateFolderCommand {
                        uid: uid.to_string(),
                        org_id: ORG_ID,
                        title: title.to_string(),
                        parent_uid: parent_uid.to_string(),
                        ..Default::default()
                    },
                    con,
                )
                .unwrap();
            count += 1;
        };
        for i in 0..width {
            let top = format!("t{i}");
            create(&top, &format!("top {i}"), "");
            for j in 0..width {
                let mid = format!("{top}m{j}");
                create(&mid, &format!("mid {j}"), &top);
                for k in 0..2 {
                    create(&format!("{mid}l{k}"), &format!("leaf {k}"), &mid);
                }
            }
        }
        count
    }

    #[test]
    fn migrate_fills_every_missing_path() {
        let con = refresh_db();
        let created = create_without_paths(4, &con);
        let written = MaterializedPathStore::new(db_location(), 4)
            .migrate_missing_paths()
            .unwrap();
        assert_eq!(created, written);
        assert_eq!(Some("top 0".to_string()), fullpath("t0", &con));
        assert_eq!(Some("top 2/mid 3".to_string()), fullpath("t2m3", &con));
        assert_eq!(
            Some("top 3/mid 1/leaf 1".to_string()),
            fullpath("t3m1l1", &con)
        );
        let missing: i64 = con
            .query_row(
                "select count(*) from folder where fullpath is null",
                [],
                |row| row.get(0),
            )
            .unwrap();
        con.close().unwrap();
        assert_eq!(0, missing);
        cleanup();
    }

    #[test]
    fn migrate_only_touches_missing_paths() {
        let con = refresh_db();
        let store = store();
        create_folder(&store, "a", "A", "", &con);
        create_folder(&store, "b", "B", "a", &con);
        con.execute("update folder set fullpath = null where uid = 'b'", [])
            .unwrap();
        con.execute("update folder set fullpath = 'stale' where uid = 'a'", [])
            .unwrap();
        let written = store.migrate_missing_paths().unwrap();
        assert_eq!(1, written);
        assert_eq!(0, store.migrate_missing_paths().unwrap());
        assert_eq!(Some("stale".to_string()), fullpath("a", &con));
        assert_eq!(Some("A/B".to_string()), fullpath("b", &con));
        con.close().unwrap();
        cleanup();
    }

    #[test]
    fn migrate_with_no_folders() {
        let con = refresh_db();
        store().migrate(&con).unwrap();
        assert_eq!(0, folder_count(&con));
        con.close().unwrap();
        cleanup();
    }
}
