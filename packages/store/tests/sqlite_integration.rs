//! End-to-end tests of SQLite-backed databases on disk.

use appvirt_core::{
    DatabaseAction, FileTableEntry, RegistryData, RegistryItem, ResourceKind, TableRow,
};
use appvirt_store::{Database, SqliteBackend};
use tempfile::TempDir;

fn entry(real: &str, virtual_identifier: &str) -> FileTableEntry {
    FileTableEntry::new(real, virtual_identifier, ResourceKind::File)
}

#[test]
fn rows_survive_reopening() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("filesystem.db");
    let connection_string = format!("Data Source={};Table=filesystem", path.display());

    {
        let mut db = Database::<FileTableEntry>::open(&connection_string).unwrap();
        db.initialize().unwrap();
        db.apply(&[
            DatabaseAction::set(entry("c:\\temp\\a.txt", "c:\\appvirt\\a.txt")),
            DatabaseAction::set(entry("c:\\temp\\b.txt", "c:\\appvirt\\b.txt")),
        ])
        .unwrap();
    }

    let mut db = Database::<FileTableEntry>::open(&connection_string).unwrap();
    db.initialize().unwrap();
    let items = db.read_all().unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].real(), "c:\\temp\\a.txt");
    assert_eq!(items[1].virtual_identifier(), "c:\\appvirt\\b.txt");
}

#[test]
fn read_all_is_net_effect_of_sequential_application() {
    let dir = TempDir::new().unwrap();
    let mut db =
        Database::<FileTableEntry>::new(SqliteBackend::open(dir.path().join("t.db"))).unwrap();
    db.initialize().unwrap();

    let actions = vec![
        DatabaseAction::set(entry("a", "v1")),
        DatabaseAction::update(entry("a", "v2")),
        DatabaseAction::set(entry("b", "v3")),
        DatabaseAction::remove(entry("b", "")),
        DatabaseAction::update(entry("c", "never")),
        DatabaseAction::remove(entry("d", "")),
        DatabaseAction::set(entry("b", "v4")),
    ];
    assert_eq!(db.apply(&actions).unwrap(), actions.len());

    let items: Vec<(String, String)> = db
        .read_all()
        .unwrap()
        .into_iter()
        .map(|e| (e.real().to_string(), e.virtual_identifier().to_string()))
        .collect();
    assert_eq!(
        items,
        vec![
            ("a".to_string(), "v2".to_string()),
            ("b".to_string(), "v4".to_string())
        ]
    );
}

#[test]
fn registry_items_round_trip_through_sqlite() {
    let mut db = Database::<RegistryItem>::open("Data Source=:memory:").unwrap();
    db.initialize().unwrap();
    assert_eq!(db.table(), RegistryItem::TABLE);

    let key = RegistryItem::key("hkey_current_user\\software\\vendor");
    let value = RegistryItem::value(
        "hkey_current_user\\software\\vendor",
        "paths",
        RegistryData::MultiString(vec!["a".to_string(), "b".to_string()]),
    );
    db.apply(&[DatabaseAction::set(key.clone()), DatabaseAction::set(value.clone())])
        .unwrap();

    let items = db.read_all().unwrap();
    assert_eq!(items, vec![key, value]);
}

#[test]
fn failed_commit_leaves_table_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("t.db");
    let mut db = Database::<FileTableEntry>::new(SqliteBackend::open(&path)).unwrap();
    db.initialize().unwrap();
    db.apply(&[DatabaseAction::set(entry("a", "v1"))]).unwrap();

    // A second handle drops the table out from under the first.
    let other = rusqlite::Connection::open(&path).unwrap();
    other.execute("DROP TABLE filesystem", []).unwrap();
    other
        .execute(
            "CREATE TABLE filesystem (\"key\" TEXT PRIMARY KEY NOT NULL, \"value\" TEXT NOT NULL, \"kind\" TEXT NOT NULL, CHECK (\"value\" <> 'poison'))",
            [],
        )
        .unwrap();
    drop(other);

    let result = db.apply(&[
        DatabaseAction::set(entry("x", "fine")),
        DatabaseAction::set(entry("y", "poison")),
    ]);
    assert!(result.is_err());
    assert!(!result.unwrap_err().is_fatal());
    assert_eq!(db.pending(), 0);
    assert!(db.read_all().unwrap().is_empty());
}
