//! Host and guests running together against stores on disk.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use appvirt::{
    AppError, GuestOptions, HookCall, HookReply, HookTable, HostContext, InterceptedApi,
};
use appvirt_core::{
    CreationDisposition, EngineConfig, RegistryData, VirtualizationRule, VirtualizationType,
};
use appvirt_provider::{FileSystem, MemoryFileSystem, ProviderError};
use appvirt_store::StoreError;
use tempfile::TempDir;

fn config(dir: &TempDir) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.file_system_root = "D:\\Virtual".to_string();
    config.database.file_system = format!(
        "Data Source={};Table=filesystem",
        dir.path().join("filesystem.db").display()
    );
    config.database.registry = format!(
        "Data Source={};Table=registry",
        dir.path().join("registry.db").display()
    );
    config.flush_interval_ms = 0;
    config
}

fn options(fs: &Arc<MemoryFileSystem>) -> GuestOptions {
    GuestOptions {
        file_system: fs.clone(),
        flush_interval: None,
        ..GuestOptions::default()
    }
}

fn create(path: &str) -> HookCall {
    HookCall::CreateFile {
        path: path.to_string(),
        disposition: CreationDisposition::CreateAlways,
    }
}

#[test]
fn state_written_by_one_guest_is_seen_by_the_next() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(MemoryFileSystem::new());
    let host = HostContext::open(config(&dir)).unwrap();

    let first = host.spawn_guest(10, options(&fs)).unwrap();
    let mut hooks = HookTable::new();
    assert_eq!(first.install_hooks(&mut hooks).unwrap(), 12);
    assert_eq!(hooks.len(), InterceptedApi::ALL.len());

    let reply = hooks.dispatch(create("C:\\Program Files\\Vendor\\settings.ini")).unwrap();
    assert_eq!(reply, HookReply::Path("D:\\Virtual\\settings.ini".to_string()));

    let key = match hooks
        .dispatch(HookCall::RegCreateKey {
            path: "HKCU\\Software\\Vendor".to_string(),
        })
        .unwrap()
    {
        HookReply::Key(key) => key,
        other => panic!("unexpected {:?}", other),
    };
    hooks
        .dispatch(HookCall::RegSetValue {
            key,
            name: "Theme".to_string(),
            data: RegistryData::String("dark".to_string()),
        })
        .unwrap();
    assert_eq!(
        hooks.dispatch(HookCall::RegCloseKey { key }).unwrap(),
        HookReply::Handled
    );
    assert!(first.pending() > 0);
    first.shutdown().unwrap();
    assert_eq!(first.pending(), 0);

    let second = host.spawn_guest(11, options(&fs)).unwrap();
    assert_eq!(second.file_system().len(), 1);
    assert_eq!(
        second.handle(create("c:/program files/vendor/SETTINGS.INI")).unwrap(),
        HookReply::Path("D:\\Virtual\\settings.ini".to_string())
    );
    let key = match second
        .handle(HookCall::RegOpenKey {
            path: "HKEY_CURRENT_USER\\Software\\Vendor".to_string(),
        })
        .unwrap()
    {
        HookReply::Key(key) => key,
        other => panic!("unexpected {:?}", other),
    };
    assert_eq!(
        second
            .handle(HookCall::RegQueryValue {
                key,
                name: "theme".to_string(),
            })
            .unwrap(),
        HookReply::Value(RegistryData::String("dark".to_string()))
    );
}

#[test]
fn mappings_survive_a_host_restart() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(MemoryFileSystem::new());
    {
        let host = HostContext::open(config(&dir)).unwrap();
        let guest = host.spawn_guest(20, options(&fs)).unwrap();
        guest.handle(create("C:\\Temp\\a.txt")).unwrap();
        guest.handle(create("C:\\Temp\\b.txt")).unwrap();
        guest.shutdown().unwrap();
    }

    let host = HostContext::open(config(&dir)).unwrap();
    let guest = host.spawn_guest(21, options(&fs)).unwrap();
    assert_eq!(guest.file_system().len(), 2);
}

#[test]
fn move_and_delete_follow_the_mapping() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(MemoryFileSystem::new());
    let host = HostContext::open(config(&dir)).unwrap();
    let guest = host.spawn_guest(30, options(&fs)).unwrap();

    guest.handle(create("C:\\Temp\\draft.txt")).unwrap();
    assert_eq!(
        guest
            .handle(HookCall::MoveFile {
                from: "C:\\Temp\\draft.txt".to_string(),
                to: "C:\\Temp\\final.txt".to_string(),
            })
            .unwrap(),
        HookReply::Handled
    );
    assert_eq!(
        guest
            .handle(HookCall::DeleteFile {
                path: "C:\\Temp\\final.txt".to_string(),
            })
            .unwrap(),
        HookReply::Path("D:\\Virtual\\draft.txt".to_string())
    );
    assert!(guest.file_system().is_empty());
    assert_eq!(
        guest
            .handle(HookCall::DeleteFile {
                path: "C:\\Temp\\never.txt".to_string(),
            })
            .unwrap(),
        HookReply::NotFound
    );

    guest.shutdown().unwrap();
    let next = host.spawn_guest(31, options(&fs)).unwrap();
    assert!(next.file_system().is_empty());
}

#[test]
fn idle_guest_stops_redirecting() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(MemoryFileSystem::new());
    let host = HostContext::open(config(&dir)).unwrap();
    let guest = host
        .spawn_guest(
            40,
            GuestOptions {
                idle_release: Some(Duration::from_millis(100)),
                ..options(&fs)
            },
        )
        .unwrap();

    assert!(matches!(
        guest.handle(create("C:\\Temp\\early.txt")).unwrap(),
        HookReply::Path(_)
    ));
    thread::sleep(Duration::from_millis(300));
    assert_eq!(
        guest.handle(create("C:\\Temp\\late.txt")).unwrap(),
        HookReply::PassThrough
    );
}

#[test]
fn deletes_and_moves_only_reach_real_files_under_transparent_rules() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(MemoryFileSystem::new());
    fs.add_file("C:\\Data\\real.txt", "keep me");
    fs.add_file("C:\\Windows\\system.ini", "system");
    let mut config = config(&dir);
    config.file_system_rules = vec![
        VirtualizationRule::new("C:\\Data%", VirtualizationType::Virtual).unwrap(),
        VirtualizationRule::new("C:\\Windows%", VirtualizationType::Transparent).unwrap(),
    ];
    let host = HostContext::open(config).unwrap();
    let guest = host.spawn_guest(35, options(&fs)).unwrap();

    let delete = |path: &str| {
        guest
            .handle(HookCall::DeleteFile {
                path: path.to_string(),
            })
            .unwrap()
    };
    let rename = |from: &str, to: &str| {
        guest
            .handle(HookCall::MoveFile {
                from: from.to_string(),
                to: to.to_string(),
            })
            .unwrap()
    };

    // The real file is invisible to the guest, so it can be neither
    // deleted nor moved.
    assert_eq!(delete("C:\\Data\\real.txt"), HookReply::NotFound);
    assert_eq!(
        rename("C:\\Data\\real.txt", "C:\\Data\\moved.txt"),
        HookReply::NotFound
    );
    assert_eq!(fs.read("C:\\Data\\real.txt").unwrap(), b"keep me");
    assert!(guest.file_system().is_empty());

    assert_eq!(delete("C:\\Windows\\system.ini"), HookReply::PassThrough);
    assert_eq!(
        rename("C:\\Windows\\system.ini", "C:\\Data\\system.ini"),
        HookReply::Move {
            from: "C:\\Windows\\system.ini".to_string(),
            to: "D:\\Virtual\\system.ini".to_string(),
        }
    );

    assert_eq!(
        guest.handle(create("C:\\Data\\out.log")).unwrap(),
        HookReply::Path("D:\\Virtual\\out.log".to_string())
    );
    assert_eq!(
        rename("C:\\Data\\out.log", "C:\\Windows\\out.log"),
        HookReply::Move {
            from: "D:\\Virtual\\out.log".to_string(),
            to: "C:\\Windows\\out.log".to_string(),
        }
    );
    // Only the mapping made for the move into C:\Data is left.
    assert_eq!(guest.file_system().len(), 1);
    assert!(fs.exists("C:\\Data\\real.txt"));
}

#[test]
fn registry_activity_keeps_the_guest_alive() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(MemoryFileSystem::new());
    let host = HostContext::open(config(&dir)).unwrap();
    let guest = host
        .spawn_guest(
            45,
            GuestOptions {
                idle_release: Some(Duration::from_millis(200)),
                ..options(&fs)
            },
        )
        .unwrap();
    let create_key = || {
        guest
            .handle(HookCall::RegCreateKey {
                path: "HKCU\\Software\\Vendor".to_string(),
            })
            .unwrap()
    };

    assert!(matches!(
        guest.handle(create("C:\\Temp\\early.txt")).unwrap(),
        HookReply::Path(_)
    ));
    for _ in 0..10 {
        assert!(matches!(create_key(), HookReply::Key(_)));
        thread::sleep(Duration::from_millis(50));
    }
    assert!(!guest.is_released());
    assert!(matches!(
        guest.handle(create("C:\\Temp\\late.txt")).unwrap(),
        HookReply::Path(_)
    ));

    thread::sleep(Duration::from_millis(500));
    assert_eq!(create_key(), HookReply::PassThrough);
    assert_eq!(
        guest.handle(create("C:\\Temp\\later.txt")).unwrap(),
        HookReply::PassThrough
    );
    assert!(guest.is_released());
}

#[test]
fn disconnected_guest_fails_closed() {
    let dir = TempDir::new().unwrap();
    let fs = Arc::new(MemoryFileSystem::new());
    let host = HostContext::open(config(&dir)).unwrap();
    let guest = host.spawn_guest(50, options(&fs)).unwrap();

    assert!(host.guests().retire(50));
    assert!(guest.connection().ping().is_err());
    assert!(matches!(
        guest.handle(create("C:\\Temp\\x.txt")),
        Err(AppError::Provider(ProviderError::Disconnected))
    ));
}

#[test]
fn bad_connection_string_is_fatal_at_startup() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.database.registry = "Table=registry".to_string();
    match HostContext::open(config) {
        Err(AppError::Store(e @ StoreError::InvalidConnectionString { .. })) => {
            assert!(e.is_fatal())
        }
        Err(other) => panic!("unexpected {:?}", other),
        Ok(_) => panic!("host opened with a bad connection string"),
    }
}
