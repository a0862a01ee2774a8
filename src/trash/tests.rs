use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;

use super::platform::{decode_info_path, encode_info_path, read_info_file, PlatformTrash};
use super::{
    disambiguate_name, restored_sibling, ListFilter, OverwritePolicy, TrashBackend,
    TrashErrorCode,
};

fn uniq_dir(label: &str) -> PathBuf {
    let ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "delguard-trash-test-{label}-{}-{ts}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create test dir");
    dir
}

fn sandbox(label: &str) -> (PathBuf, PlatformTrash) {
    let root = uniq_dir(label);
    let backend =
        PlatformTrash::with_home_trash(root.join("Trash"), Duration::from_secs(60));
    (root, backend)
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    fs::write(path, bytes).expect("write file");
}

#[test]
fn simple_delete_produces_listable_entry_and_exact_trashinfo() {
    let (root, backend) = sandbox("simple");
    let victim = root.join("work").join("a.txt");
    write_file(&victim, b"hello\n");

    let entry = backend.send_to_trash(&victim, None).expect("send");
    assert!(!victim.exists(), "source must be gone");
    assert_eq!(entry.original_path, victim);
    assert_eq!(entry.size, 6);

    let stored = root.join("Trash").join("files").join("a.txt");
    assert_eq!(fs::read(&stored).expect("read stored"), b"hello\n");

    let info = root.join("Trash").join("info").join("a.txt.trashinfo");
    let text = fs::read_to_string(&info).expect("read info");
    assert!(text.starts_with("[Trash Info]\n"));
    assert!(text.contains(&format!("Path={}", encode_info_path(&victim))));
    assert!(text.contains("DeletionDate="));
    let mode = fs::metadata(&info).expect("info meta").permissions().mode();
    assert_eq!(mode & 0o777, 0o600, "trashinfo files are private");

    let listing = backend.list(None).expect("list");
    assert_eq!(listing.entries.len(), 1);
    assert!(listing.warnings.is_empty());
    let listed = &listing.entries[0];
    assert_eq!(listed.original_path, victim);
    let age = Local::now()
        .signed_duration_since(listed.deleted_at)
        .num_seconds();
    assert!(age >= 0 && age <= 1, "deletion time within the last second");
}

#[test]
fn colliding_basenames_get_distinct_slots_and_all_restore() {
    let (root, backend) = sandbox("collide");
    let mut originals = Vec::new();
    for i in 0..10 {
        let victim = root.join(format!("src{i}")).join("report.txt");
        write_file(&victim, format!("payload {i}").as_bytes());
        backend.send_to_trash(&victim, None).expect("send");
        originals.push(victim);
    }

    let listing = backend.list(None).expect("list");
    assert_eq!(listing.entries.len(), 10);
    let mut stored_names: Vec<_> = listing
        .entries
        .iter()
        .map(|e| e.trash_path.file_name().map(|n| n.to_owned()).unwrap())
        .collect();
    stored_names.sort();
    stored_names.dedup();
    assert_eq!(stored_names.len(), 10, "stored basenames must be distinct");

    for entry in &listing.entries {
        backend
            .restore(entry, OverwritePolicy::Abort)
            .expect("restore");
    }
    for (i, original) in originals.iter().enumerate() {
        assert_eq!(
            fs::read_to_string(original).expect("read restored"),
            format!("payload {i}")
        );
    }
    assert!(backend.list(None).expect("relist").entries.is_empty());
}

#[test]
fn restore_with_rename_policy_places_a_sibling() {
    let (root, backend) = sandbox("rename");
    let victim = root.join("docs").join("a.txt");
    write_file(&victim, b"hello\n");
    let entry = backend.send_to_trash(&victim, None).expect("send");

    write_file(&victim, b"different");
    let restored = backend
        .restore(&entry, OverwritePolicy::Rename)
        .expect("restore");
    assert_eq!(restored, root.join("docs").join("a (restored 1).txt"));
    assert_eq!(fs::read(&victim).expect("read new"), b"different");
    assert_eq!(fs::read(&restored).expect("read restored"), b"hello\n");
    assert!(backend.list(None).expect("list").entries.is_empty());
}

#[test]
fn restore_with_abort_policy_reports_target_exists() {
    let (root, backend) = sandbox("abort");
    let victim = root.join("a.txt");
    write_file(&victim, b"one");
    let entry = backend.send_to_trash(&victim, None).expect("send");
    write_file(&victim, b"two");

    let err = backend.restore(&entry, OverwritePolicy::Abort).unwrap_err();
    assert_eq!(err.code(), TrashErrorCode::TargetExists);
    assert_eq!(fs::read(&victim).expect("read"), b"two");
}

#[test]
fn restore_with_overwrite_policy_recycles_the_blocker() {
    let (root, backend) = sandbox("overwrite");
    let victim = root.join("a.txt");
    write_file(&victim, b"original");
    let entry = backend.send_to_trash(&victim, None).expect("send");
    write_file(&victim, b"blocker");

    let restored = backend
        .restore(&entry, OverwritePolicy::Overwrite)
        .expect("restore");
    assert_eq!(restored, victim);
    assert_eq!(fs::read(&victim).expect("read"), b"original");

    let listing = backend.list(None).expect("list");
    assert_eq!(listing.entries.len(), 1, "the blocker went to the trash");
    assert_eq!(listing.entries[0].original_path, victim);
    assert_eq!(
        fs::read(&listing.entries[0].trash_path).expect("read blocker"),
        b"blocker"
    );
}

#[test]
fn restore_recreates_a_missing_parent() {
    let (root, backend) = sandbox("parent");
    let victim = root.join("deep").join("nest").join("a.txt");
    write_file(&victim, b"data");
    let entry = backend.send_to_trash(&victim, None).expect("send");
    fs::remove_dir_all(root.join("deep")).expect("drop parent");

    let restored = backend
        .restore(&entry, OverwritePolicy::Abort)
        .expect("restore");
    assert_eq!(fs::read(restored).expect("read"), b"data");
}

#[test]
fn deleting_inside_the_facility_is_refused() {
    let (root, backend) = sandbox("cycle");
    let victim = root.join("a.txt");
    write_file(&victim, b"x");
    let entry = backend.send_to_trash(&victim, None).expect("send");

    let err = backend.send_to_trash(&entry.trash_path, None).unwrap_err();
    assert_eq!(err.code(), TrashErrorCode::InsideFacility);
    assert!(entry.trash_path.exists());
}

#[test]
fn missing_source_reports_source_missing() {
    let (root, backend) = sandbox("missing");
    let err = backend
        .send_to_trash(&root.join("nope.txt"), None)
        .unwrap_err();
    assert_eq!(err.code(), TrashErrorCode::SourceMissing);
}

#[test]
fn delete_then_lifo_restore_is_byte_identical_with_modes() {
    let (root, backend) = sandbox("reversible");
    let tree = root.join("proj");
    let file_a = tree.join("a.txt");
    let file_b = tree.join("sub").join("b.bin");
    write_file(&file_a, b"alpha");
    write_file(&file_b, &[0u8, 1, 2, 3]);
    fs::set_permissions(&file_a, fs::Permissions::from_mode(0o754)).expect("chmod");

    let first = backend.send_to_trash(&file_a, None).expect("send a");
    let second = backend.send_to_trash(&tree.join("sub"), None).expect("send sub");

    backend
        .restore(&second, OverwritePolicy::Abort)
        .expect("restore sub");
    backend
        .restore(&first, OverwritePolicy::Abort)
        .expect("restore a");

    assert_eq!(fs::read(&file_a).expect("read a"), b"alpha");
    assert_eq!(fs::read(&file_b).expect("read b"), &[0u8, 1, 2, 3]);
    let mode = fs::metadata(&file_a).expect("meta").permissions().mode();
    assert_eq!(mode & 0o777, 0o754, "mode bits survive the round trip");
}

#[test]
fn directory_trees_survive_the_trash_round_trip() {
    let (root, backend) = sandbox("tree");
    let dir = root.join("bundle");
    write_file(&dir.join("one.txt"), b"1");
    write_file(&dir.join("nested").join("two.txt"), b"2");

    let entry = backend.send_to_trash(&dir, None).expect("send");
    assert!(!dir.exists());
    assert_eq!(entry.size, 2);

    backend
        .restore(&entry, OverwritePolicy::Abort)
        .expect("restore");
    assert_eq!(fs::read(dir.join("one.txt")).expect("read"), b"1");
    assert_eq!(
        fs::read(dir.join("nested").join("two.txt")).expect("read"),
        b"2"
    );
}

#[test]
fn malformed_and_unpaired_entries_surface_as_warnings() {
    let (root, backend) = sandbox("tolerant");
    let victim = root.join("good.txt");
    write_file(&victim, b"ok");
    backend.send_to_trash(&victim, None).expect("send");

    let info_dir = root.join("Trash").join("info");
    let files_dir = root.join("Trash").join("files");
    write_file(&info_dir.join("broken.trashinfo"), b"not an ini file");
    write_file(&files_dir.join("orphan.dat"), b"no metadata");

    let listing = backend.list(None).expect("list");
    assert_eq!(listing.entries.len(), 1, "good entry still enumerates");
    assert_eq!(listing.warnings.len(), 2);
}

#[test]
fn metadata_write_failure_rolls_the_data_back() {
    let (root, backend) = sandbox("rollback");
    let trash_root = root.join("Trash");
    fs::create_dir_all(trash_root.join("files")).expect("mk files");
    // `info` as a file makes the metadata write fail after the data moved.
    write_file(&trash_root.join("info"), b"");

    let victim = root.join("a.txt");
    write_file(&victim, b"precious");
    let err = backend.send_to_trash(&victim, None).unwrap_err();
    assert_eq!(err.code(), TrashErrorCode::MetadataWriteFailed);
    assert!(err.rolled_back(), "rollback must be reported");
    assert_eq!(fs::read(&victim).expect("read"), b"precious");
    let leftovers: Vec<_> = fs::read_dir(trash_root.join("files"))
        .expect("read files dir")
        .collect();
    assert!(leftovers.is_empty(), "no partial artifact remains");
}

#[test]
fn injected_copy_failure_leaves_source_intact_and_no_orphan() {
    let (root, backend) = sandbox("atomic");
    let trash_root = root.join("Trash");
    fs::create_dir_all(trash_root.join("files")).expect("mk files");
    fs::create_dir_all(trash_root.join("info")).expect("mk info");

    let victim = root.join("a.txt");
    write_file(&victim, b"survives");

    super::platform::fault::fail_next_copy();
    let err = backend
        .copy_into_facility(&victim, &trash_root.join("files").join("a.txt"))
        .unwrap_err();
    assert_eq!(err.code(), TrashErrorCode::CrossDeviceFallbackFailed);

    assert_eq!(fs::read(&victim).expect("read"), b"survives");
    let leftovers: Vec<_> = fs::read_dir(trash_root.join("files"))
        .expect("read files dir")
        .collect();
    assert!(leftovers.is_empty(), "no orphan in the facility");
    let infos: Vec<_> = fs::read_dir(trash_root.join("info"))
        .expect("read info dir")
        .collect();
    assert!(infos.is_empty(), "no metadata entry");
}

#[test]
fn lock_is_released_after_each_operation() {
    let (root, backend) = sandbox("lock");
    let victim = root.join("a.txt");
    write_file(&victim, b"x");
    backend.send_to_trash(&victim, None).expect("send");
    assert!(
        !root.join("Trash").join("lock").exists(),
        "lock must not outlive the call"
    );
}

#[test]
fn cancellation_before_the_move_leaves_everything_untouched() {
    use std::sync::atomic::AtomicBool;
    let (root, backend) = sandbox("cancel");
    let victim = root.join("a.txt");
    write_file(&victim, b"x");
    let cancel = AtomicBool::new(true);
    let err = backend.send_to_trash(&victim, Some(&cancel)).unwrap_err();
    assert_eq!(err.code(), TrashErrorCode::Cancelled);
    assert!(victim.exists());
}

#[test]
fn info_path_encoding_round_trips_non_utf8_and_spaces() {
    let path = PathBuf::from(OsString::from_vec(vec![
        b'/', b't', b'm', b'p', b'/', b'a', b' ', b'b', b'%', 0xFF,
    ]));
    let encoded = encode_info_path(&path);
    assert_eq!(encoded, "/tmp/a%20b%25%FF");
    assert_eq!(decode_info_path(&encoded).expect("decode"), path);

    let unicode = PathBuf::from("/tmp/résumé ✓.txt");
    let round = decode_info_path(&encode_info_path(&unicode)).expect("decode");
    assert_eq!(round, unicode);
}

#[test]
fn written_trashinfo_reads_back_to_the_exact_original() {
    let (root, backend) = sandbox("fidelity");
    let victim = root.join("dir with spaces").join("naïve ✓.txt");
    write_file(&victim, b"x");
    let entry = backend.send_to_trash(&victim, None).expect("send");

    let (parsed_path, parsed_time) =
        read_info_file(Path::new(&entry.handle)).expect("parse info");
    assert_eq!(parsed_path, victim);
    assert_eq!(
        parsed_time.format("%Y-%m-%dT%H:%M:%S").to_string(),
        entry.deleted_at.format("%Y-%m-%dT%H:%M:%S").to_string()
    );
}

#[test]
fn list_filter_narrows_by_glob_time_and_size() {
    let (root, backend) = sandbox("filter");
    let small = root.join("small.log");
    let big = root.join("big.bin");
    write_file(&small, b"123");
    write_file(&big, &vec![0u8; 4096]);
    backend.send_to_trash(&small, None).expect("send small");
    backend.send_to_trash(&big, None).expect("send big");

    let by_glob = ListFilter::with_name_glob("*.log").expect("glob");
    let listing = backend.list(Some(&by_glob)).expect("list");
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].original_path, small);

    let by_size = ListFilter {
        min_size: Some(1024),
        ..ListFilter::default()
    };
    let listing = backend.list(Some(&by_size)).expect("list");
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].original_path, big);

    let stale_only = ListFilter {
        deleted_before: Some(Local::now() - chrono::Duration::hours(1)),
        ..ListFilter::default()
    };
    assert!(backend
        .list(Some(&stale_only))
        .expect("list")
        .entries
        .is_empty());
}

#[test]
fn disambiguation_appends_timestamp_and_counter() {
    let dir = uniq_dir("names");
    write_file(&dir.join("a.txt"), b"");
    let next = disambiguate_name(&dir, "a.txt", |_| false);
    assert_ne!(next, "a.txt");
    assert!(next.starts_with("a_"), "suffix goes before the extension");
    assert!(next.ends_with(".txt"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn restored_sibling_counts_upward() {
    let dir = uniq_dir("siblings");
    let original = dir.join("a.txt");
    write_file(&original, b"");
    write_file(&dir.join("a (restored 1).txt"), b"");
    let next = restored_sibling(&original);
    assert_eq!(next, dir.join("a (restored 2).txt"));
    let _ = fs::remove_dir_all(&dir);
}
