#![forbid(unsafe_code)]

use flatfs_core::{ROOT_PATH, Volume};
use flatfs_error::FlatFsError;
use flatfs_types::IMAGE_SIZE;

#[test]
fn save_and_mount_round_trip_preserves_volume_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("disk.img");

    let mut volume = Volume::format().expect("format");
    volume.touch("notes").expect("touch notes");
    volume.echo("notes", b"remember the milk").expect("echo");
    volume.touch("empty").expect("touch empty");
    volume.save_to(&path).expect("save");

    let bytes = std::fs::read(&path).expect("read image");
    assert_eq!(bytes.len(), IMAGE_SIZE);
    assert_eq!(bytes, volume.as_bytes());

    let mounted = Volume::mount(bytes).expect("mount");
    let names: Vec<String> = mounted
        .ls(ROOT_PATH)
        .expect("ls")
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names, vec!["notes", "empty"]);
    assert_eq!(mounted.cat("notes").expect("cat"), b"remember the milk");
    assert!(mounted.cat("empty").expect("cat empty").is_empty());
    assert_eq!(mounted.free_inode_count(), volume.free_inode_count());
    assert_eq!(mounted.free_block_count(), volume.free_block_count());
}

#[test]
fn open_or_format_creates_then_reopens() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("disk.img");

    // First open: no backing file, so a fresh volume.
    let mut volume = Volume::open_or_format(&path).expect("first open");
    assert!(volume.ls(ROOT_PATH).expect("ls fresh").is_empty());
    volume.touch("kept").expect("touch");
    volume.save_to(&path).expect("save");

    // Second open mounts the saved image.
    let reopened = Volume::open_or_format(&path).expect("second open");
    assert_eq!(reopened.ls("kept").expect("ls kept").len(), 1);
}

#[test]
fn unsaved_mutations_do_not_reach_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("disk.img");

    let mut volume = Volume::format().expect("format");
    volume.touch("saved").expect("touch saved");
    volume.save_to(&path).expect("save");

    volume.touch("lost").expect("touch lost");
    // No save after the second touch.
    let reopened = Volume::open_or_format(&path).expect("reopen");
    assert_eq!(reopened.ls("saved").expect("ls saved").len(), 1);
    assert!(matches!(
        reopened.ls("lost"),
        Err(FlatFsError::NotFound(_))
    ));
}

#[test]
fn mount_rejects_truncated_image_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("disk.img");
    std::fs::write(&path, vec![0u8; IMAGE_SIZE / 2]).expect("write stub");

    assert!(matches!(
        Volume::open_or_format(&path),
        Err(FlatFsError::Format(_))
    ));
}
