//! Release archive packing and unpacking.

use stevedore::archive::{is_archive_path, pack, unpack};
use stevedore::Error;

const MANIFEST: &[u8] = b"namespace: web\ncontainers:\n  app:\n    image: myapp:1\n";

#[test]
fn round_trips_manifest_and_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("release.tar");

    let artifacts = vec![
        ("build.yml".to_string(), b"version: 1.4\n".to_vec()),
        ("extra.bin".to_string(), vec![0u8, 159, 146, 150]),
    ];
    pack(MANIFEST, &artifacts, &path).unwrap();

    let release = unpack(&path).unwrap();
    assert_eq!(release.manifest, MANIFEST);
    assert_eq!(release.artifacts.len(), 2);
    assert_eq!(release.artifacts[0].0, "build.yml");
    assert_eq!(release.artifacts[1].1, vec![0u8, 159, 146, 150]);
}

#[test]
fn gzip_archives_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("release.tar.gz");

    pack(MANIFEST, &[], &path).unwrap();
    let release = unpack(&path).unwrap();
    assert_eq!(release.manifest, MANIFEST);
    assert!(release.artifacts.is_empty());
}

#[test]
fn later_artifacts_override_earlier_variables() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("release.tar");

    let artifacts = vec![
        ("first.yml".to_string(), b"version: 1.0\nregion: eu\n".to_vec()),
        ("second.yml".to_string(), b"version: 2.0\n".to_vec()),
    ];
    pack(MANIFEST, &artifacts, &path).unwrap();

    let vars = unpack(&path).unwrap().artifact_vars();
    assert_eq!(vars["version"], "2.0");
    assert_eq!(vars["region"], "eu");
}

#[test]
fn non_key_value_artifacts_contribute_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("release.tar");

    let artifacts = vec![
        ("notes.txt".to_string(), b"- just\n- a list\n".to_vec()),
        ("binary.dat".to_string(), vec![0xff, 0xfe]),
        ("vars.yml".to_string(), b"version: 3\n".to_vec()),
    ];
    pack(MANIFEST, &artifacts, &path).unwrap();

    let vars = unpack(&path).unwrap().artifact_vars();
    assert_eq!(vars.len(), 1);
    assert_eq!(vars["version"], "3");
}

#[test]
fn missing_manifest_member_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.tar");

    // A tar with only an artifact and no compose.yml.
    let file = std::fs::File::create(&path).unwrap();
    let mut builder = tar::Builder::new(file);
    let data = b"version: 1\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "artifacts/vars.yml", data.as_slice())
        .unwrap();
    builder.finish().unwrap();

    let err = unpack(&path).unwrap_err();
    assert!(matches!(err, Error::InvalidArchive { .. }), "got {err:?}");
}

#[test]
fn archive_paths_are_detected_by_extension() {
    use std::path::Path;
    assert!(is_archive_path(Path::new("release.tar")));
    assert!(is_archive_path(Path::new("release.tar.gz")));
    assert!(is_archive_path(Path::new("release.tgz")));
    assert!(!is_archive_path(Path::new("compose.yml")));
}
