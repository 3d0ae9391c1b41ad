use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn gcpack() -> Command {
    Command::cargo_bin("gcpack").unwrap()
}

#[test]
fn compress_decompress_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in.txt");
    let packed = tmp.path().join("in.gcc");
    let back = tmp.path().join("back.txt");
    fs::write(&input, "RIGA 1 QTA 10\nRIGA 2 QTA 20\n").unwrap();

    gcpack()
        .args(["compress", input.to_str().unwrap(), "-o", packed.to_str().unwrap()])
        .args(["--layer", "split_text_nums"])
        .args(["--stream-codecs", "TEXT:zlib,NUMS:num_v1"])
        .assert()
        .success();

    gcpack()
        .args(["decompress", packed.to_str().unwrap(), "-o", back.to_str().unwrap()])
        .assert()
        .success();

    assert_eq!(fs::read(&input).unwrap(), fs::read(&back).unwrap());

    gcpack()
        .args(["verify", packed.to_str().unwrap(), "--full"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"));
}

#[test]
fn unknown_layer_exits_with_usage() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in.txt");
    fs::write(&input, "x").unwrap();
    let out = tmp.path().join("out.gcc");

    gcpack()
        .args(["compress", input.to_str().unwrap(), "-o", out.to_str().unwrap()])
        .args(["--layer", "nope"])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn corrupt_container_exits_generic() {
    let tmp = tempfile::tempdir().unwrap();
    let bad = tmp.path().join("bad.gcc");
    fs::write(&bad, b"XXX not a container").unwrap();

    gcpack()
        .args(["verify", bad.to_str().unwrap()])
        .assert()
        .failure()
        .code(10);
}

#[test]
fn future_version_exits_unsupported() {
    let tmp = tempfile::tempdir().unwrap();
    let bad = tmp.path().join("future.gcc");
    let mut blob = b"GCC".to_vec();
    blob.push(9);
    blob.extend_from_slice(&[0; 8]);
    fs::write(&bad, &blob).unwrap();

    gcpack()
        .args(["verify", bad.to_str().unwrap()])
        .assert()
        .failure()
        .code(11);
}

#[test]
fn bundle_pack_refuses_binary_with_exit_2() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    fs::create_dir_all(&in_dir).unwrap();
    fs::write(in_dir.join("ok.txt"), "fine text\n").unwrap();
    fs::write(in_dir.join("bad.bin"), [0u8, 159, 146, 150]).unwrap();
    let out_dir = tmp.path().join("out");

    gcpack()
        .args([
            "bundle",
            "pack",
            in_dir.to_str().unwrap(),
            "-o",
            out_dir.to_str().unwrap(),
        ])
        .assert()
        .failure()
        .code(2);
    assert!(!out_dir.join("bundle.gcc").exists());
}

#[test]
fn dir_workflow_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    fs::create_dir_all(in_dir.join("sub")).unwrap();
    fs::write(in_dir.join("a.txt"), "HELLO 123\n").unwrap();
    fs::write(in_dir.join("sub/b.txt"), "TOTALE 42\nTOTALE 43\n").unwrap();
    let out_dir = tmp.path().join("out");
    let back_dir = tmp.path().join("back");

    gcpack()
        .args([
            "dir",
            "pack",
            in_dir.to_str().unwrap(),
            "-o",
            out_dir.to_str().unwrap(),
            "--buckets",
            "2",
        ])
        .assert()
        .success();

    gcpack()
        .args(["dir", "verify", out_dir.to_str().unwrap(), "--full"])
        .assert()
        .success();

    gcpack()
        .args([
            "dir",
            "unpack",
            out_dir.to_str().unwrap(),
            "-o",
            back_dir.to_str().unwrap(),
        ])
        .assert()
        .success();

    assert_eq!(
        fs::read(in_dir.join("a.txt")).unwrap(),
        fs::read(back_dir.join("a.txt")).unwrap()
    );
    assert_eq!(
        fs::read(in_dir.join("sub/b.txt")).unwrap(),
        fs::read(back_dir.join("sub/b.txt")).unwrap()
    );
}

#[test]
fn dir_verify_reports_hash_mismatch_with_exit_13() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    fs::create_dir_all(&in_dir).unwrap();
    fs::write(in_dir.join("a.txt"), "payload 123\n").unwrap();
    let out_dir = tmp.path().join("out");

    gcpack()
        .args([
            "dir",
            "pack",
            in_dir.to_str().unwrap(),
            "-o",
            out_dir.to_str().unwrap(),
            "--buckets",
            "1",
        ])
        .assert()
        .success();

    let arch = out_dir.join("bucket_00.gca");
    let mut bytes = fs::read(&arch).unwrap();
    bytes[1] ^= 0xFF; // inside the first blob
    fs::write(&arch, &bytes).unwrap();

    gcpack()
        .args(["dir", "verify", out_dir.to_str().unwrap(), "--full"])
        .assert()
        .failure()
        .code(13);
}
