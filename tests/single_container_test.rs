use std::fs;

use gcpack::error::GcError;
use gcpack::single_dir::{
    is_single_container_dir, is_single_container_mixed_dir, pack_single_dir,
    pack_single_mixed_dir, unpack_single_dir, unpack_single_mixed_dir, verify_single_dir,
    verify_single_mixed_dir,
};

fn write_text_tree(root: &std::path::Path) {
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join("a.txt"), "alpha file with 12 numbers\n").unwrap();
    fs::write(root.join("b.md"), "# notes\n\ntotal 340, rest 12\n").unwrap();
    fs::write(root.join("sub/c.csv"), "qty,price\n4,0.95\n12,0.10\n").unwrap();
}

#[test]
fn text_only_pack_verify_unpack() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    let out_dir = tmp.path().join("out");
    write_text_tree(&in_dir);

    pack_single_dir(&in_dir, &out_dir).unwrap();
    assert!(is_single_container_dir(&out_dir));
    assert!(out_dir.join("bundle.gcc").is_file());
    assert!(out_dir.join("bundle_index.json").is_file());

    verify_single_dir(&out_dir, false).unwrap();
    verify_single_dir(&out_dir, true).unwrap();

    let back = tmp.path().join("back");
    unpack_single_dir(&out_dir, &back).unwrap();
    for rel in ["a.txt", "b.md", "sub/c.csv"] {
        assert_eq!(fs::read(in_dir.join(rel)).unwrap(), fs::read(back.join(rel)).unwrap());
    }
}

#[test]
fn text_only_refuses_binary_input() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    write_text_tree(&in_dir);
    fs::write(in_dir.join("blob.bin"), [0u8, 159, 146, 150]).unwrap();

    let out_dir = tmp.path().join("out");
    match pack_single_dir(&in_dir, &out_dir) {
        Err(GcError::Usage(_)) => {}
        other => panic!("expected Usage error, got {:?}", other.map(|_| ())),
    }
    assert!(!out_dir.join("bundle.gcc").exists());
}

#[test]
fn bundle_index_schema_fields() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    let out_dir = tmp.path().join("out");
    write_text_tree(&in_dir);
    pack_single_dir(&in_dir, &out_dir).unwrap();

    let idx: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out_dir.join("bundle_index.json")).unwrap())
            .unwrap();
    assert_eq!(idx["spec"], "gcc-ocf.dir_bundle_index.v1");
    assert_eq!(idx["kind"], "text");
    assert_eq!(idx["layer_used"], "split_text_nums");
    assert_eq!(idx["stream_codecs_used"], "TEXT:zlib,NUMS:num_v1");
    let files = idx["files"].as_array().unwrap();
    assert_eq!(files.len(), 3);
    // Deterministic lexicographic order by rel.
    let rels: Vec<&str> = files.iter().map(|f| f["rel"].as_str().unwrap()).collect();
    assert_eq!(rels, vec!["a.txt", "b.md", "sub/c.csv"]);
    for f in files {
        assert!(f["sha256"].as_str().unwrap().len() == 64);
    }
}

#[test]
fn mixed_mode_splits_text_and_binary() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    write_text_tree(&in_dir);
    fs::write(in_dir.join("image.raw"), [0u8, 1, 2, 0xFE].repeat(500)).unwrap();

    let out_dir = tmp.path().join("out");
    pack_single_mixed_dir(&in_dir, &out_dir).unwrap();
    assert!(is_single_container_mixed_dir(&out_dir));

    let text_idx: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out_dir.join("bundle_text_index.json")).unwrap(),
    )
    .unwrap();
    let bin_idx: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out_dir.join("bundle_bin_index.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(text_idx["count"], 3);
    assert_eq!(bin_idx["count"], 1);
    assert_eq!(bin_idx["layer_used"], "bytes");
    assert_eq!(bin_idx["codec_used"], "zstd");

    verify_single_mixed_dir(&out_dir, false).unwrap();
    verify_single_mixed_dir(&out_dir, true).unwrap();

    let back = tmp.path().join("back");
    unpack_single_mixed_dir(&out_dir, &back).unwrap();
    for rel in ["a.txt", "b.md", "sub/c.csv", "image.raw"] {
        assert_eq!(fs::read(in_dir.join(rel)).unwrap(), fs::read(back.join(rel)).unwrap());
    }
}

#[test]
fn mixed_full_verify_reports_tamper_as_hash_mismatch() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    write_text_tree(&in_dir);
    fs::write(in_dir.join("blob.bin"), [7u8; 64]).unwrap();

    let out_dir = tmp.path().join("out");
    pack_single_mixed_dir(&in_dir, &out_dir).unwrap();

    // Corrupt the text bundle payload.
    let bundle = out_dir.join("bundle_text.gcc");
    let mut bytes = fs::read(&bundle).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xFF;
    fs::write(&bundle, &bytes).unwrap();

    match verify_single_mixed_dir(&out_dir, true) {
        Err(GcError::HashMismatch(_)) => {}
        other => panic!("expected HashMismatch, got {:?}", other.map(|_| ())),
    }
}
