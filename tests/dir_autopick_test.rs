use std::fs;

use gcpack::dir_pack::{pack_dir, unpack_dir, PackOptions};
use gcpack::dir_spec::load_dir_pipeline_spec;
use gcpack::gca::GcaReader;
use gcpack::verify::verify_packed_dir;

/// Dataset where many files share the same line templates with varying
/// numeric fields, so the shared template dictionary pays off.
fn write_invoice_like(dir: &std::path::Path, n_files: usize, n_lines: usize) {
    fs::create_dir_all(dir).unwrap();
    for i in 0..n_files {
        let day = 10 + (i % 9);
        let inv = 2000 + i;
        let mut out = String::new();
        out.push_str(&format!("FATTURA {}\n", inv));
        out.push_str(&format!("DATA 2026-01-{:02}\n", day));
        out.push_str("CLIENTE ACME SRL\n");
        out.push_str("P.IVA 01234567890\n");
        for j in 0..n_lines {
            let qta = (j % 9) + 1;
            let prezzo = 0.75 + (j % 7) as f64 * 0.10;
            let tot = qta as f64 * prezzo;
            out.push_str(&format!(
                "RIGA ARTICOLO: vite M3 QTA {} PREZZO {:.2} TOT {:.2}\n",
                qta, prezzo, tot
            ));
        }
        out.push_str(&format!("CODICE LOTTO 202601{:02}\n", day));
        fs::write(dir.join(format!("fattura_{:02}.txt", i)), out).unwrap();
    }
}

#[test]
fn autopick_with_restricted_pool_uses_tpl_shared_and_registers_the_dict() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    write_invoice_like(&in_dir, 24, 40);

    let spec = load_dir_pipeline_spec(
        r#"{
            "spec": "gcc-ocf.dir_pipeline.v1",
            "buckets": 1,
            "archive": true,
            "autopick": {"enabled": true, "sample_n": 4, "top_k": 2, "refresh_top": true},
            "candidate_pools": {
                "mixed_text_nums": [
                    {"layer": "tpl_lines_shared_v0", "codec": "zlib", "note": "tpl-shared"},
                    {"layer": "tpl_lines_v0", "codec": "zlib", "note": "tpl-v0"}
                ],
                "textish": [
                    {"layer": "tpl_lines_shared_v0", "codec": "zlib", "note": "tpl-shared"},
                    {"layer": "tpl_lines_v0", "codec": "zlib", "note": "tpl-v0"}
                ]
            },
            "resources": {
                "tpl_dict_v0": {"enabled": true, "k": 128},
                "num_dict_v1": {"enabled": true, "k": 64}
            }
        }"#,
    )
    .unwrap();

    let out_dir = tmp.path().join("out");
    let opts = PackOptions { buckets: Some(1), spec: Some(spec), ..Default::default() };
    pack_dir(&in_dir, &out_dir, &opts).unwrap();

    // Report must exist and name the shared-template plan.
    let report: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(out_dir.join("autopick_report.json")).unwrap(),
    )
    .unwrap();
    let b0 = &report["buckets"]["00"];
    assert_eq!(b0["chosen"]["layer_id"], "tpl_lines_shared_v0");

    // The archive carries the template dictionary resource.
    let mut reader = GcaReader::open(&out_dir.join("bucket_00.gca")).unwrap();
    let resources = reader.load_resources().unwrap();
    assert!(resources.iter().any(|(name, _, _)| name == "tpl_dict_v0"));

    // Verify (light + full, resource presence included) and roundtrip.
    verify_packed_dir(&out_dir, false).unwrap();
    verify_packed_dir(&out_dir, true).unwrap();

    let back = tmp.path().join("back");
    unpack_dir(&out_dir, &back).unwrap();
    for i in 0..24 {
        let rel = format!("fattura_{:02}.txt", i);
        assert_eq!(
            fs::read(in_dir.join(&rel)).unwrap(),
            fs::read(back.join(&rel)).unwrap(),
            "mismatch for {}",
            rel
        );
    }
}

#[test]
fn shared_dict_beats_plain_templates_on_this_corpus() {
    let tmp = tempfile::tempdir().unwrap();
    let in_dir = tmp.path().join("in");
    write_invoice_like(&in_dir, 24, 40);

    let pick = |pool: &str| -> u64 {
        let spec = load_dir_pipeline_spec(&format!(
            r#"{{
                "spec": "gcc-ocf.dir_pipeline.v1",
                "buckets": 1,
                "autopick": {{"enabled": true, "sample_n": 4, "refresh_top": true}},
                "candidate_pools": {{
                    "mixed_text_nums": [{pool}],
                    "textish": [{pool}]
                }},
                "resources": {{"tpl_dict_v0": {{"enabled": true, "k": 128}}}}
            }}"#,
        ))
        .unwrap();
        let out = tempfile::tempdir().unwrap();
        pack_dir(
            &in_dir,
            out.path(),
            &PackOptions { buckets: Some(1), spec: Some(spec), ..Default::default() },
        )
        .unwrap();
        fs::metadata(out.path().join("bucket_00.gca")).unwrap().len()
    };

    let shared = pick(r#"{"layer": "tpl_lines_shared_v0", "codec": "zlib"}"#);
    let plain = pick(r#"{"layer": "tpl_lines_v0", "codec": "zlib"}"#);
    // The shared dictionary moves the per-file template tables into one
    // archive-level resource; on a template-dense corpus that must win even
    // accounting for the resource blob itself.
    assert!(
        shared < plain,
        "shared={} bytes should beat plain={} bytes",
        shared,
        plain
    );
}
