use gcpack::codecs::CodecId;
use gcpack::container::{pack_container_v6, unpack_container_v6};
use gcpack::layers::{LayerEnv, LayerId};
use gcpack::legacy::decompress_any;
use gcpack::pipeline::{run_pipeline, PipelineSpec};

// ---------- helpers ----------

fn corpus() -> Vec<Vec<u8>> {
    vec![
        Vec::new(),
        b"abc".to_vec(),
        b"abc123def0xyz".to_vec(),
        b"plain words, no figures at all\n".to_vec(),
        b"FATTURA 2041\nDATA 2026-01-12\nRIGA vite M3 QTA 4 PREZZO 0.95\nRIGA dado M3 QTA 12 PREZZO 0.10\nTOTALE 5.00\n".to_vec(),
        b"id=007;id=008;id=0;serial 000123\n".to_vec(),
        "qualità è già un po' più\n".repeat(20).into_bytes(),
    ]
}

fn roundtrip(layer: LayerId, codec: CodecId, data: &[u8]) {
    let spec = PipelineSpec::new(layer, codec);
    let env = LayerEnv::default();
    let blob = run_pipeline(&spec, data, &env)
        .unwrap_or_else(|e| panic!("compress {}+{}: {}", layer.name(), codec.name(), e));
    let back = decompress_any(&blob, &env)
        .unwrap_or_else(|e| panic!("decompress {}+{}: {}", layer.name(), codec.name(), e));
    assert_eq!(back, data, "roundtrip {}+{}", layer.name(), codec.name());
}

// ---------- tests ----------

#[test]
fn every_layer_roundtrips_with_default_codec() {
    for data in corpus() {
        for layer in [
            LayerId::Bytes,
            LayerId::SyllablesIt,
            LayerId::WordsIt,
            LayerId::Vc0,
            LayerId::LinesDict,
            LayerId::LinesRle,
            LayerId::SplitTextNums,
            LayerId::TplLinesV0,
            LayerId::TplLinesSharedV0,
        ] {
            roundtrip(layer, CodecId::Zlib, &data);
        }
    }
}

#[test]
fn bytes_layer_roundtrips_under_every_byte_codec() {
    for data in corpus() {
        for codec in [
            CodecId::Raw,
            CodecId::Zlib,
            CodecId::Zstd,
            CodecId::ZstdTight,
            CodecId::Huffman,
        ] {
            roundtrip(LayerId::Bytes, codec, &data);
        }
    }
}

#[test]
fn binary_input_survives_binary_safe_layers() {
    let data: Vec<u8> = (0..=255u8).cycle().take(3000).collect();
    for layer in [LayerId::Bytes, LayerId::Vc0, LayerId::LinesDict, LayerId::LinesRle] {
        roundtrip(layer, CodecId::Zstd, &data);
    }
}

#[test]
fn header_tuple_survives_for_every_layer_codec_pair() {
    for layer_code in 0..=8u8 {
        for codec_code in 0..=7u8 {
            let layer = LayerId::from_code(layer_code).unwrap();
            let codec = CodecId::from_code(codec_code).unwrap();
            for meta in [&b""[..], &b"\x01\x01"[..]] {
                let blob = pack_container_v6(b"payload", layer, codec, meta, false);
                let h = unpack_container_v6(&blob).unwrap();
                assert_eq!(h.layer, layer);
                assert_eq!(h.codec, codec);
                assert_eq!(h.meta, meta);
                assert_eq!(h.payload, b"payload");
                assert!(!h.is_extract);
            }
        }
    }
}

#[test]
fn extract_flag_survives_framing_and_blocks_decode() {
    let blob = pack_container_v6(b"lossy", LayerId::Bytes, CodecId::Raw, &[], true);
    let h = unpack_container_v6(&blob).unwrap();
    assert!(h.is_extract);
    assert!(decompress_any(&blob, &LayerEnv::default()).is_err());
}

#[test]
fn reference_header_for_split_text_nums_mbn() {
    // (layer_code=6, codec_code=4, empty meta) => 47 43 43 06 00 06 04
    let spec = PipelineSpec::new(LayerId::SplitTextNums, CodecId::Zlib);
    let blob = run_pipeline(&spec, b"abc123", &LayerEnv::default()).unwrap();
    assert_eq!(&blob[..7], &[0x47, 0x43, 0x43, 0x06, 0x00, 0x06, 0x04]);
    assert_eq!(&blob[7..10], b"MBN");
}
