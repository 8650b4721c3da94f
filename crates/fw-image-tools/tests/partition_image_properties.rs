use std::fs;

use fw_image_tools::partition_table::{
    self, BLOCK_SIZE, HEADER_SIZE, PartitionTable, RECORD_SIZE, checksum,
};
use fw_image_tools::{Document, Error, PartitionSpec, Strictness, Unit};

fn le_u32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(b[at..at + 4].try_into().unwrap())
}

fn le_u64(b: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(b[at..at + 8].try_into().unwrap())
}

fn encode_json(src: &str) -> fw_image_tools::Result<Vec<u8>> {
    let doc = Document::from_json_str(src, Strictness::Lenient)?;
    fw_image_tools::encode(&doc)
}

#[test]
fn two_partition_scenario_is_bit_exact() {
    let bytes = encode_json(
        r#"[{"unit": "MB", "partitions": [
            {"name": "boot", "size": "1"},
            {"name": "rootfs", "size": "2", "flags": "no-image"}
        ]}]"#,
    )
    .unwrap();

    assert_eq!(bytes.len(), 132);
    assert_eq!(le_u32(&bytes, 0), 0x5452_4150);
    assert_eq!(le_u32(&bytes, 4), 1);
    assert_eq!(le_u32(&bytes, 12), 512);
    assert_eq!(le_u32(&bytes, 16), 2);

    let boot = &bytes[HEADER_SIZE..HEADER_SIZE + RECORD_SIZE];
    assert_eq!(le_u64(boot, 0), 0);
    assert_eq!(le_u64(boot, 8), 2048);
    assert_eq!(&boot[16..20], b"boot");
    assert!(boot[20..48].iter().all(|&b| b == 0));
    assert_eq!(le_u32(boot, 48), 0);
    assert_eq!(le_u32(boot, 52), 1);

    let rootfs = &bytes[HEADER_SIZE + RECORD_SIZE..];
    assert_eq!(le_u64(rootfs, 0), 2048);
    assert_eq!(le_u64(rootfs, 8), 4096);
    assert_eq!(&rootfs[16..22], b"rootfs");
    assert_eq!(le_u32(rootfs, 52), 0);
}

#[test]
fn output_length_matches_partition_count() {
    for n in 1..=9u64 {
        let parts = (0..n)
            .map(|i| PartitionSpec::new(format!("p{i}"), i * 7))
            .collect();
        let bytes = fw_image_tools::encode(&Document::new(Unit::KiB, parts)).unwrap();
        assert_eq!(bytes.len(), 20 + 56 * n as usize);
    }
}

#[test]
fn starts_are_cumulative() {
    let parts = [3u64, 0, 513, 1, 1024, 77]
        .iter()
        .enumerate()
        .map(|(i, s)| PartitionSpec::new(format!("p{i}"), *s))
        .collect();
    let table = PartitionTable::from_document(&Document::new(Unit::Byte, parts)).unwrap();
    assert_eq!(table.records[0].start, 0);
    for w in table.records.windows(2) {
        assert_eq!(w[1].start, w[0].start + w[0].size);
    }
    assert_eq!(table.records[1].size, 0);
    assert_eq!(table.records[2].size, 2);
}

#[test]
fn header_crc_matches_recomputed_payload_crc() {
    let bytes = encode_json(
        r#"[{"unit": "K"}, {"partitions": [
            {"name": "spl", "size": 256},
            {"name": "env", "size": 64},
            {"name": "data", "size": 0, "flags": "no-image"}
        ]}]"#,
    )
    .unwrap();

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&bytes[12..]);
    assert_eq!(hasher.finalize(), le_u32(&bytes, 8));

    let table = PartitionTable::from_bytes(&bytes).unwrap();
    assert_eq!(
        checksum(BLOCK_SIZE, table.header.count, &table.records),
        table.header.crc32
    );
}

#[test]
fn forty_char_name_keeps_first_31_bytes() {
    let name = "a".repeat(20) + &"b".repeat(20);
    let bytes =
        fw_image_tools::encode(&Document::new(Unit::Byte, vec![PartitionSpec::new(name.clone(), 1)]))
            .unwrap();
    let field = &bytes[HEADER_SIZE + 16..HEADER_SIZE + 48];
    assert_eq!(&field[..31], &name.as_bytes()[..31]);
    assert_eq!(field[31], 0);
}

#[test]
fn no_image_flag_clears_has_image() {
    let table = PartitionTable::from_document(&Document::new(
        Unit::Byte,
        vec![
            PartitionSpec::new("with", 1),
            PartitionSpec::new("without", 1).with_flag("no-image"),
        ],
    ))
    .unwrap();
    assert_eq!(table.records[0].has_image, 1);
    assert_eq!(table.records[1].has_image, 0);
    assert!(table.records.iter().all(|r| r.bootable == 0));
}

#[test]
fn list_flags_need_an_exact_no_image_element() {
    let bytes = encode_json(
        r#"[{"unit": "1M", "partitions": [
            {"name": "a", "size": 1, "flags": ["no-images"]},
            {"name": "b", "size": 1, "flags": ["ro", "no-image"]}
        ]}]"#,
    )
    .unwrap();
    let table = PartitionTable::from_bytes(&bytes).unwrap();
    assert_eq!(table.records[0].has_image, 1);
    assert_eq!(table.records[1].has_image, 0);
    assert_eq!(table.records[0].size, 2048);
}

#[test]
fn unit_resolution() {
    let mib = PartitionSpec::new("a", 1);
    assert_eq!(mib.size_bytes(Unit::parse("MiB").unwrap()), Some(1_048_576));
    let sectors = PartitionSpec::new("b", 2);
    assert_eq!(sectors.size_bytes(Unit::parse("SECTOR").unwrap()), Some(1024));

    let table = PartitionTable::from_document(&Document::new(Unit::Sector, vec![sectors])).unwrap();
    assert_eq!(table.records[0].size, 2);
}

#[test]
fn invalid_unit_writes_nothing() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let json = tmp.path().join("layout.json");
    let out = tmp.path().join("part.img");
    fs::write(
        &json,
        r#"[{"unit": "XYZ", "partitions": [{"name": "a", "size": 1}]}]"#,
    )
    .expect("write json");

    let err = partition_table::encode_file(&json, &out, Strictness::Lenient).unwrap_err();
    assert!(matches!(err, Error::InvalidUnit(_)), "unexpected err: {err}");
    assert!(!out.exists());
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
}

#[test]
fn empty_partitions_rejected() {
    let err = encode_json(r#"[{"unit": "B", "partitions": []}]"#).unwrap_err();
    assert!(matches!(err, Error::MissingPartitions(_)), "unexpected err: {err}");
}

#[test]
fn encode_file_writes_decodable_image() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let json = tmp.path().join("layout.json");
    let out = tmp.path().join("out/part.img");
    fs::write(
        &json,
        r#"[
            {"unit": "sector"},
            {"partitions": [
                {"name": "uboot", "size": "2048"},
                "bogus",
                {"name": "kernel", "size": "bad"},
                {"name": "rootfs", "size": 4096, "flags": "no-image"}
            ]}
        ]"#,
    )
    .expect("write json");

    let written = partition_table::encode_file(&json, &out, Strictness::Lenient).unwrap();
    let bytes = fs::read(&out).expect("read image");
    assert_eq!(bytes.len(), 20 + 56 * 3);

    let decoded = PartitionTable::from_bytes(&bytes).unwrap();
    assert_eq!(decoded, written);
    let names: Vec<_> = decoded.records.iter().map(|r| r.name_str()).collect();
    assert_eq!(names, ["uboot", "kernel", "rootfs"]);
    let spans: Vec<_> = decoded.records.iter().map(|r| (r.start, r.size)).collect();
    assert_eq!(spans, [(0, 2048), (2048, 0), (2048, 4096)]);
}

#[test]
fn strict_mode_refuses_what_lenient_mode_skips() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let json = tmp.path().join("layout.json");
    let out = tmp.path().join("part.img");
    fs::write(
        &json,
        r#"[{"unit": "B", "partitions": [{"name": "a", "size": 1}, null]}]"#,
    )
    .expect("write json");

    let err = partition_table::encode_file(&json, &out, Strictness::Strict).unwrap_err();
    assert!(
        matches!(err, Error::MalformedPartitionEntry { index: 1, .. }),
        "unexpected err: {err}"
    );
    assert!(!out.exists());

    partition_table::encode_file(&json, &out, Strictness::Lenient).unwrap();
    assert_eq!(fs::metadata(&out).unwrap().len(), 76);
}

#[test]
fn missing_layout_file_is_io_error() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let err = partition_table::encode_file(
        &tmp.path().join("nope.json"),
        &tmp.path().join("part.img"),
        Strictness::Lenient,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Io(_)), "unexpected err: {err}");
}
