//! Tests for multi-part disk reassembly.
//!
//! Validates strict part ordering, missing-part detection, source
//! preservation, and tolerance for advertised-size mismatches.

use sha2::{Digest, Sha256};
use std::path::Path;
use tempfile::TempDir;
use vmpull::{assemble_parts, DiskPart, Error, FixedMemoryProbe};

const GIB: u64 = 1024 * 1024 * 1024;

fn write_part(dir: &Path, number: u64, content: &[u8]) -> DiskPart {
    let source = dir.join(format!("part-{}", number));
    std::fs::write(&source, content).unwrap();
    DiskPart {
        number,
        source,
    }
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[tokio::test]
async fn test_parts_concatenated_in_number_order() {
    let temp = TempDir::new().unwrap();
    // Deliver the parts out of order; the output must not care.
    let parts = vec![
        write_part(temp.path(), 3, b"ccc"),
        write_part(temp.path(), 1, b"a"),
        write_part(temp.path(), 2, b"bb"),
    ];
    let output = temp.path().join("disk.img");
    let probe = FixedMemoryProbe::new(Some(8 * GIB));

    assemble_parts(&parts, 3, &output, 6, &probe).await.unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), b"abbccc");
}

#[tokio::test]
async fn test_reassembly_is_deterministic_across_permutations() {
    let contents: Vec<Vec<u8>> = (0u8..4)
        .map(|i| vec![i; 10 + i as usize * 20])
        .collect();
    let expected: Vec<u8> = contents.concat();
    let expected_sha = Sha256::digest(&expected);
    let probe = FixedMemoryProbe::new(Some(8 * GIB));

    // A few permutations standing in for arbitrary completion orders.
    for order in [[0usize, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1]] {
        let temp = TempDir::new().unwrap();
        let parts: Vec<DiskPart> = order
            .iter()
            .map(|&i| write_part(temp.path(), i as u64 + 1, &contents[i]))
            .collect();
        let output = temp.path().join("disk.img");

        assemble_parts(&parts, 4, &output, expected.len() as u64, &probe)
            .await
            .unwrap();

        let assembled = std::fs::read(&output).unwrap();
        assert_eq!(Sha256::digest(&assembled)[..], expected_sha[..]);
    }
}

// =============================================================================
// Failure Tests
// =============================================================================

#[tokio::test]
async fn test_missing_part_is_an_error() {
    let temp = TempDir::new().unwrap();
    let parts = vec![
        write_part(temp.path(), 1, b"a"),
        write_part(temp.path(), 3, b"c"),
    ];
    let output = temp.path().join("disk.img");
    let probe = FixedMemoryProbe::new(Some(8 * GIB));

    let result = assemble_parts(&parts, 3, &output, 3, &probe).await;

    match result {
        Err(Error::MissingPart { number }) => assert_eq!(number, 2),
        other => panic!("expected MissingPart, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_size_mismatch_is_tolerated() {
    let temp = TempDir::new().unwrap();
    let parts = vec![write_part(temp.path(), 1, b"only part")];
    let output = temp.path().join("disk.img");
    let probe = FixedMemoryProbe::new(Some(8 * GIB));

    // Parts may advertise compressed sizes; a mismatch only warns.
    assemble_parts(&parts, 1, &output, 9999, &probe).await.unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), b"only part");
}

// =============================================================================
// Source Handling Tests
// =============================================================================

#[tokio::test]
async fn test_sources_are_never_mutated() {
    let temp = TempDir::new().unwrap();
    let parts = vec![
        write_part(temp.path(), 1, b"first"),
        write_part(temp.path(), 2, b"second"),
    ];
    let output = temp.path().join("disk.img");
    let probe = FixedMemoryProbe::new(Some(8 * GIB));

    assemble_parts(&parts, 2, &output, 11, &probe).await.unwrap();

    assert_eq!(std::fs::read(&parts[0].source).unwrap(), b"first");
    assert_eq!(std::fs::read(&parts[1].source).unwrap(), b"second");
}

#[tokio::test]
async fn test_constrained_probe_still_assembles_correctly() {
    let temp = TempDir::new().unwrap();
    let big: Vec<u8> = (0..2 * 1024 * 1024u32).map(|i| (i % 255) as u8).collect();
    let parts = vec![
        write_part(temp.path(), 1, &big),
        write_part(temp.path(), 2, b"tail"),
    ];
    let output = temp.path().join("disk.img");
    // Failed reading: constrained, default chunk size, fsync cadence on.
    let probe = FixedMemoryProbe::new(None);

    assemble_parts(&parts, 2, &output, big.len() as u64 + 4, &probe)
        .await
        .unwrap();

    let assembled = std::fs::read(&output).unwrap();
    assert_eq!(assembled.len(), big.len() + 4);
    assert_eq!(&assembled[..big.len()], &big[..]);
    assert_eq!(&assembled[big.len()..], b"tail");
}
