mod common;

use common::*;
use quickcheck_macros::quickcheck;
use rsdelta::{read_delta, DEFAULT_CHUNK_SIZE};

#[quickcheck]
fn arbitrary_pairs_roundtrip(basis: Vec<u8>, target: Vec<u8>, chunk: u8) -> bool {
    let chunk_size = chunk as usize % 64 + 1;
    let (_, rebuilt) = roundtrip(&basis[..], &target[..], chunk_size).unwrap();
    rebuilt == target
}

#[quickcheck]
fn related_pairs_roundtrip(basis: Vec<u8>, edits: Vec<(u16, u8)>) -> bool {
    let mut target = basis.clone();
    for &(at, byte) in edits.iter() {
        if target.is_empty() {
            target.push(byte);
        } else {
            let at = at as usize % target.len();
            target.insert(at, byte);
        }
    }
    let (_, rebuilt) = roundtrip(&basis[..], &target[..], 8).unwrap();
    rebuilt == target
}

#[quickcheck]
fn delta_output_matches_target_len(basis: Vec<u8>, target: Vec<u8>) -> bool {
    let signature = sign(&basis[..], 16).unwrap();
    let delta = read_delta(&diff(&target[..], &signature[..]).unwrap()[..]).unwrap();
    delta.target_len() == target.len() as u64
}

#[test]
fn single_byte_change_is_small() {
    let basis = random_bytes(4 * 1024 * 1024);
    let mut target = basis.clone();
    flip_middle(&mut target);

    let (delta, rebuilt) = roundtrip(&basis[..], &target[..], DEFAULT_CHUNK_SIZE).unwrap();
    assert!(rebuilt == target);
    assert!(
        delta.len() < 4 * DEFAULT_CHUNK_SIZE,
        "delta of {} bytes",
        delta.len()
    );
}

#[test]
fn single_byte_insert_is_small() {
    let basis = random_bytes(4 * 1024 * 1024);
    let mut target = basis.clone();
    target.insert(basis.len() / 2 + 5, 0x42);

    let (delta, rebuilt) = roundtrip(&basis[..], &target[..], DEFAULT_CHUNK_SIZE).unwrap();
    assert!(rebuilt == target);
    assert!(
        delta.len() < 4 * DEFAULT_CHUNK_SIZE,
        "delta of {} bytes",
        delta.len()
    );
}
