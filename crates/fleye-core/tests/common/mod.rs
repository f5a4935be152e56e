//! Synthetic capture builders shared by the integration tests.
//!
//! Frames follow the default FlEye layout: 12-byte header, sequence id, tag
//! switch, spacer, 192 shuffled pixel readings, spacer, two checksummed
//! auxiliary sub-blocks, zero padding and a 16-byte footer.

#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

pub const FRAME_LEN: usize = 1024;
pub const MARKER_LEN: usize = 512;
pub const HEADER: [u8; 12] = [0xBF; 12];
pub const FOOTER: [u8; 16] = [0xEF; 16];
pub const RUN_START: u8 = 0xBB;
pub const RUN_END: u8 = 0xEB;

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// One complete frame, header and footer included
pub fn frame(rng: &mut StdRng, sequence: u32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_LEN);
    frame.extend_from_slice(&HEADER);
    frame.extend_from_slice(&sequence.to_be_bytes());

    let tag = if rng.random_bool(0.5) { 0xFF } else { 0x0F };
    frame.extend_from_slice(&[tag; 16]);
    frame.extend_from_slice(&[0x00; 16]);

    let mut ids: Vec<u8> = (0..192).collect();
    ids.shuffle(rng);
    for id in ids {
        frame.push(id);
        for _ in 0..3 {
            frame.push(rng.random());
        }
    }
    frame.extend_from_slice(&[0x00; 16]);

    for _ in 0..2 {
        let block: Vec<u8> = (0..18).map(|_| rng.random()).collect();
        let sum: u16 = block.iter().map(|&b| u16::from(b)).sum();
        frame.extend_from_slice(&block);
        frame.extend_from_slice(&sum.to_be_bytes());
    }

    frame.extend_from_slice(&[0x00; 8 * 17]);
    frame.extend_from_slice(&FOOTER);
    assert_eq!(frame.len(), FRAME_LEN);
    frame
}

/// A session: run-start block, `frames` frames numbered from 0, run-end block
pub fn session(rng: &mut StdRng, frames: u32) -> Vec<u8> {
    let mut data = vec![RUN_START; MARKER_LEN];
    for sequence in 0..frames {
        data.extend(frame(rng, sequence));
    }
    data.extend(std::iter::repeat(RUN_END).take(MARKER_LEN));
    data
}

/// Concatenation of `sessions` sessions of `frames` frames each
pub fn capture(seed: u64, sessions: usize, frames: u32) -> Vec<u8> {
    let mut rng = rng(seed);
    (0..sessions).flat_map(|_| session(&mut rng, frames)).collect()
}

/// Byte length of one synthetic session
pub fn session_len(frames: u32) -> u64 {
    (2 * MARKER_LEN + frames as usize * FRAME_LEN) as u64
}

/// Offset of the header of frame `index` inside session `session`
pub fn frame_offset(session: usize, index: usize, frames: u32) -> usize {
    session * session_len(frames) as usize + MARKER_LEN + index * FRAME_LEN
}

pub fn write_capture(dir: &Path, name: &str, data: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, data).unwrap();
    path
}

/// Session id and sequence id of an output record
pub fn record_ids(record: &[u8]) -> (u32, u32) {
    let session = u32::from_be_bytes(record[0..4].try_into().unwrap());
    let sequence = u32::from_be_bytes(record[4..8].try_into().unwrap());
    (session, sequence)
}
