//! BSDIFF40 patch generation.
//!
//! Matching is block based: every aligned `BLOCK`-byte window of the old file is
//! indexed, the new file is scanned byte by byte for a window hit, and hits are
//! extended forward as far as the bytes agree. Matched runs become `add` runs of zero
//! diff bytes, unmatched bytes go to the extra block. Output is accepted by any
//! bspatch, including [`crate::bspatch::apply`].

use crate::bspatch::{offtout, MAGIC};
use bzip2::write::BzEncoder;
use bzip2::Compression;
use std::collections::HashMap;
use std::io::{self, Write};

const BLOCK: usize = 32;

/// Produce a patch turning `old` into `new`.
pub fn diff(old: &[u8], new: &[u8]) -> io::Result<Vec<u8>> {
    let mut index: HashMap<&[u8], usize> = HashMap::new();
    for (i, w) in old.chunks_exact(BLOCK).enumerate() {
        index.entry(w).or_insert(i * BLOCK);
    }

    let mut ctrl: Vec<(i64, i64, i64)> = Vec::new();
    let mut diff_block: Vec<u8> = Vec::new();
    let mut extra: Vec<u8> = Vec::new();

    // Triple under construction: (add, copy); its seek is known once the next match
    // (or the end) is found.
    let mut cur_add = 0i64;
    let mut old_cursor = 0i64;
    let mut lit_start = 0usize;
    let mut pos = 0usize;
    while pos + BLOCK <= new.len() {
        let Some(&m) = index.get(&new[pos..pos + BLOCK]) else {
            pos += 1;
            continue;
        };
        let mut n = BLOCK;
        while pos + n < new.len() && m + n < old.len() && new[pos + n] == old[m + n] {
            n += 1;
        }
        extra.extend_from_slice(&new[lit_start..pos]);
        ctrl.push((cur_add, (pos - lit_start) as i64, m as i64 - old_cursor));
        diff_block.resize(diff_block.len() + n, 0);
        cur_add = n as i64;
        old_cursor = (m + n) as i64;
        pos += n;
        lit_start = pos;
    }
    extra.extend_from_slice(&new[lit_start..]);
    ctrl.push((cur_add, (new.len() - lit_start) as i64, 0));

    let mut ctrl_raw = Vec::with_capacity(ctrl.len() * 24);
    for (a, c, s) in &ctrl {
        ctrl_raw.extend_from_slice(&offtout(*a));
        ctrl_raw.extend_from_slice(&offtout(*c));
        ctrl_raw.extend_from_slice(&offtout(*s));
    }
    let ctrl_z = bz(&ctrl_raw)?;
    let diff_z = bz(&diff_block)?;
    let extra_z = bz(&extra)?;

    let mut out = Vec::with_capacity(32 + ctrl_z.len() + diff_z.len() + extra_z.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&offtout(ctrl_z.len() as i64));
    out.extend_from_slice(&offtout(diff_z.len() as i64));
    out.extend_from_slice(&offtout(new.len() as i64));
    out.extend_from_slice(&ctrl_z);
    out.extend_from_slice(&diff_z);
    out.extend_from_slice(&extra_z);
    Ok(out)
}

fn bz(data: &[u8]) -> io::Result<Vec<u8>> {
    let mut enc = BzEncoder::new(Vec::new(), Compression::best());
    enc.write_all(data)?;
    enc.finish()
}
