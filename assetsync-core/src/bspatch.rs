//! BSDIFF40 patch application.
//!
//! Layout: a 32-byte header (`BSDIFF40`, control block length, diff block length,
//! declared new size), then three bzip2 streams: control, diff and extra. The control
//! stream is a sequence of `(add, copy, seek)` triples driving a cursor over the old
//! file: `add` bytes of the diff stream are added bytewise to old bytes at the cursor,
//! `copy` bytes of the extra stream are emitted verbatim, then the cursor moves `seek`
//! bytes (possibly backwards).
//!
//! The output is streamed to a writer. Its correctness is established by the caller
//! hashing that output, never by the declared size.

use crate::error::{SyncError, SyncResult};
use bzip2::read::BzDecoder;
use std::io::{self, Read, Write};

pub const MAGIC: &[u8; 8] = b"BSDIFF40";
pub const HEADER_LEN: usize = 32;

const BUF: usize = 64 * 1024;

/// Decode bsdiff's sign-magnitude little-endian integer.
pub fn offtin(b: [u8; 8]) -> i64 {
    let mag = (u64::from_le_bytes(b) & !(1u64 << 63)) as i64;
    if b[7] & 0x80 != 0 {
        -mag
    } else {
        mag
    }
}

pub fn offtout(x: i64) -> [u8; 8] {
    let mut b = x.unsigned_abs().to_le_bytes();
    if x < 0 {
        b[7] |= 0x80;
    }
    b
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Header {
    pub ctrl_len: u64,
    pub diff_len: u64,
    pub new_size: u64,
}

pub fn read_header(patch: &[u8]) -> SyncResult<Header> {
    if patch.len() < HEADER_LEN {
        return Err(SyncError::PatchFormat(format!("patch is only {} bytes", patch.len())));
    }
    if &patch[..8] != MAGIC {
        return Err(SyncError::PatchFormat("bad magic".into()));
    }
    let field = |i: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&patch[8 + i * 8..16 + i * 8]);
        offtin(b)
    };
    let (ctrl_len, diff_len, new_size) = (field(0), field(1), field(2));
    if ctrl_len < 0 || diff_len < 0 || new_size < 0 {
        return Err(SyncError::PatchFormat("negative length in header".into()));
    }
    let body = (patch.len() - HEADER_LEN) as u64;
    if (ctrl_len as u64).checked_add(diff_len as u64).map_or(true, |n| n > body) {
        return Err(SyncError::PatchFormat("block lengths exceed patch size".into()));
    }
    Ok(Header { ctrl_len: ctrl_len as u64, diff_len: diff_len as u64, new_size: new_size as u64 })
}

/// Apply `patch` to `old`, streaming the result into `out`. Returns bytes written.
pub fn apply<W: Write>(old: &[u8], patch: &[u8], out: &mut W) -> SyncResult<u64> {
    let hdr = read_header(patch)?;
    let ctrl_end = HEADER_LEN + hdr.ctrl_len as usize;
    let diff_end = ctrl_end + hdr.diff_len as usize;
    let mut ctrl = BzDecoder::new(&patch[HEADER_LEN..ctrl_end]);
    let mut diff = BzDecoder::new(&patch[ctrl_end..diff_end]);
    let mut extra = BzDecoder::new(&patch[diff_end..]);

    let old_len = old.len() as u64;
    let mut buf = vec![0u8; BUF];
    let mut new_pos: u64 = 0;
    let mut old_pos: i64 = 0;
    while new_pos < hdr.new_size {
        let mut triple = [0u8; 24];
        read_block(&mut ctrl, &mut triple, "control")?;
        let word = |i: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&triple[i * 8..i * 8 + 8]);
            offtin(b)
        };
        let (add, copy, seek) = (word(0), word(1), word(2));
        if add < 0 || copy < 0 {
            return Err(SyncError::PatchFormat("negative length in control triple".into()));
        }
        let (add, copy) = (add as u64, copy as u64);
        if new_pos.checked_add(add).map_or(true, |n| n > hdr.new_size) {
            return Err(SyncError::PatchFormat("diff run overruns declared size".into()));
        }
        if add > 0 && (old_pos < 0 || (old_pos as u64).checked_add(add).map_or(true, |e| e > old_len))
        {
            return Err(SyncError::PatchRange { old_pos, len: add, old_len });
        }

        let mut remaining = add;
        while remaining > 0 {
            let n = remaining.min(BUF as u64) as usize;
            read_block(&mut diff, &mut buf[..n], "diff")?;
            let base = old_pos as usize;
            for (i, b) in buf[..n].iter_mut().enumerate() {
                *b = b.wrapping_add(old[base + i]);
            }
            write_out(out, &buf[..n])?;
            old_pos += n as i64;
            remaining -= n as u64;
        }
        new_pos += add;

        if new_pos.checked_add(copy).map_or(true, |n| n > hdr.new_size) {
            return Err(SyncError::PatchFormat("extra run overruns declared size".into()));
        }
        let mut remaining = copy;
        while remaining > 0 {
            let n = remaining.min(BUF as u64) as usize;
            read_block(&mut extra, &mut buf[..n], "extra")?;
            write_out(out, &buf[..n])?;
            remaining -= n as u64;
        }
        new_pos += copy;

        old_pos = old_pos
            .checked_add(seek)
            .ok_or_else(|| SyncError::PatchFormat("seek overflows".into()))?;
    }
    Ok(new_pos)
}

/// Apply a patch entirely in memory.
pub fn apply_to_vec(old: &[u8], patch: &[u8]) -> SyncResult<Vec<u8>> {
    let mut out = Vec::new();
    apply(old, patch, &mut out)?;
    Ok(out)
}

fn read_block<R: Read>(r: &mut R, buf: &mut [u8], block: &str) -> SyncResult<()> {
    r.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SyncError::PatchFormat(format!("truncated {block} block")),
        _ => SyncError::PatchFormat(format!("corrupt {block} block: {e}")),
    })
}

fn write_out<W: Write>(out: &mut W, data: &[u8]) -> SyncResult<()> {
    out.write_all(data).map_err(|e| SyncError::io("<patch output>", e))
}
