//! Git packfile (version 2) encoding and decoding
//!
//! Packs are how objects travel over the wire in both directions: a clone
//! receives one, a push sends one. The reader resolves `OFS_DELTA` and
//! `REF_DELTA` entries; the writer emits whole objects only.

use crate::object::{OBJECT_ID_LEN, ObjectId, ObjectKind};
use crate::store::{ObjectStore, StoreError};
use bytes::Bytes;
use flate2::Compression;
use flate2::bufread::ZlibDecoder;
use flate2::write::ZlibEncoder;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{Read, Write};

/// Packfile signature
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";

/// Packfile version
pub const PACK_VERSION: u32 = 2;

const HEADER_LEN: usize = 12;
const TRAILER_LEN: usize = OBJECT_ID_LEN;

const OFS_DELTA: u8 = 6;
const REF_DELTA: u8 = 7;

/// Errors raised while reading or writing packs
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("Pack too short ({0} bytes)")]
    TooShort(usize),

    #[error("Bad pack signature")]
    BadSignature,

    #[error("Unsupported pack version: {0}")]
    UnsupportedVersion(u32),

    #[error("Pack checksum mismatch")]
    ChecksumMismatch,

    #[error("Truncated entry at offset {0}")]
    Truncated(usize),

    #[error("Unknown entry type {code} at offset {offset}")]
    UnknownType { offset: usize, code: u8 },

    #[error("Failed to inflate entry at offset {offset}: {source}")]
    Inflate {
        offset: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Entry at offset {offset} inflated to {actual} bytes, header says {expected}")]
    SizeMismatch {
        offset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Bad delta at offset {offset}: {reason}")]
    Delta { offset: usize, reason: String },

    #[error("Delta base for entry at offset {0} not found")]
    MissingBase(usize),

    #[error("{0} trailing bytes after last entry")]
    TrailingData(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Counters from an unpack
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    pub objects: usize,
    pub deltas: usize,
}

/// Packfile writer
#[derive(Debug, Default)]
pub struct PackWriter {
    objects: Vec<(ObjectKind, Bytes)>,
}

impl PackWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect `ids` from `store` into a writer
    pub fn from_store(store: &ObjectStore, ids: &[ObjectId]) -> Result<Self, PackError> {
        let mut writer = Self::new();
        for id in ids {
            let object = store.get(id)?;
            writer.add_object(object.kind, object.data.clone());
        }
        Ok(writer)
    }

    /// Add object to pack
    pub fn add_object(&mut self, kind: ObjectKind, data: Bytes) {
        self.objects.push((kind, data));
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Encode the pack with its trailing checksum
    pub fn finish(self) -> Result<Bytes, PackError> {
        let mut out = Vec::new();
        out.extend_from_slice(PACK_SIGNATURE);
        out.extend_from_slice(&PACK_VERSION.to_be_bytes());
        out.extend_from_slice(&(self.objects.len() as u32).to_be_bytes());

        for (kind, data) in &self.objects {
            write_entry_header(&mut out, kind.type_code(), data.len());
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            out.extend_from_slice(&encoder.finish()?);
        }

        let checksum = Sha1::digest(&out);
        out.extend_from_slice(&checksum);
        Ok(Bytes::from(out))
    }
}

fn write_entry_header(out: &mut Vec<u8>, type_code: u8, size: usize) {
    let mut size = size;
    let mut byte = (type_code << 4) | (size & 0x0f) as u8;
    size >>= 4;
    while size > 0 {
        out.push(byte | 0x80);
        byte = (size & 0x7f) as u8;
        size >>= 7;
    }
    out.push(byte);
}

enum EntryBody {
    Whole(ObjectKind),
    OfsDelta(usize),
    RefDelta(ObjectId),
}

struct PackEntry {
    offset: usize,
    body: EntryBody,
    data: Vec<u8>,
}

/// Parse `data` as a pack and add every object to `store`.
///
/// `REF_DELTA` bases may already live in `store` (thin packs). On error the
/// store may hold some of the pack's objects; callers that need all-or-nothing
/// unpack into a scratch store.
pub fn unpack(data: &[u8], store: &mut ObjectStore) -> Result<UnpackSummary, PackError> {
    let entries = parse_entries(data)?;
    let mut summary = UnpackSummary::default();
    let mut resolved: HashMap<usize, (ObjectKind, ObjectId)> = HashMap::new();
    let mut pending: Vec<PackEntry> = Vec::new();

    for entry in entries {
        match entry.body {
            EntryBody::Whole(kind) => {
                let id = store.insert(kind, entry.data);
                resolved.insert(entry.offset, (kind, id));
                summary.objects += 1;
            }
            _ => pending.push(entry),
        }
    }

    while !pending.is_empty() {
        let before = pending.len();
        let mut still_pending = Vec::new();

        for entry in pending {
            let base = match &entry.body {
                EntryBody::OfsDelta(base_offset) => resolved.get(base_offset).copied(),
                EntryBody::RefDelta(base_id) => store.get(base_id).ok().map(|o| (o.kind, *base_id)),
                EntryBody::Whole(_) => None,
            };
            let Some((kind, base_id)) = base else {
                still_pending.push(entry);
                continue;
            };

            let base_data = store.get(&base_id)?.data.clone();
            let target = apply_delta(&base_data, &entry.data).map_err(|reason| PackError::Delta {
                offset: entry.offset,
                reason,
            })?;
            let id = store.insert(kind, target);
            resolved.insert(entry.offset, (kind, id));
            summary.objects += 1;
            summary.deltas += 1;
        }

        if still_pending.len() == before {
            return Err(PackError::MissingBase(still_pending[0].offset));
        }
        pending = still_pending;
    }

    tracing::debug!(
        "Unpacked {} objects ({} deltas) from {} byte pack",
        summary.objects,
        summary.deltas,
        data.len()
    );
    Ok(summary)
}

fn parse_entries(data: &[u8]) -> Result<Vec<PackEntry>, PackError> {
    if data.len() < HEADER_LEN + TRAILER_LEN {
        return Err(PackError::TooShort(data.len()));
    }
    if &data[..4] != PACK_SIGNATURE {
        return Err(PackError::BadSignature);
    }
    let version = read_u32(data, 4);
    if version != 2 && version != 3 {
        return Err(PackError::UnsupportedVersion(version));
    }
    let count = read_u32(data, 8) as usize;

    let body_end = data.len() - TRAILER_LEN;
    if Sha1::digest(&data[..body_end]).as_slice() != &data[body_end..] {
        return Err(PackError::ChecksumMismatch);
    }
    let body = &data[..body_end];

    let mut entries = Vec::with_capacity(count.min(body.len()));
    let mut pos = HEADER_LEN;

    for _ in 0..count {
        let offset = pos;
        let (type_code, size, next) = read_entry_header(body, pos)?;
        pos = next;

        let entry_body = match type_code {
            OFS_DELTA => {
                let (distance, next) = read_ofs_distance(body, pos)?;
                pos = next;
                let base = offset.checked_sub(distance).ok_or(PackError::Delta {
                    offset,
                    reason: format!("base distance {} before start of pack", distance),
                })?;
                EntryBody::OfsDelta(base)
            }
            REF_DELTA => {
                let end = pos + OBJECT_ID_LEN;
                if end > body.len() {
                    return Err(PackError::Truncated(offset));
                }
                let id = ObjectId::from_slice(&body[pos..end]).map_err(|_| PackError::Truncated(offset))?;
                pos = end;
                EntryBody::RefDelta(id)
            }
            code => EntryBody::Whole(
                ObjectKind::from_type_code(code).ok_or(PackError::UnknownType { offset, code })?,
            ),
        };

        let (inflated, consumed) = inflate(&body[pos..], offset, size)?;
        pos += consumed;
        entries.push(PackEntry {
            offset,
            body: entry_body,
            data: inflated,
        });
    }

    if pos != body.len() {
        return Err(PackError::TrailingData(body.len() - pos));
    }
    Ok(entries)
}

fn read_u32(data: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn read_entry_header(data: &[u8], start: usize) -> Result<(u8, usize, usize), PackError> {
    let mut pos = start;
    let mut byte = *data.get(pos).ok_or(PackError::Truncated(start))?;
    pos += 1;

    let type_code = (byte >> 4) & 0x07;
    let mut size = (byte & 0x0f) as usize;
    let mut shift = 4;
    while byte & 0x80 != 0 {
        byte = *data.get(pos).ok_or(PackError::Truncated(start))?;
        pos += 1;
        if shift > 57 {
            return Err(PackError::Truncated(start));
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
    }
    Ok((type_code, size, pos))
}

fn read_ofs_distance(data: &[u8], start: usize) -> Result<(usize, usize), PackError> {
    let mut pos = start;
    let mut byte = *data.get(pos).ok_or(PackError::Truncated(start))?;
    pos += 1;

    let mut distance = (byte & 0x7f) as usize;
    while byte & 0x80 != 0 {
        byte = *data.get(pos).ok_or(PackError::Truncated(start))?;
        pos += 1;
        distance = distance
            .checked_add(1)
            .and_then(|d| d.checked_mul(128))
            .ok_or(PackError::Truncated(start))?
            | (byte & 0x7f) as usize;
    }
    Ok((distance, pos))
}

fn inflate(data: &[u8], offset: usize, expected: usize) -> Result<(Vec<u8>, usize), PackError> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::with_capacity(expected.min(data.len().saturating_mul(8)));
    decoder
        .read_to_end(&mut out)
        .map_err(|source| PackError::Inflate { offset, source })?;

    if out.len() != expected {
        return Err(PackError::SizeMismatch {
            offset,
            expected,
            actual: out.len(),
        });
    }
    Ok((out, decoder.total_in() as usize))
}

fn read_delta_size(delta: &[u8], pos: &mut usize) -> Result<usize, String> {
    let mut size = 0usize;
    let mut shift = 0;
    loop {
        let byte = *delta.get(*pos).ok_or("truncated size")?;
        *pos += 1;
        if shift > 57 {
            return Err("size overflow".to_string());
        }
        size |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(size);
        }
    }
}

/// Apply a Git delta to `base`
pub fn apply_delta(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, String> {
    let mut pos = 0;
    let source_size = read_delta_size(delta, &mut pos)?;
    if source_size != base.len() {
        return Err(format!("base is {} bytes, delta expects {}", base.len(), source_size));
    }
    let target_size = read_delta_size(delta, &mut pos)?;
    let mut out = Vec::with_capacity(target_size.min(delta.len().saturating_mul(64) + base.len()));

    while pos < delta.len() {
        let cmd = delta[pos];
        pos += 1;

        if cmd & 0x80 != 0 {
            let mut copy_offset = 0usize;
            let mut copy_size = 0usize;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    copy_offset |= (*delta.get(pos).ok_or("truncated copy offset")? as usize) << (8 * i);
                    pos += 1;
                }
            }
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    copy_size |= (*delta.get(pos).ok_or("truncated copy size")? as usize) << (8 * i);
                    pos += 1;
                }
            }
            if copy_size == 0 {
                copy_size = 0x10000;
            }
            let end = copy_offset
                .checked_add(copy_size)
                .filter(|end| *end <= base.len())
                .ok_or("copy outside base")?;
            out.extend_from_slice(&base[copy_offset..end]);
        } else if cmd != 0 {
            let end = pos + cmd as usize;
            if end > delta.len() {
                return Err("truncated insert".to_string());
            }
            out.extend_from_slice(&delta[pos..end]);
            pos = end;
        } else {
            return Err("reserved opcode 0".to_string());
        }
    }

    if out.len() != target_size {
        return Err(format!("produced {} bytes, expected {}", out.len(), target_size));
    }
    Ok(out)
}
