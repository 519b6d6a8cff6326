//! Codec for the fixed-size V4 training record.

use thiserror::Error;

/// Number of float32 policy entries in a record.
pub const PROBS_LEN: usize = 1858;
/// Byte width of the packed policy vector.
pub const PROBS_BYTES: usize = PROBS_LEN * 4;
/// Byte width of the packed input planes (104 bitboards of 8 bytes each).
pub const PLANES_BYTES: usize = 832;
/// Total byte width of one packed record.
pub const V4_BYTES: usize = 4 + PROBS_BYTES + PLANES_BYTES + 8 + 16;

#[derive(Debug, Error, PartialEq)]
pub enum CodecError {
    #[error("record is {0} bytes, expected {V4_BYTES}")]
    WrongSize(usize),
}

/// One decoded training record.
///
/// The rescorer rewrites `root_q`/`best_q` (and `probs`/`best_d` under
/// multi-node evaluation); every other byte must round-trip untouched.
#[derive(Clone, PartialEq)]
pub struct V4Record {
    pub version: u32,
    pub probs: [u8; PROBS_BYTES],
    pub planes: [u8; PLANES_BYTES],
    pub us_ooo: u8,
    pub us_oo: u8,
    pub them_ooo: u8,
    pub them_oo: u8,
    pub stm: u8,
    pub rule50_count: u8,
    pub move_count: u8,
    pub winner: i8,
    pub root_q: f32,
    pub best_q: f32,
    pub root_d: f32,
    pub best_d: f32,
}

impl V4Record {
    pub fn decode(raw: &[u8]) -> Result<Self, CodecError> {
        if raw.len() != V4_BYTES {
            return Err(CodecError::WrongSize(raw.len()));
        }
        let mut probs = [0u8; PROBS_BYTES];
        probs.copy_from_slice(&raw[4..4 + PROBS_BYTES]);
        let mut planes = [0u8; PLANES_BYTES];
        planes.copy_from_slice(&raw[4 + PROBS_BYTES..4 + PROBS_BYTES + PLANES_BYTES]);
        let tail = &raw[4 + PROBS_BYTES + PLANES_BYTES..];

        Ok(V4Record {
            version: u32::from_le_bytes(raw[0..4].try_into().expect("4 byte slice")),
            probs,
            planes,
            us_ooo: tail[0],
            us_oo: tail[1],
            them_ooo: tail[2],
            them_oo: tail[3],
            stm: tail[4],
            rule50_count: tail[5],
            move_count: tail[6],
            winner: tail[7] as i8,
            root_q: f32::from_le_bytes(tail[8..12].try_into().expect("4 byte slice")),
            best_q: f32::from_le_bytes(tail[12..16].try_into().expect("4 byte slice")),
            root_d: f32::from_le_bytes(tail[16..20].try_into().expect("4 byte slice")),
            best_d: f32::from_le_bytes(tail[20..24].try_into().expect("4 byte slice")),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(V4_BYTES);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.probs);
        out.extend_from_slice(&self.planes);
        out.extend_from_slice(&[
            self.us_ooo,
            self.us_oo,
            self.them_ooo,
            self.them_oo,
            self.stm,
            self.rule50_count,
            self.move_count,
            self.winner as u8,
        ]);
        for field in [self.root_q, self.best_q, self.root_d, self.best_d] {
            out.extend_from_slice(&field.to_le_bytes());
        }
        debug_assert_eq!(out.len(), V4_BYTES);
        out
    }

    /// Policy vector as floats. NaN marks moves that were illegal in the
    /// recorded position.
    pub fn probs(&self) -> Vec<f32> {
        self.probs
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes(c.try_into().expect("4 byte chunk")))
            .collect()
    }

    pub fn set_probs(&mut self, probs: &[f32]) {
        debug_assert_eq!(probs.len(), PROBS_LEN);
        for (slot, value) in self.probs.chunks_exact_mut(4).zip(probs) {
            slot.copy_from_slice(&value.to_le_bytes());
        }
    }
}

impl std::fmt::Debug for V4Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4Record")
            .field("version", &self.version)
            .field("stm", &self.stm)
            .field("rule50_count", &self.rule50_count)
            .field("move_count", &self.move_count)
            .field("winner", &self.winner)
            .field("root_q", &self.root_q)
            .field("best_q", &self.best_q)
            .field("root_d", &self.root_d)
            .field("best_d", &self.best_d)
            .finish_non_exhaustive()
    }
}

/// Iterate the records of a decompressed game stream. A trailing partial
/// window is treated as end of stream and dropped.
pub fn records(data: &[u8]) -> impl Iterator<Item = V4Record> + '_ {
    data.chunks_exact(V4_BYTES)
        .map(|chunk| V4Record::decode(chunk).expect("chunks_exact yields full windows"))
}

/// Index of the largest non-NaN entry, first occurrence winning ties.
pub fn nanargmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, max)) if *v <= max => {}
            _ => best = Some((i, *v)),
        }
    }
    best.map(|(i, _)| i)
}

/// True when exactly one move carries probability mass: a single non-NaN
/// positive entry, everything else zero or NaN.
pub fn is_one_hot(values: &[f32]) -> bool {
    values.iter().filter(|v| !v.is_nan() && **v > 0.0).count() == 1
}
