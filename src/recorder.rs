use crate::contract::BufferInfo;

const CHECKSUM_MODULUS: u32 = 65_521;
// Largest n such that the running sums cannot overflow u32 between
// modulo reductions.
const CHECKSUM_REDUCE_EVERY: usize = 5_552;

// Streaming modular checksum: running sums a and b over the byte values,
// reduced periodically, folded into b * 65536 + a. A pure function of the
// byte region, so identical buffers always produce identical results.
#[must_use]
pub fn rolling_checksum(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for chunk in data.chunks(CHECKSUM_REDUCE_EVERY) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= CHECKSUM_MODULUS;
        b %= CHECKSUM_MODULUS;
    }
    (b << 16) | a
}

// One run's observable record: which timestamps went in, which came out and
// in what order, and (optionally) what the produced bytes were. Mutated only
// by the foreground driver thread.
#[derive(Debug, Default)]
pub struct OutputRecorder {
    in_pts: Vec<i64>,
    out_pts: Vec<i64>,
    payload: Vec<u8>,
    checksums: Vec<u32>,
}

impl OutputRecorder {
    const MISMATCH_REPORT_LIMIT: usize = 20;

    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // Only unique timestamps are kept: duplicate and non-display frames
    // coalesce into a single entry.
    pub fn save_in_pts(&mut self, pts_us: i64) {
        if !self.in_pts.contains(&pts_us) {
            self.in_pts.push(pts_us);
        }
    }

    pub fn save_out_pts(&mut self, pts_us: i64) {
        self.out_pts.push(pts_us);
    }

    // save_to_memory and save_checksum are mutually exclusive capture
    // strategies; a variant picks one per run.
    pub fn save_to_memory(&mut self, buf: &[u8], info: &BufferInfo) {
        let Some(region) = buf.get(info.offset..info.offset + info.size) else {
            log::error!("output region out of bounds: {info}, buffer len {}", buf.len());
            return;
        };
        self.payload.extend_from_slice(region);
    }

    pub fn save_checksum(&mut self, buf: &[u8], info: &BufferInfo) {
        let Some(region) = buf.get(info.offset..info.offset + info.size) else {
            log::error!("output region out of bounds: {info}, buffer len {}", buf.len());
            return;
        };
        self.checksums.push(rolling_checksum(region));
    }

    #[must_use]
    pub fn is_pts_strictly_increasing(&self, mut last_pts: i64) -> bool {
        for &pts in &self.out_pts {
            if last_pts < pts {
                last_pts = pts;
            } else {
                log::error!(
                    "timestamp ordering check failed: last timestamp {last_pts}, current {pts}"
                );
                return false;
            }
        }
        true
    }

    // Video output may arrive in coded order, hence the optional sort; audio
    // output must already be increasing and is compared as-is.
    #[must_use]
    pub fn is_out_pts_identical_to_in_pts(&self, require_sorting: bool) -> bool {
        let mut inputs = self.in_pts.clone();
        inputs.sort_unstable();
        let mut outputs = self.out_pts.clone();
        if require_sorting {
            outputs.sort_unstable();
        }
        if outputs.len() != inputs.len() {
            log::error!(
                "input/output timestamp list sizes differ: exp/rec {}/{}",
                inputs.len(),
                outputs.len()
            );
            return false;
        }
        let mut mismatches = 0usize;
        for (expected, received) in inputs.iter().zip(outputs.iter()) {
            if expected != received {
                mismatches += 1;
                log::error!("input/output pts mismatch: exp/rec {expected}/{received}");
                if mismatches == Self::MISMATCH_REPORT_LIMIT {
                    log::error!("stopping after {} mismatches", Self::MISMATCH_REPORT_LIMIT);
                    break;
                }
            }
        }
        mismatches == 0
    }

    // Structural equality of two runs' observable output. Used to prove a
    // callback-mode run and a poll-mode run over the same input are
    // indistinguishable.
    #[must_use]
    pub fn matches(&self, other: &OutputRecorder) -> bool {
        let mut equal = true;
        if self.checksums != other.checksums {
            equal = false;
            log::error!("ref and test checksum lists mismatch");
        }
        if self.out_pts != other.out_pts {
            equal = false;
            log::error!("ref and test output timestamps mismatch");
        }
        if self.payload.len() == other.payload.len() {
            let mut mismatches = 0usize;
            for (offset, (a, b)) in self.payload.iter().zip(other.payload.iter()).enumerate() {
                if a != b {
                    mismatches += 1;
                    if mismatches <= Self::MISMATCH_REPORT_LIMIT {
                        log::debug!("sample at offset {offset} exp/got {a}/{b}");
                    }
                }
            }
            if mismatches != 0 {
                equal = false;
                log::error!("ref and test output samples mismatch: {mismatches}");
            }
        } else {
            equal = false;
            log::error!(
                "ref and test output sizes mismatch: {}/{}",
                self.payload.len(),
                other.payload.len()
            );
        }
        equal
    }

    // Both buffers are treated as little-endian 16-bit sample arrays.
    // Returns -1.0 when the lengths differ or are odd.
    #[must_use]
    pub fn rms_error(&self, reference: &[u8]) -> f64 {
        if self.payload.len() != reference.len() || self.payload.len() % 2 != 0 {
            return -1.0;
        }
        let samples = self.payload.len() / 2;
        if samples == 0 {
            return 0.0;
        }
        let mut total_error_squared = 0f64;
        for (test, reference) in self.payload.chunks_exact(2).zip(reference.chunks_exact(2)) {
            let test = i16::from_le_bytes([test[0], test[1]]);
            let reference = i16::from_le_bytes([reference[0], reference[1]]);
            let diff = f64::from(test) - f64::from(reference);
            total_error_squared += diff * diff;
        }
        (total_error_squared / samples as f64).sqrt()
    }

    #[must_use]
    pub fn in_pts(&self) -> &[i64] {
        &self.in_pts
    }

    #[must_use]
    pub fn out_pts(&self) -> &[i64] {
        &self.out_pts
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn checksums(&self) -> &[u32] {
        &self.checksums
    }

    #[must_use]
    pub fn out_stream_size(&self) -> usize {
        self.payload.len()
    }

    pub fn clear(&mut self) {
        self.in_pts.clear();
        self.out_pts.clear();
        self.payload.clear();
        self.checksums.clear();
    }
}
