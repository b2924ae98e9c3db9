//! miniSEED 2 reader/writer.
//!
//! Reads fixed-length data records (blockette 1000 required) with INT16,
//! INT32, FLOAT32, FLOAT64, Steim-1 and Steim-2 payloads, stitching
//! contiguous records of one channel into a single [`Trace`]. Writes 4096
//! byte big-endian records, INT32 when every sample is integral and FLOAT64
//! otherwise.

use std::{fs, path::Path};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use tracing::{debug, trace};

use crate::error::MseedError;
use crate::trace::{span_secs, Trace};

pub const FORMAT: &str = "MSEED";

pub const RECORD_LEN:   usize = 4096;
const RECORD_EXPONENT:  u8    = 12;
const FIXED_HEADER:     usize = 48;
const WRITE_DATA_START: usize = 64;

const ENC_INT16:   u8 = 1;
const ENC_INT32:   u8 = 3;
const ENC_FLOAT32: u8 = 4;
const ENC_FLOAT64: u8 = 5;
const ENC_STEIM1:  u8 = 10;
const ENC_STEIM2:  u8 = 11;

// ─────────────────────────────────────────────────────────────────────
// Byte helpers
// ─────────────────────────────────────────────────────────────────────
fn u16_at(b: &[u8], i: usize, be: bool) -> u16 {
    let a = [b[i], b[i + 1]];
    if be { u16::from_be_bytes(a) } else { u16::from_le_bytes(a) }
}

fn u32_at(b: &[u8], i: usize, be: bool) -> u32 {
    let a = [b[i], b[i + 1], b[i + 2], b[i + 3]];
    if be { u32::from_be_bytes(a) } else { u32::from_le_bytes(a) }
}

fn u64_at(b: &[u8], i: usize, be: bool) -> u64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[i..i + 8]);
    if be { u64::from_be_bytes(a) } else { u64::from_le_bytes(a) }
}

fn ascii(b: &[u8]) -> String {
    String::from_utf8_lossy(b).trim().to_string()
}

fn sign_extend(x: u32, bits: u32) -> i32 {
    ((x << (32 - bits)) as i32) >> (32 - bits)
}

// ─────────────────────────────────────────────────────────────────────
// Header
// ─────────────────────────────────────────────────────────────────────
#[derive(Debug, Clone)]
struct RecordHeader {
    network:       String,
    station:       String,
    location:      String,
    channel:       String,
    start:         DateTime<Utc>,
    num_samples:   usize,
    sampling_rate: f64,
    encoding:      u8,
    data_be:       bool,
    record_len:    usize,
    data_offset:   usize,
}

fn sampling_rate(factor: i16, multiplier: i16) -> f64 {
    let f = f64::from(factor);
    let m = if multiplier == 0 { 1.0 } else { f64::from(multiplier) };
    if factor == 0 {
        return 0.0;
    }
    match (f > 0.0, m > 0.0) {
        (true,  true)  => f * m,
        (true,  false) => -f / m,
        (false, true)  => -m / f,
        (false, false) => 1.0 / (f * m),
    }
}

fn header_is_big_endian(b: &[u8], offset: usize) -> Result<bool, MseedError> {
    let plausible = |be: bool| {
        let year = u16_at(b, 20, be);
        let doy  = u16_at(b, 22, be);
        (1900..=2100).contains(&year) && (1..=366).contains(&doy)
    };
    if plausible(true) {
        Ok(true)
    } else if plausible(false) {
        Ok(false)
    } else {
        Err(MseedError::BadHeader { offset, reason: "implausible start time".into() })
    }
}

fn parse_header(b: &[u8], offset: usize) -> Result<RecordHeader, MseedError> {
    let bad = |reason: &str| MseedError::BadHeader { offset, reason: reason.to_string() };

    if !matches!(b[6], b'D' | b'R' | b'Q' | b'M') {
        return Err(bad("not a data record"));
    }
    let be = header_is_big_endian(b, offset)?;

    let year   = u16_at(b, 20, be);
    let doy    = u16_at(b, 22, be);
    let (hour, minute, second) = (b[24], b[25], b[26]);
    let fract  = u16_at(b, 28, be);
    let date = NaiveDate::from_yo_opt(i32::from(year), u32::from(doy))
        .ok_or_else(|| bad("invalid day of year"))?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| bad("invalid date"))?.and_utc();
    let mut start = midnight
        + Duration::hours(i64::from(hour))
        + Duration::minutes(i64::from(minute))
        + Duration::seconds(i64::from(second))
        + Duration::microseconds(i64::from(fract) * 100);

    let num_samples = usize::from(u16_at(b, 30, be));
    let rate = sampling_rate(u16_at(b, 32, be) as i16, u16_at(b, 34, be) as i16);

    let activity   = b[36];
    let correction = u32_at(b, 40, be) as i32;
    if activity & 0x02 == 0 && correction != 0 {
        start += Duration::microseconds(i64::from(correction) * 100);
    }

    let data_offset = usize::from(u16_at(b, 44, be));
    let mut blockette = usize::from(u16_at(b, 46, be));

    let mut b1000: Option<(u8, bool, usize)> = None;
    while blockette >= FIXED_HEADER && blockette + 8 <= b.len() {
        let kind = u16_at(b, blockette, be);
        let next = usize::from(u16_at(b, blockette + 2, be));
        match kind {
            1000 => {
                let exp = b[blockette + 6];
                if !(7..=16).contains(&exp) {
                    return Err(bad("record length exponent out of range"));
                }
                b1000 = Some((b[blockette + 4], b[blockette + 5] == 1, 1usize << exp));
            }
            1001 => {
                start += Duration::microseconds(i64::from(b[blockette + 5] as i8));
            }
            _ => {}
        }
        if next <= blockette {
            break;
        }
        blockette = next;
    }

    let (encoding, data_be, record_len) = b1000.ok_or_else(|| bad("missing blockette 1000"))?;
    if num_samples > 0 && (data_offset < FIXED_HEADER || data_offset >= record_len) {
        return Err(bad("data offset outside record"));
    }

    Ok(RecordHeader {
        network:  ascii(&b[18..20]),
        station:  ascii(&b[8..13]),
        location: ascii(&b[13..15]),
        channel:  ascii(&b[15..18]),
        start,
        num_samples,
        sampling_rate: rate,
        encoding,
        data_be,
        record_len,
        data_offset,
    })
}

// ─────────────────────────────────────────────────────────────────────
// Payload decoding
// ─────────────────────────────────────────────────────────────────────
fn fixed_width<F>(data: &[u8], width: usize, n: usize, f: F) -> Result<Vec<f64>, MseedError>
where
    F: Fn(&[u8]) -> f64,
{
    if data.len() < n * width {
        return Err(MseedError::Steim(format!(
            "payload holds {} bytes, {} samples need {}",
            data.len(),
            n,
            n * width
        )));
    }
    Ok(data.chunks_exact(width).take(n).map(f).collect())
}

fn integrate(x0: Option<i32>, xn: i32, diffs: &[i32], n: usize) -> Result<Vec<i32>, MseedError> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let x0 = x0.ok_or_else(|| MseedError::Steim("missing forward integration constant".into()))?;
    if diffs.len() < n {
        return Err(MseedError::Steim(format!("expected {n} differences, found {}", diffs.len())));
    }
    let mut out = Vec::with_capacity(n);
    out.push(x0);
    for d in &diffs[1..n] {
        let prev = out[out.len() - 1];
        out.push(prev.wrapping_add(*d));
    }
    if out[n - 1] != xn {
        debug!(last = out[n - 1], xn, "steim reverse integration constant mismatch");
    }
    Ok(out)
}

/// Decode Steim-1 frames into `n` integer samples.
pub fn decode_steim1(data: &[u8], n: usize, be: bool) -> Result<Vec<i32>, MseedError> {
    let mut diffs = Vec::with_capacity(n);
    let (mut x0, mut xn) = (None, 0);

    'frames: for (f, frame) in data.chunks_exact(64).enumerate() {
        let ctrl = u32_at(frame, 0, be);
        for w in 1..16 {
            let v = u32_at(frame, w * 4, be);
            if f == 0 && w == 1 { x0 = Some(v as i32); continue; }
            if f == 0 && w == 2 { xn = v as i32; continue; }
            match (ctrl >> (30 - 2 * w)) & 0b11 {
                0 => {}
                1 => (0..4).for_each(|k| diffs.push(sign_extend((v >> (24 - 8 * k)) & 0xff, 8))),
                2 => (0..2).for_each(|k| diffs.push(sign_extend((v >> (16 - 16 * k)) & 0xffff, 16))),
                _ => diffs.push(v as i32),
            }
            if diffs.len() >= n {
                break 'frames;
            }
        }
    }
    integrate(x0, xn, &diffs, n)
}

/// Decode Steim-2 frames into `n` integer samples.
pub fn decode_steim2(data: &[u8], n: usize, be: bool) -> Result<Vec<i32>, MseedError> {
    fn unpack(v: u32, count: u32, bits: u32, diffs: &mut Vec<i32>) {
        let mask = (1u32 << bits) - 1;
        for k in 0..count {
            diffs.push(sign_extend((v >> (bits * (count - 1 - k))) & mask, bits));
        }
    }

    let mut diffs = Vec::with_capacity(n);
    let (mut x0, mut xn) = (None, 0);

    'frames: for (f, frame) in data.chunks_exact(64).enumerate() {
        let ctrl = u32_at(frame, 0, be);
        for w in 1..16 {
            let v = u32_at(frame, w * 4, be);
            if f == 0 && w == 1 { x0 = Some(v as i32); continue; }
            if f == 0 && w == 2 { xn = v as i32; continue; }
            let dnib = v >> 30;
            match (ctrl >> (30 - 2 * w)) & 0b11 {
                0 => {}
                1 => unpack(v, 4, 8, &mut diffs),
                2 => match dnib {
                    1 => unpack(v, 1, 30, &mut diffs),
                    2 => unpack(v, 2, 15, &mut diffs),
                    3 => unpack(v, 3, 10, &mut diffs),
                    _ => return Err(MseedError::Steim(format!("bad dnib 0 in frame {f} word {w}"))),
                },
                _ => match dnib {
                    0 => unpack(v, 5, 6, &mut diffs),
                    1 => unpack(v, 6, 5, &mut diffs),
                    2 => unpack(v, 7, 4, &mut diffs),
                    _ => return Err(MseedError::Steim(format!("bad dnib 3 in frame {f} word {w}"))),
                },
            }
            if diffs.len() >= n {
                break 'frames;
            }
        }
    }
    integrate(x0, xn, &diffs, n)
}

fn decode_samples(data: &[u8], encoding: u8, n: usize, be: bool) -> Result<Vec<f64>, MseedError> {
    match encoding {
        ENC_INT16   => fixed_width(data, 2, n, |c| f64::from(u16_at(c, 0, be) as i16)),
        ENC_INT32   => fixed_width(data, 4, n, |c| f64::from(u32_at(c, 0, be) as i32)),
        ENC_FLOAT32 => fixed_width(data, 4, n, |c| f64::from(f32::from_bits(u32_at(c, 0, be)))),
        ENC_FLOAT64 => fixed_width(data, 8, n, |c| f64::from_bits(u64_at(c, 0, be))),
        ENC_STEIM1  => Ok(decode_steim1(data, n, be)?.into_iter().map(f64::from).collect()),
        ENC_STEIM2  => Ok(decode_steim2(data, n, be)?.into_iter().map(f64::from).collect()),
        other       => Err(MseedError::UnsupportedEncoding(other)),
    }
}

// ─────────────────────────────────────────────────────────────────────
// Reading
// ─────────────────────────────────────────────────────────────────────
fn same_channel(t: &Trace, h: &RecordHeader) -> bool {
    t.network == h.network && t.station == h.station && t.location == h.location && t.channel == h.channel
}

fn append_record(traces: &mut Vec<Trace>, h: RecordHeader, samples: Vec<f64>) {
    if let Some(t) = traces.iter_mut().rev().find(|t| same_channel(t, &h)) {
        let gap = span_secs(t.next_sample_time(), h.start).abs();
        if (t.sampling_rate - h.sampling_rate).abs() < 1e-9 && gap < 0.5 * t.delta() {
            t.samples.extend(samples);
            return;
        }
    }
    traces.push(Trace {
        network:       h.network,
        station:       h.station,
        location:      h.location,
        channel:       h.channel,
        start:         h.start,
        sampling_rate: h.sampling_rate,
        samples,
    });
}

/// Decode every data record in `bytes`. Contiguous records of one channel
/// become one trace; gaps start a new trace.
pub fn parse_records(bytes: &[u8]) -> Result<Vec<Trace>, MseedError> {
    let mut traces = Vec::new();
    let mut offset = 0;

    while offset + FIXED_HEADER <= bytes.len() {
        let h = parse_header(&bytes[offset..], offset)?;
        if offset + h.record_len > bytes.len() {
            return Err(MseedError::Truncated { offset });
        }
        let record_len = h.record_len;
        if h.num_samples > 0 && h.sampling_rate > 0.0 {
            let rec = &bytes[offset..offset + record_len];
            let samples = decode_samples(&rec[h.data_offset..], h.encoding, h.num_samples, h.data_be)?;
            append_record(&mut traces, h, samples);
        } else {
            trace!(offset, "skipping record without samples");
        }
        offset += record_len;
    }
    Ok(traces)
}

pub fn read_traces(path: &Path) -> Result<Vec<Trace>, MseedError> {
    let bytes = fs::read(path)?;
    parse_records(&bytes)
}

// ─────────────────────────────────────────────────────────────────────
// Writing
// ─────────────────────────────────────────────────────────────────────
fn rate_factor(rate: f64) -> Result<(i16, i16), MseedError> {
    if !(rate.is_finite() && rate > 0.0) {
        return Err(MseedError::SamplingRate(rate));
    }
    let whole = |x: f64| (x - x.round()).abs() < 1e-6 && x.round() <= f64::from(i16::MAX);
    if rate >= 1.0 {
        for mult in [1i16, 10, 100, 1000, 10000] {
            let f = rate * f64::from(mult);
            if whole(f) {
                let m = if mult == 1 { 1 } else { -mult };
                return Ok((f.round() as i16, m));
            }
        }
    } else {
        let period = 1.0 / rate;
        if whole(period) {
            return Ok((-(period.round() as i16), 1));
        }
    }
    Err(MseedError::SamplingRate(rate))
}

fn put_ascii(rec: &mut [u8], from: usize, width: usize, s: &str) {
    let field = &mut rec[from..from + width];
    field.fill(b' ');
    for (dst, src) in field.iter_mut().zip(s.bytes()) {
        *dst = src;
    }
}

fn integral_samples(samples: &[f64]) -> Option<Vec<i32>> {
    samples
        .iter()
        .map(|&x| {
            let ok = x.is_finite() && x.fract() == 0.0 && x >= f64::from(i32::MIN) && x <= f64::from(i32::MAX);
            ok.then_some(x as i32)
        })
        .collect()
}

fn write_header(rec: &mut [u8], seq: usize, tr: &Trace, start: DateTime<Utc>, n: usize, rate: (i16, i16), encoding: u8) {
    put_ascii(rec, 0, 6, &format!("{:06}", seq % 1_000_000));
    rec[6] = b'D';
    rec[7] = b' ';
    put_ascii(rec, 8, 5, &tr.station);
    put_ascii(rec, 13, 2, &tr.location);
    put_ascii(rec, 15, 3, &tr.channel);
    put_ascii(rec, 18, 2, &tr.network);

    let micros = start.nanosecond() / 1_000;
    rec[20..22].copy_from_slice(&(start.year() as u16).to_be_bytes());
    rec[22..24].copy_from_slice(&(start.ordinal() as u16).to_be_bytes());
    rec[24] = start.hour() as u8;
    rec[25] = start.minute() as u8;
    rec[26] = start.second() as u8;
    rec[28..30].copy_from_slice(&((micros / 100) as u16).to_be_bytes());

    rec[30..32].copy_from_slice(&(n as u16).to_be_bytes());
    rec[32..34].copy_from_slice(&rate.0.to_be_bytes());
    rec[34..36].copy_from_slice(&rate.1.to_be_bytes());
    rec[39] = 2;
    rec[44..46].copy_from_slice(&(WRITE_DATA_START as u16).to_be_bytes());
    rec[46..48].copy_from_slice(&(FIXED_HEADER as u16).to_be_bytes());

    // blockette 1000
    rec[48..50].copy_from_slice(&1000u16.to_be_bytes());
    rec[50..52].copy_from_slice(&56u16.to_be_bytes());
    rec[52] = encoding;
    rec[53] = 1;
    rec[54] = RECORD_EXPONENT;

    // blockette 1001, sub-100µs part of the start time
    rec[56..58].copy_from_slice(&1001u16.to_be_bytes());
    rec[61] = (micros % 100) as u8;
}

/// Encode a trace as a sequence of 4096-byte records.
pub fn encode_trace(tr: &Trace) -> Result<Vec<u8>, MseedError> {
    if tr.is_empty() {
        return Err(MseedError::Empty);
    }
    let rate  = rate_factor(tr.sampling_rate)?;
    let ints  = integral_samples(&tr.samples);
    let width = if ints.is_some() { 4 } else { 8 };
    let per_record = (RECORD_LEN - WRITE_DATA_START) / width;

    let mut out = Vec::with_capacity(tr.len().div_ceil(per_record) * RECORD_LEN);
    for (seq, first) in (0..tr.len()).step_by(per_record).enumerate() {
        let last = (first + per_record).min(tr.len());
        let mut rec = vec![0u8; RECORD_LEN];

        let encoding = if ints.is_some() { ENC_INT32 } else { ENC_FLOAT64 };
        write_header(&mut rec, seq + 1, tr, tr.time_of(first), last - first, rate, encoding);

        let mut at = WRITE_DATA_START;
        match &ints {
            Some(v) => for x in &v[first..last] {
                rec[at..at + 4].copy_from_slice(&x.to_be_bytes());
                at += 4;
            },
            None => for x in &tr.samples[first..last] {
                rec[at..at + 8].copy_from_slice(&x.to_be_bytes());
                at += 8;
            },
        }
        out.extend_from_slice(&rec);
    }
    Ok(out)
}

pub fn write_trace(path: &Path, tr: &Trace) -> Result<(), MseedError> {
    let bytes = encode_trace(tr)?;
    fs::write(path, bytes)?;
    Ok(())
}
