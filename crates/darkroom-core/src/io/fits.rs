use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use memmap2::Mmap;
use ndarray::Array2;

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE, STATUS_KEYWORD_PREFIX};
use crate::error::{ReductionError, Result};
use crate::frame::{Frame, Header, HeaderValue, StageStatus};

/// Keywords that describe the data layout; regenerated on write and kept out
/// of `Frame::header`.
pub const STRUCTURAL_KEYWORDS: &[&str] = &[
    "SIMPLE", "XTENSION", "BITPIX", "NAXIS", "NAXIS1", "NAXIS2", "EXTEND", "PCOUNT", "GCOUNT",
    "BZERO", "BSCALE", "EXTNAME", "END",
];

/// One parsed header-data unit.
#[derive(Clone, Debug)]
pub struct Hdu {
    pub header: Header,
    pub data: Option<Array2<f32>>,
}

impl Hdu {
    pub fn extname(&self) -> Option<&str> {
        self.header.get_str("EXTNAME").map(str::trim)
    }
}

/// Memory-mapped FITS reader.
pub struct FitsReader {
    mmap: Mmap,
}

impl FitsReader {
    pub fn open(path: &Path) -> Result<Self> {
        if is_compressed(path) {
            return Err(ReductionError::InvalidFits(format!(
                "{}: tile-compressed FITS is not supported",
                path.display()
            )));
        }
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < FITS_BLOCK_SIZE || &mmap[0..6] != b"SIMPLE" {
            return Err(ReductionError::InvalidFits(format!(
                "{}: missing SIMPLE card",
                path.display()
            )));
        }
        Ok(Self { mmap })
    }

    /// Parse only the primary header.
    pub fn primary_header(&self) -> Result<Header> {
        let (header, _) = parse_header(&self.mmap, 0)?;
        Ok(header)
    }

    /// Parse every HDU in the file.
    pub fn hdus(&self) -> Result<Vec<Hdu>> {
        let mut hdus = Vec::new();
        let mut offset = 0;
        while offset < self.mmap.len() {
            let (header, data_start) = parse_header(&self.mmap, offset)?;
            let layout = DataLayout::from_header(&header)?;
            if layout.byte_len > self.mmap.len().saturating_sub(data_start) {
                return Err(ReductionError::InvalidFits(format!(
                    "HDU {} truncated: expected {} bytes of data",
                    hdus.len(),
                    layout.byte_len
                )));
            }
            let data_end = data_start + layout.byte_len;
            let data = layout.decode(&self.mmap[data_start..data_end], &header);
            hdus.push(Hdu { header, data });
            offset = data_start + padded(layout.byte_len);
        }
        Ok(hdus)
    }
}

/// Read just the primary header of `path`.
pub fn read_header(path: &Path) -> Result<Header> {
    FitsReader::open(path)?.primary_header()
}

/// Read a frame: primary data plus optional `ERR` and `BPM` extensions.
///
/// Stage status cards are moved from the header into `Frame::status`.
pub fn read_frame(path: &Path) -> Result<Frame> {
    let reader = FitsReader::open(path)?;
    let mut hdus = reader.hdus()?.into_iter();
    let primary = hdus
        .next()
        .ok_or_else(|| ReductionError::InvalidFits("no HDUs".into()))?;
    let data = primary
        .data
        .ok_or_else(|| ReductionError::InvalidFits("primary HDU has no image".into()))?;

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let mut frame = Frame::from_header(strip_structural(primary.header), data, &filename)?;
    frame.is_bad = frame.header.get("ISBAD") == Some(&HeaderValue::Bool(true));
    frame.status = stage_statuses(&frame.header);
    frame.header.retain(|key| !is_status_keyword(key));

    for hdu in hdus {
        let name = hdu.extname().map(str::to_string);
        match (name.as_deref(), hdu.data) {
            (Some("ERR"), Some(err)) if err.dim() == frame.data.dim() => frame.uncertainty = err,
            (Some("BPM"), Some(bpm)) if bpm.dim() == frame.data.dim() => {
                frame.mask = bpm.mapv(|v| (v != 0.0) as u8)
            }
            _ => {}
        }
    }
    Ok(frame)
}

/// Stage outcomes recorded in the `L1STATnn` cards of `header`.
pub fn stage_statuses(header: &Header) -> BTreeMap<String, StageStatus> {
    header
        .iter()
        .filter(|(key, _)| is_status_keyword(key))
        .filter_map(|(_, value)| value.as_str().and_then(StageStatus::decode))
        .collect()
}

pub(crate) fn status_keyword(index: usize) -> String {
    format!("{STATUS_KEYWORD_PREFIX}{index:02}")
}

pub(crate) fn is_status_keyword(key: &str) -> bool {
    key.strip_prefix(STATUS_KEYWORD_PREFIX)
        .is_some_and(|n| n.len() == 2 && n.bytes().all(|b| b.is_ascii_digit()))
}

pub fn is_compressed(path: &Path) -> bool {
    path.to_string_lossy().ends_with(".fz")
}

pub(crate) fn padded(len: usize) -> usize {
    len.div_ceil(FITS_BLOCK_SIZE) * FITS_BLOCK_SIZE
}

fn strip_structural(header: Header) -> Header {
    let mut out = Header::new();
    for (key, value) in header.iter() {
        if !STRUCTURAL_KEYWORDS.contains(&key) {
            out.set(key, value.clone());
        }
    }
    out
}

/// Parse header cards starting at `offset`; returns the header and the
/// offset of the first data byte.
fn parse_header(buf: &[u8], offset: usize) -> Result<(Header, usize)> {
    let mut header = Header::new();
    let mut pos = offset;
    loop {
        if pos + FITS_CARD_SIZE > buf.len() {
            return Err(ReductionError::InvalidFits("header has no END card".into()));
        }
        let card = &buf[pos..pos + FITS_CARD_SIZE];
        pos += FITS_CARD_SIZE;

        let keyword = String::from_utf8_lossy(&card[..8]).trim().to_string();
        if keyword == "END" {
            break;
        }
        if keyword.is_empty() || &card[8..10] != b"= " {
            continue; // COMMENT, HISTORY, blank
        }
        let raw = String::from_utf8_lossy(&card[10..]).to_string();
        header.set(&keyword, parse_value(&raw));
    }
    let consumed = pos - offset;
    Ok((header, offset + padded(consumed)))
}

fn parse_value(raw: &str) -> HeaderValue {
    let trimmed = raw.trim_start();
    if let Some(rest) = trimmed.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    value.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        return HeaderValue::Text(value.trim_end().to_string());
    }

    let value = trimmed.split('/').next().unwrap_or("").trim();
    match value {
        "T" => HeaderValue::Bool(true),
        "F" => HeaderValue::Bool(false),
        _ => {
            if let Ok(i) = value.parse::<i64>() {
                HeaderValue::Int(i)
            } else if let Ok(f) = value.replace('D', "E").parse::<f64>() {
                HeaderValue::Float(f)
            } else {
                HeaderValue::Text(value.to_string())
            }
        }
    }
}

struct DataLayout {
    bitpix: i64,
    width: usize,
    height: usize,
    byte_len: usize,
}

impl DataLayout {
    fn from_header(header: &Header) -> Result<Self> {
        let int = |key: &str| header.get(key).and_then(HeaderValue::as_f64).map(|v| v as i64);
        let axis = |key: &str| -> Result<usize> {
            let n = int(key).unwrap_or(0);
            usize::try_from(n)
                .map_err(|_| ReductionError::InvalidFits(format!("{key}={n} is negative")))
        };
        let bitpix = int("BITPIX")
            .ok_or_else(|| ReductionError::InvalidFits("missing BITPIX".into()))?;
        if ![8, 16, 32, -32, -64].contains(&bitpix) {
            return Err(ReductionError::InvalidFits(format!(
                "unsupported BITPIX {bitpix}"
            )));
        }
        let naxis = int("NAXIS").unwrap_or(0);
        let (width, height) = match naxis {
            0 => (0, 0),
            1 => (axis("NAXIS1")?, 1),
            2 => (axis("NAXIS1")?, axis("NAXIS2")?),
            n => {
                return Err(ReductionError::InvalidFits(format!(
                    "unsupported NAXIS={n}"
                )))
            }
        };
        let bytes_per_pixel = (bitpix.unsigned_abs() / 8) as usize;
        let byte_len = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(bytes_per_pixel))
            .ok_or_else(|| {
                ReductionError::InvalidFits(format!("image of {width}x{height} is too large"))
            })?;
        Ok(Self {
            bitpix,
            width,
            height,
            byte_len,
        })
    }

    fn bytes_per_pixel(&self) -> usize {
        (self.bitpix.unsigned_abs() / 8) as usize
    }

    fn decode(&self, raw: &[u8], header: &Header) -> Option<Array2<f32>> {
        if self.width == 0 || self.height == 0 {
            return None;
        }
        let bzero = header.get_f64("BZERO").unwrap_or(0.0);
        let bscale = header.get_f64("BSCALE").unwrap_or(1.0);
        let bpp = self.bytes_per_pixel();
        let values: Vec<f32> = raw
            .chunks_exact(bpp)
            .map(|px| {
                let v = match self.bitpix {
                    8 => px[0] as f64,
                    16 => BigEndian::read_i16(px) as f64,
                    32 => BigEndian::read_i32(px) as f64,
                    -32 => BigEndian::read_f32(px) as f64,
                    _ => BigEndian::read_f64(px),
                };
                (bzero + bscale * v) as f32
            })
            .collect();
        Array2::from_shape_vec((self.height, self.width), values).ok()
    }
}
