use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::consts::{FITS_BLOCK_SIZE, FITS_CARD_SIZE, MAX_CARD_TEXT_LEN, MAX_STATUS_CARDS};
use crate::error::Result;
use crate::frame::{Frame, Header, HeaderValue};

use super::fits::{is_status_keyword, padded, status_keyword, STRUCTURAL_KEYWORDS};

/// Write `frame` as SCI primary + `ERR` + `BPM` extensions.
///
/// The file is written next to `path` under a temporary name and renamed into
/// place, so a reader never sees a partially written frame.
pub fn write_frame(frame: &Frame, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = temp_path(path);
    {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        write_hdus(&mut writer, frame)?;
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_hdus(w: &mut impl Write, frame: &Frame) -> Result<()> {
    let (h, w_px) = frame.data.dim();

    // Primary: science data and the frame header.
    let mut cards = Vec::new();
    cards.push(card("SIMPLE", &HeaderValue::Bool(true)));
    cards.extend(image_cards(-32, w_px, h));
    cards.push(card("EXTEND", &HeaderValue::Bool(true)));
    cards.push(card("EXTNAME", &HeaderValue::Text("SCI".into())));
    let header = identity_header(frame);
    for (key, value) in header.iter() {
        if !STRUCTURAL_KEYWORDS.contains(&key) {
            cards.push(card(key, value));
        }
    }
    write_header_block(w, &cards)?;
    write_f32_data(w, frame.data.iter().copied())?;

    // Uncertainty extension.
    let cards = extension_cards(-32, w_px, h, "ERR");
    write_header_block(w, &cards)?;
    write_f32_data(w, frame.uncertainty.iter().copied())?;

    // Bad pixel mask extension.
    let cards = extension_cards(8, w_px, h, "BPM");
    write_header_block(w, &cards)?;
    let bytes: Vec<u8> = frame.mask.iter().copied().collect();
    w.write_all(&bytes)?;
    write_padding(w, bytes.len(), 0)?;
    Ok(())
}

fn image_cards(bitpix: i64, width: usize, height: usize) -> Vec<String> {
    vec![
        card("BITPIX", &HeaderValue::Int(bitpix)),
        card("NAXIS", &HeaderValue::Int(2)),
        card("NAXIS1", &HeaderValue::Int(width as i64)),
        card("NAXIS2", &HeaderValue::Int(height as i64)),
    ]
}

fn extension_cards(bitpix: i64, width: usize, height: usize, extname: &str) -> Vec<String> {
    let mut cards = vec![card("XTENSION", &HeaderValue::Text("IMAGE".into()))];
    cards.extend(image_cards(bitpix, width, height));
    cards.push(card("PCOUNT", &HeaderValue::Int(0)));
    cards.push(card("GCOUNT", &HeaderValue::Int(1)));
    cards.push(card("EXTNAME", &HeaderValue::Text(extname.into())));
    cards
}

/// Format one 80-column header card.
pub fn card(key: &str, value: &HeaderValue) -> String {
    let key: String = key.chars().take(8).collect();
    let value = match value {
        HeaderValue::Bool(b) => format!("{:>20}", if *b { "T" } else { "F" }),
        HeaderValue::Int(i) => format!("{i:>20}"),
        HeaderValue::Float(f) if f.is_finite() => format!("{:>20}", format!("{f:E}")),
        HeaderValue::Float(f) => format!("'{f}'"),
        HeaderValue::Text(s) => format!("'{:<8}'", card_text(s)),
    };
    let mut line = format!("{key:<8}= {value}");
    line.truncate(FITS_CARD_SIZE);
    format!("{line:<80}")
}

/// Printable ASCII with quotes doubled, cut short enough that the closing
/// quote stays on the card.
fn card_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_CARD_TEXT_LEN));
    for c in s.chars() {
        let c = if c == ' ' || c.is_ascii_graphic() { c } else { '?' };
        let width = if c == '\'' { 2 } else { 1 };
        if out.len() + width > MAX_CARD_TEXT_LEN {
            break;
        }
        out.push(c);
        if c == '\'' {
            out.push('\'');
        }
    }
    out
}

fn write_header_block(w: &mut impl Write, cards: &[String]) -> Result<()> {
    let mut len = 0;
    for c in cards {
        w.write_all(c.as_bytes())?;
        len += FITS_CARD_SIZE;
    }
    w.write_all(format!("{:<80}", "END").as_bytes())?;
    len += FITS_CARD_SIZE;
    write_padding(w, len, b' ')
}

fn write_f32_data(w: &mut impl Write, values: impl Iterator<Item = f32>) -> Result<()> {
    let mut len = 0;
    for v in values {
        w.write_all(&v.to_be_bytes())?;
        len += 4;
    }
    write_padding(w, len, 0)
}

fn write_padding(w: &mut impl Write, len: usize, fill: u8) -> Result<()> {
    let pad = padded(len) - len;
    if pad > 0 {
        w.write_all(&vec![fill; pad])?;
    }
    debug_assert_eq!((len + pad) % FITS_BLOCK_SIZE, 0);
    Ok(())
}

/// The frame's header with its identity and attribute keywords refreshed from
/// the typed fields, so a written frame always reads back. Stage outcomes
/// become `L1STAT01`, `L1STAT02`, ... in stage-name order.
pub fn identity_header(frame: &Frame) -> Header {
    let mut header = frame.header.clone();
    header.set("OBSTYPE", frame.obstype.to_string());
    header.set("SITEID", frame.id.site.clone());
    header.set("INSTRUME", frame.id.instrument.clone());
    header.set("DAY-OBS", frame.id.epoch.format("%Y%m%d").to_string());
    header.set("CONFMODE", frame.attributes.configuration_mode.clone());
    header.set("CCDSUM", frame.attributes.binning.clone());
    header.set("FILTER", frame.attributes.filter.clone());
    header.set("EXPTIME", frame.attributes.exposure_time);
    header.set("RDNOISE", frame.readnoise);
    header.set("SATURATE", frame.saturation);
    header.set("ISBAD", frame.is_bad);
    if let Some((ra, dec)) = frame.pointing {
        header.set("RA", ra);
        header.set("DEC", dec);
    }
    if let Some(scale) = frame.pixel_scale {
        header.set("PIXSCALE", scale);
    }
    header.retain(|key| !is_status_keyword(key));
    for (i, (stage, status)) in frame.status.iter().take(MAX_STATUS_CARDS).enumerate() {
        header.set(&status_keyword(i + 1), status.encode(stage));
    }
    header
}
