// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Image XObject decoding. JPEG streams pass through untouched; raw 8-bit
// RGB/gray samples are re-encoded as PNG. Everything else is skipped.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream};
use sha2::{Digest, Sha256};
use tracing::debug;
use umbruch_core::ImageEncoding;

use super::objects::{dict_get, name, number, resolve};

/// An image XObject decoded into a self-contained encoded file.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub bytes: Vec<u8>,
    pub encoding: ImageEncoding,
    pub width: u32,
    pub height: u32,
}

impl DecodedImage {
    /// Hex SHA-256 of the encoded bytes.
    pub fn digest(&self) -> String {
        content_digest(&self.bytes)
    }
}

pub fn content_digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Decode an image XObject stream, or `None` for unsupported encodings.
pub fn decode_image(document: &Document, stream: &Stream) -> Option<DecodedImage> {
    let dict = &stream.dict;
    let width = dict_get(document, dict, b"Width").and_then(number)? as u32;
    let height = dict_get(document, dict, b"Height").and_then(number)? as u32;
    if width == 0 || height == 0 {
        return None;
    }

    let filters = filter_names(document, dict);
    match filters.iter().map(Vec::as_slice).collect::<Vec<_>>().as_slice() {
        [b"DCTDecode"] => Some(DecodedImage {
            bytes: stream.content.clone(),
            encoding: ImageEncoding::Jpeg,
            width,
            height,
        }),
        [] => decode_samples(document, dict, stream.content.clone(), width, height),
        [b"FlateDecode"] => {
            let samples = match stream.decompressed_content() {
                Ok(samples) => samples,
                Err(err) => {
                    debug!(%err, "Cannot inflate image samples");
                    return None;
                }
            };
            decode_samples(document, dict, samples, width, height)
        }
        other => {
            debug!(filters = ?other.iter().map(|f| String::from_utf8_lossy(f)).collect::<Vec<_>>(), "Skipping image with unsupported filter");
            None
        }
    }
}

fn filter_names(document: &Document, dict: &Dictionary) -> Vec<Vec<u8>> {
    match dict_get(document, dict, b"Filter") {
        Some(Object::Name(filter)) => vec![filter.clone()],
        Some(Object::Array(filters)) => filters
            .iter()
            .filter_map(|entry| resolve(document, entry).and_then(name).map(<[u8]>::to_vec))
            .collect(),
        _ => Vec::new(),
    }
}

/// Number of colour components, or `None` for colour spaces we cannot map.
fn components(document: &Document, dict: &Dictionary) -> Option<u32> {
    match dict_get(document, dict, b"ColorSpace")? {
        Object::Name(space) => match space.as_slice() {
            b"DeviceRGB" | b"CalRGB" => Some(3),
            b"DeviceGray" | b"CalGray" => Some(1),
            _ => None,
        },
        Object::Array(parts) => {
            let family = parts.first().and_then(name)?;
            if family != b"ICCBased" {
                return None;
            }
            let profile = parts.get(1).and_then(|p| resolve(document, p))?;
            let Object::Stream(profile) = profile else {
                return None;
            };
            match dict_get(document, &profile.dict, b"N").and_then(number)? as u32 {
                n @ (1 | 3) => Some(n),
                _ => None,
            }
        }
        _ => None,
    }
}

fn decode_samples(
    document: &Document,
    dict: &Dictionary,
    samples: Vec<u8>,
    width: u32,
    height: u32,
) -> Option<DecodedImage> {
    let bits = dict_get(document, dict, b"BitsPerComponent").and_then(number)? as u32;
    if bits != 8 {
        debug!(bits, "Skipping image with unsupported bit depth");
        return None;
    }
    let channels = components(document, dict)?;
    let expected = (width as usize) * (height as usize) * channels as usize;
    if samples.len() < expected {
        debug!(expected, actual = samples.len(), "Image samples truncated");
        return None;
    }
    let samples = samples[..expected].to_vec();

    let image = if channels == 3 {
        DynamicImage::ImageRgb8(RgbImage::from_raw(width, height, samples)?)
    } else {
        DynamicImage::ImageLuma8(GrayImage::from_raw(width, height, samples)?)
    };

    let mut bytes = Vec::new();
    if let Err(err) = image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png) {
        debug!(%err, "PNG re-encoding failed");
        return None;
    }
    Some(DecodedImage {
        bytes,
        encoding: ImageEncoding::Png,
        width,
        height,
    })
}
