//! Turns inbound image payloads into RGB pixel buffers.

use base64::engine::general_purpose;
use base64::Engine as _;
use image::RgbImage;
use tracing::debug;

use crate::errors::{AppError, AppResult};

/// An encoded image as it arrives from a transport.
#[derive(Debug, Clone, Copy)]
pub enum ImagePayload<'a> {
    /// `data:image/png;base64,<payload>`, or the bare base64 payload.
    DataUri(&'a str),
    /// Raw encoded bytes (PNG, JPEG, ...).
    Encoded(&'a [u8]),
}

impl<'a> ImagePayload<'a> {
    /// Picks the payload kind for file contents: recognizable image bytes are
    /// decoded directly, UTF-8 text is treated as a data URI.
    pub fn from_bytes(bytes: &'a [u8]) -> Self {
        if image::guess_format(bytes).is_ok() {
            return ImagePayload::Encoded(bytes);
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => ImagePayload::DataUri(text),
            Err(_) => ImagePayload::Encoded(bytes),
        }
    }

    /// True when nothing was supplied at all.
    pub fn is_empty(&self) -> bool {
        match self {
            ImagePayload::DataUri(text) => text.trim().is_empty(),
            ImagePayload::Encoded(bytes) => bytes.is_empty(),
        }
    }
}

pub fn decode_image(payload: ImagePayload<'_>) -> AppResult<RgbImage> {
    let owned;
    let bytes = match payload {
        ImagePayload::DataUri(text) => {
            owned = decode_data_uri(text)?;
            owned.as_slice()
        }
        ImagePayload::Encoded(bytes) => bytes,
    };

    if bytes.is_empty() {
        return Err(AppError::Decode {
            message: "image payload is empty".into(),
        });
    }

    let image = image::load_from_memory(bytes).map_err(|err| AppError::Decode {
        message: err.to_string(),
    })?;
    let rgb = image.to_rgb8();
    debug!(width = rgb.width(), height = rgb.height(), "decoded image payload");
    Ok(rgb)
}

fn decode_data_uri(text: &str) -> AppResult<Vec<u8>> {
    let body = match text.split_once(',') {
        Some((_header, body)) => body,
        None => text,
    };
    let compact: String = body.chars().filter(|ch| !ch.is_ascii_whitespace()).collect();
    if compact.is_empty() {
        return Err(AppError::Decode {
            message: "image payload is empty".into(),
        });
    }

    general_purpose::STANDARD
        .decode(compact.as_bytes())
        .or_else(|_| general_purpose::STANDARD_NO_PAD.decode(compact.as_bytes()))
        .map_err(|err| AppError::Decode {
            message: format!("invalid base64 payload: {err}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageOutputFormat, Rgb};
    use std::io::Cursor;

    fn sample_png() -> Vec<u8> {
        let image = RgbImage::from_fn(8, 6, |x, y| Rgb([(x * 30) as u8, (y * 40) as u8, 7]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn decodes_data_uri_with_and_without_header() {
        let png = sample_png();
        let encoded = general_purpose::STANDARD.encode(&png);
        let with_header = format!("data:image/png;base64,{encoded}");

        let a = decode_image(ImagePayload::DataUri(&with_header)).unwrap();
        let b = decode_image(ImagePayload::DataUri(&encoded)).unwrap();
        assert_eq!(a.dimensions(), (8, 6));
        assert_eq!(a, b);
        assert_eq!(a.get_pixel(2, 1), &Rgb([60, 40, 7]));
    }

    #[test]
    fn decoding_twice_is_bit_identical() {
        let png = sample_png();
        let first = decode_image(ImagePayload::Encoded(&png)).unwrap();
        let second = decode_image(ImagePayload::Encoded(&png)).unwrap();
        assert_eq!(first.as_raw(), second.as_raw());
    }

    #[test]
    fn empty_payloads_are_rejected() {
        let err = decode_image(ImagePayload::Encoded(&[])).unwrap_err();
        assert!(matches!(err, AppError::Decode { .. }));

        let err = decode_image(ImagePayload::DataUri("data:image/png;base64,")).unwrap_err();
        assert!(matches!(err, AppError::Decode { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = decode_image(ImagePayload::DataUri("data:image/png;base64,!!!not-base64"))
            .unwrap_err();
        assert!(matches!(err, AppError::Decode { .. }));

        let not_an_image = general_purpose::STANDARD.encode(b"hello world");
        let err = decode_image(ImagePayload::DataUri(&not_an_image)).unwrap_err();
        assert!(matches!(err, AppError::Decode { .. }));
    }

    #[test]
    fn from_bytes_sniffs_text_payloads() {
        let png = sample_png();
        assert!(matches!(
            ImagePayload::from_bytes(&png),
            ImagePayload::Encoded(_)
        ));

        let text = format!(
            "data:image/png;base64,{}\n",
            general_purpose::STANDARD.encode(&png)
        );
        let payload = ImagePayload::from_bytes(text.as_bytes());
        assert!(matches!(payload, ImagePayload::DataUri(_)));
        assert_eq!(decode_image(payload).unwrap().dimensions(), (8, 6));
    }
}
