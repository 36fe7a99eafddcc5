use std::io::Cursor;

use base64::{prelude::BASE64_STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::GenerationError;

/// What a backend hands back before it is put on the wire.
#[derive(Debug, Clone)]
pub enum RawOutput {
    Text(String),
    /// Decoded pixels from an in-process pipeline.
    Image(DynamicImage),
    /// An encoded image file as downloaded from an upstream.
    ImageBytes {
        bytes: Vec<u8>,
        format: Option<String>,
    },
    /// Upstream already base64-encoded the image.
    ImageBase64(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    #[serde(rename = "response")]
    Text(String),
    #[serde(rename = "image_base64")]
    Image(String),
}

/// The success envelope returned to callers regardless of backend.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub status: Status,
    pub prompt: String,
    #[serde(flatten)]
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Turns a backend's raw output into the envelope.
pub fn encode(prompt: String, output: RawOutput) -> Result<GenerationResult, GenerationError> {
    let (payload, format) = match output {
        RawOutput::Text(text) => (Payload::Text(text), None),
        RawOutput::Image(img) => (
            Payload::Image(image_to_base64_png(&img)?),
            Some("png".to_string()),
        ),
        RawOutput::ImageBytes { bytes, format } => {
            let format = format.or_else(|| sniff_format(&bytes));
            (Payload::Image(BASE64_STANDARD.encode(&bytes)), format)
        }
        RawOutput::ImageBase64(encoded) => (Payload::Image(encoded), None),
    };

    Ok(GenerationResult {
        status: Status::Success,
        prompt,
        payload,
        format,
    })
}

/// Serializes an in-memory image as PNG and base64-encodes it.
pub fn image_to_base64_png(img: &DynamicImage) -> Result<String, GenerationError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(GenerationError::internal)?;
    Ok(BASE64_STANDARD.encode(&bytes))
}

/// Maps an `image/*` content type to a short format tag.
pub fn format_from_content_type(content_type: &str) -> Option<String> {
    let mime = content_type.split(';').next()?.trim();
    let subtype = mime.strip_prefix("image/")?;
    ImageFormat::from_mime_type(mime)
        .and_then(|f| f.extensions_str().first().copied())
        .or(Some(subtype))
        .map(str::to_string)
}

fn sniff_format(bytes: &[u8]) -> Option<String> {
    image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};
    use serde_json::json;

    use super::*;

    fn checkerboard() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(8, 6, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        }))
    }

    fn png_bytes(img: &DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn text_passes_through() {
        let result = encode("oi".into(), RawOutput::Text("resposta".into())).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"status": "success", "prompt": "oi", "response": "resposta"})
        );
    }

    #[test]
    fn in_memory_image_round_trips_through_png() {
        let img = checkerboard();
        let result = encode("board".into(), RawOutput::Image(img.clone())).unwrap();
        assert_eq!(result.format.as_deref(), Some("png"));

        let Payload::Image(encoded) = result.payload else {
            panic!("expected an image payload");
        };
        let decoded = BASE64_STANDARD.decode(encoded).unwrap();
        let back = image::load_from_memory_with_format(&decoded, ImageFormat::Png).unwrap();
        assert_eq!(back.to_rgb8(), img.to_rgb8());
    }

    #[test]
    fn image_bytes_round_trip_exactly() {
        let bytes = png_bytes(&checkerboard());
        let result = encode(
            "p".into(),
            RawOutput::ImageBytes {
                bytes: bytes.clone(),
                format: None,
            },
        )
        .unwrap();
        assert_eq!(result.format.as_deref(), Some("png"));
        let Payload::Image(encoded) = result.payload else {
            panic!("expected an image payload");
        };
        assert_eq!(BASE64_STANDARD.decode(encoded).unwrap(), bytes);
    }

    #[test]
    fn base64_passthrough_is_untouched() {
        let result = encode("p".into(), RawOutput::ImageBase64("aGVsbG8=".into())).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"status": "success", "prompt": "p", "image_base64": "aGVsbG8="})
        );
    }

    #[test]
    fn content_type_maps_to_format() {
        assert_eq!(format_from_content_type("image/png").as_deref(), Some("png"));
        assert_eq!(
            format_from_content_type("image/jpeg; charset=binary").as_deref(),
            Some("jpg")
        );
        assert_eq!(format_from_content_type("application/json"), None);
    }
}
