use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::ImageFormat;
use thiserror::Error;
use uuid::Uuid;

use crate::kinds::SignRole;

pub const MAX_SIGNATURE_BYTES: usize = 2 * 1024 * 1024;
pub const SIGNATURE_CONTENT_TYPE: &str = "image/png";

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("signature image is empty")]
    Empty,
    #[error("signature image is not valid base64")]
    InvalidBase64,
    #[error("signature image exceeds {max} bytes")]
    TooLarge { max: usize },
    #[error("signature image must be a PNG or JPEG")]
    UnsupportedFormat,
    #[error("signature image could not be decoded")]
    Undecodable,
}

/// A decoded signature, normalized to PNG bytes.
#[derive(Debug, Clone)]
pub struct SignatureImage {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Accepts raw base64 or a `data:image/...;base64,` URL.
pub fn decode_signature_image(input: &str) -> Result<SignatureImage, ImageError> {
    let trimmed = input.trim();
    let encoded = match trimmed.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => trimmed,
    };
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.is_empty() {
        return Err(ImageError::Empty);
    }
    if compact.len() / 4 * 3 > MAX_SIGNATURE_BYTES + 3 {
        return Err(ImageError::TooLarge {
            max: MAX_SIGNATURE_BYTES,
        });
    }
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| ImageError::InvalidBase64)?;
    from_bytes(bytes)
}

pub fn from_bytes(bytes: Vec<u8>) -> Result<SignatureImage, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::Empty);
    }
    if bytes.len() > MAX_SIGNATURE_BYTES {
        return Err(ImageError::TooLarge {
            max: MAX_SIGNATURE_BYTES,
        });
    }

    let format = image::guess_format(&bytes).map_err(|_| ImageError::UnsupportedFormat)?;
    if !matches!(format, ImageFormat::Png | ImageFormat::Jpeg) {
        return Err(ImageError::UnsupportedFormat);
    }
    let decoded = image::load_from_memory_with_format(&bytes, format)
        .map_err(|_| ImageError::Undecodable)?;

    let png = if format == ImageFormat::Png {
        bytes
    } else {
        let mut buffer = Cursor::new(Vec::new());
        decoded
            .write_to(&mut buffer, ImageFormat::Png)
            .map_err(|_| ImageError::Undecodable)?;
        buffer.into_inner()
    };

    Ok(SignatureImage {
        png,
        width: decoded.width(),
        height: decoded.height(),
    })
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Key for an image submitted through a signing link.
pub fn request_image_key(contract_id: i32, role: SignRole, request_id: i32) -> String {
    format!(
        "signatures/{contract_id}/{}_{request_id}_{}.png",
        role.slug(),
        short_uuid()
    )
}

/// Key for an image submitted directly against a contract's signature slot.
pub fn slot_image_key(contract_id: i32, role: SignRole) -> String {
    format!("signatures/{contract_id}/{}_{}.png", role.slug(), short_uuid())
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};

    use super::*;

    fn png_bytes() -> Vec<u8> {
        let image = RgbaImage::from_pixel(4, 2, Rgba([0, 0, 0, 255]));
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    #[test]
    fn decodes_plain_base64_png() {
        let encoded = STANDARD.encode(png_bytes());
        let image = decode_signature_image(&encoded).unwrap();
        assert_eq!((image.width, image.height), (4, 2));
        assert_eq!(image.png, png_bytes());
    }

    #[test]
    fn decodes_data_url() {
        let encoded = format!("data:image/png;base64,{}", STANDARD.encode(png_bytes()));
        assert!(decode_signature_image(&encoded).is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            decode_signature_image("not base64!!"),
            Err(ImageError::InvalidBase64)
        ));
        assert!(matches!(
            decode_signature_image(""),
            Err(ImageError::Empty)
        ));
        let text = STANDARD.encode(b"just some text, not an image");
        assert!(matches!(
            decode_signature_image(&text),
            Err(ImageError::UnsupportedFormat)
        ));
    }

    #[test]
    fn rejects_truncated_png() {
        let mut bytes = png_bytes();
        bytes.truncate(20);
        assert!(matches!(from_bytes(bytes), Err(ImageError::Undecodable)));
    }

    #[test]
    fn keys_live_under_the_contract_prefix() {
        let key = request_image_key(9, SignRole::Buyer, 31);
        assert!(key.starts_with("signatures/9/buyer_31_"));
        assert!(key.ends_with(".png"));
        assert_ne!(slot_image_key(9, SignRole::Seller), slot_image_key(9, SignRole::Seller));
    }
}
