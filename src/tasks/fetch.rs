use std::io::Cursor;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{Error, Result};
use crate::media::MediaItem;
use crate::processing::color::dominant_colors;

const PALETTE_SIZE: usize = 3;

/// Decoded image ready for display, with its dominant colors.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub palette: Vec<[u8; 3]>,
}

impl FetchedImage {
    /// Resident size in bytes used for memory accounting.
    pub fn size_estimate(&self) -> usize {
        self.pixels.len()
    }
}

/// Turns a catalog item into resident pixels.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, item: MediaItem) -> BoxFuture<'static, Result<FetchedImage>>;
}

/// `GET <item.url>` over HTTP, decoded on the blocking pool.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, item: MediaItem) -> BoxFuture<'static, Result<FetchedImage>> {
        let client = self.client.clone();
        Box::pin(async move {
            let url = item.url;
            let response = client
                .get(&url)
                .send()
                .await
                .map_err(|source| Error::Fetch {
                    url: url.clone(),
                    source,
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(Error::HttpStatus {
                    url,
                    status: status.as_u16(),
                });
            }
            let bytes = response.bytes().await.map_err(|source| Error::Fetch {
                url: url.clone(),
                source,
            })?;
            debug!(%url, bytes = bytes.len(), "fetched image bytes");
            let decoded = tokio::task::spawn_blocking(move || decode_image(&url, &bytes))
                .await
                .map_err(|err| Error::Io(std::io::Error::other(err)))??;
            Ok(decoded)
        })
    }
}

/// Decodes to RGBA8, applies EXIF orientation, and extracts the palette.
pub fn decode_image(url: &str, bytes: &[u8]) -> Result<FetchedImage> {
    let img = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .decode()
        .map_err(|source| Error::Decode {
            url: url.to_string(),
            source,
        })?;
    let mut img = img.to_rgba8();

    let orientation = read_orientation(bytes).unwrap_or(1);
    match orientation {
        1 => {}
        2 => img = image::imageops::flip_horizontal(&img),
        3 => img = image::imageops::rotate180(&img),
        4 => img = image::imageops::flip_vertical(&img),
        5 => {
            img = image::imageops::rotate90(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        6 => img = image::imageops::rotate90(&img),
        7 => {
            img = image::imageops::rotate270(&img);
            img = image::imageops::flip_horizontal(&img);
        }
        8 => img = image::imageops::rotate270(&img),
        _ => {}
    }

    let palette = dominant_colors(&img, PALETTE_SIZE);
    let (width, height) = img.dimensions();
    Ok(FetchedImage {
        width,
        height,
        pixels: img.into_raw(),
        palette,
    })
}

fn read_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    field.value.get_uint(0).map(|v| v as u16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgba, RgbaImage};

    fn png_bytes(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
        let img = RgbaImage::from_pixel(width, height, Rgba(color));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn decodes_png_and_extracts_palette() {
        let bytes = png_bytes(8, 4, [10, 200, 10, 255]);
        let decoded = decode_image("http://frame.local/g.png", &bytes).unwrap();
        assert_eq!((decoded.width, decoded.height), (8, 4));
        assert_eq!(decoded.size_estimate(), 8 * 4 * 4);
        assert_eq!(decoded.palette.len(), 1);
        assert!(decoded.palette[0][1] > 190);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = decode_image("http://frame.local/bad.jpg", b"not an image").unwrap_err();
        assert!(matches!(err, Error::Io(_) | Error::Decode { .. }));
    }
}
