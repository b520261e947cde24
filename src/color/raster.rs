use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, GrayAlphaImage, ImageBuffer, ImageFormat, LumaA, Rgba, RgbaImage};
use ndarray::{Array2, Array3};
use serde::Serialize;
use std::{fmt, io::Cursor};

/// An encoded image that can be embedded directly into a document as a data URI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub struct ImageBlob {
    pub mime: String,
    pub data: Vec<u8>,
}
impl ImageBlob {
    pub fn png(image: &DynamicImage) -> Result<Self> {
        let mut data = Vec::new();
        image.write_to(&mut Cursor::new(&mut data), ImageFormat::Png)?;
        Ok(ImageBlob {
            mime: "image/png".to_string(),
            data,
        })
    }
    pub fn data_uri(&self) -> String { format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data)) }
}
impl fmt::Display for ImageBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.data_uri()) }
}
impl From<ImageBlob> for String {
    fn from(blob: ImageBlob) -> Self { blob.data_uri() }
}

fn check_mask(pixels: (usize, usize), mask: (usize, usize)) -> Result<(u32, u32)> {
    if pixels != mask {
        return Err(Error::InvalidRaster(format!("raster is {pixels:?}, mask is {mask:?}")));
    }
    let (h, w) = pixels;
    let dim = |v: usize| u32::try_from(v).map_err(|_| Error::InvalidRaster(format!("dimension {v} is too large")));
    Ok((dim(w)?, dim(h)?))
}

/// Combines an H×W×3 color raster with a mask; masked-out pixels become fully transparent.
pub fn rasterize_rgb(pixels: &Array3<u8>, alpha: &Array2<bool>) -> Result<RgbaImage> {
    let (h, w, channels) = pixels.dim();
    if channels != 3 {
        return Err(Error::InvalidRaster(format!("expected 3 channels, got {channels}")));
    }
    let (width, height) = check_mask((h, w), alpha.dim())?;
    Ok(ImageBuffer::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if alpha[[y, x]] {
            Rgba([pixels[[y, x, 0]], pixels[[y, x, 1]], pixels[[y, x, 2]], 255])
        } else {
            Rgba([0, 0, 0, 0])
        }
    }))
}

/// Grayscale counterpart of [`rasterize_rgb`].
pub fn rasterize_gray(pixels: &Array2<u8>, alpha: &Array2<bool>) -> Result<GrayAlphaImage> {
    let (width, height) = check_mask(pixels.dim(), alpha.dim())?;
    Ok(ImageBuffer::from_fn(width, height, |x, y| {
        let (x, y) = (x as usize, y as usize);
        if alpha[[y, x]] {
            LumaA([pixels[[y, x]], 255])
        } else {
            LumaA([0, 0])
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn masked_pixels_are_transparent() {
        let pixels = Array3::from_shape_fn((2, 3, 3), |(y, x, c)| (y * 100 + x * 10 + c) as u8);
        let alpha = array![[true, false, true], [false, true, true]];
        let image = rasterize_rgb(&pixels, &alpha).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(image.get_pixel(0, 0), &Rgba([0, 1, 2, 255]));
        assert_eq!(image.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));
        assert_eq!(image.get_pixel(2, 1), &Rgba([120, 121, 122, 255]));

        let gray = rasterize_gray(&array![[7u8, 8], [9, 10]], &array![[false, true], [true, true]]).unwrap();
        assert_eq!(gray.get_pixel(0, 0), &LumaA([0, 0]));
        assert_eq!(gray.get_pixel(0, 1), &LumaA([9, 255]));
    }

    #[test]
    fn mismatched_masks_are_rejected() {
        let pixels = Array3::<u8>::zeros((2, 2, 3));
        let alpha = Array2::from_elem((3, 2), true);
        assert!(matches!(rasterize_rgb(&pixels, &alpha), Err(Error::InvalidRaster(_))));
        let four = Array3::<u8>::zeros((2, 2, 4));
        assert!(matches!(
            rasterize_rgb(&four, &Array2::from_elem((2, 2), true)),
            Err(Error::InvalidRaster(_))
        ));
    }

    #[test]
    fn blobs_are_png_data_uris() {
        let image = rasterize_gray(&array![[1u8, 2]], &array![[true, true]]).unwrap();
        let blob = ImageBlob::png(&DynamicImage::ImageLumaA8(image)).unwrap();
        assert_eq!(&blob.data[1..4], b"PNG");
        let uri = blob.to_string();
        assert!(uri.starts_with("data:image/png;base64,iVBORw0KGgo"), "{uri}");
        let decoded = STANDARD.decode(uri.trim_start_matches("data:image/png;base64,")).unwrap();
        let round = image::load_from_memory(&decoded).unwrap().to_luma_alpha8();
        assert_eq!(round.get_pixel(1, 0), &LumaA([2, 255]));
    }
}
