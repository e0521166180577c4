use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::ImageReader;
use image::imageops::FilterType;
use std::path::{Path, PathBuf};

use crate::model::constants::CHANNELS;
use crate::model::error::TrainError;

#[derive(Debug, Clone)]
pub struct ImageItem {
    /// CHW planar pixels, normalized to [-1, 1].
    pub pixels: Vec<f32>,
}

/// Flat directory of raster images, decoded and resized on access.
///
/// The paired cartoon set stores each example as one double-width image,
/// cartoon reference on the left and its edge-smoothed variant on the right;
/// for that set `width` is twice the training resolution.
pub struct ImageFolderDataset {
    pub image_paths: Vec<PathBuf>,
    width: usize,
    height: usize,
}

impl ImageFolderDataset {
    pub fn new<P: AsRef<Path>>(path: P, width: usize, height: usize) -> Result<Self, std::io::Error> {
        let path = path.as_ref();
        let mut image_paths = Vec::new();

        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                    match ext.to_lowercase().as_str() {
                        "jpg" | "jpeg" | "png" | "bmp" | "tiff" => {
                            image_paths.push(path);
                        }
                        _ => {}
                    }
                }
            }
        }
        if image_paths.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no image files found in {}", path.display()),
            ));
        }
        image_paths.sort();
        Ok(Self {
            image_paths,
            width,
            height,
        })
    }

    pub fn photos<P: AsRef<Path>>(path: P, image_size: usize) -> Result<Self, std::io::Error> {
        Self::new(path, image_size, image_size)
    }

    pub fn cartoon_pairs<P: AsRef<Path>>(path: P, image_size: usize) -> Result<Self, std::io::Error> {
        Self::new(path, image_size * 2, image_size)
    }
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn len(&self) -> usize {
        self.image_paths.len()
    }

    fn get(&self, index: usize) -> Option<ImageItem> {
        let path = self.image_paths.get(index)?;
        let image = ImageReader::open(path)
            .ok()?
            .decode()
            .ok()?
            .resize_exact(self.width as u32, self.height as u32, FilterType::Triangle)
            .to_rgb8();

        let plane = self.height * self.width;
        let mut pixels = vec![0.0f32; CHANNELS * plane];
        for (x, y, pixel) in image.enumerate_pixels() {
            let offset = y as usize * self.width + x as usize;
            for c in 0..CHANNELS {
                // Normalize to [-1, 1]
                pixels[c * plane + offset] = (pixel[c] as f32 / 127.5) - 1.0;
            }
        }

        Some(ImageItem { pixels })
    }
}

#[derive(Clone, Debug)]
pub struct ImageBatcher {
    width: usize,
    height: usize,
}

impl ImageBatcher {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }
}

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>, // Shape: [batch_size, channels, height, width]
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let image_tensors: Vec<Tensor<B, 4>> = items
            .into_iter()
            .map(|item| {
                Tensor::<B, 3>::from_data(
                    TensorData::new(item.pixels, [CHANNELS, self.height, self.width])
                        .convert::<B::FloatElem>(),
                    device,
                )
                .reshape([1, CHANNELS, self.height, self.width])
            })
            .collect();
        let images = Tensor::cat(image_tensors, 0);
        ImageBatch { images }
    }
}

/// Split a width-concatenated `[n, c, h, 2w]` batch into its
/// (cartoon reference, edge-smoothed) halves.
pub fn split_pair<B: Backend>(
    pair: Tensor<B, 4>,
    image_size: usize,
) -> Result<(Tensor<B, 4>, Tensor<B, 4>), TrainError> {
    let [n, c, h, w] = pair.dims();
    if w != image_size * 2 {
        return Err(TrainError::shape_mismatch(
            "paired cartoon/edge image",
            &[n, c, h, image_size * 2],
            &[n, c, h, w],
        ));
    }
    let cartoon = pair.clone().slice([0..n, 0..c, 0..h, 0..image_size]);
    let edge = pair.slice([0..n, 0..c, 0..h, image_size..w]);
    Ok((cartoon, edge))
}

/// One training step's worth of aligned image tensors.
#[derive(Clone, Debug)]
pub struct CartoonBatch<B: Backend> {
    pub real_photo: Tensor<B, 4>,
    pub cartoon: Tensor<B, 4>,
    pub edge: Tensor<B, 4>,
}

impl<B: Backend> CartoonBatch<B> {
    /// Assemble a step batch from a paired cartoon/edge batch and a photo
    /// batch. All three resulting tensors must agree on batch size and
    /// spatial dimensions.
    pub fn from_parts(
        pair: Tensor<B, 4>,
        real_photo: Tensor<B, 4>,
        image_size: usize,
    ) -> Result<Self, TrainError> {
        let (cartoon, edge) = split_pair(pair, image_size)?;
        let expected = cartoon.dims();
        let actual = real_photo.dims();
        if expected != actual {
            return Err(TrainError::shape_mismatch(
                "photo batch vs cartoon batch",
                &expected,
                &actual,
            ));
        }
        Ok(Self {
            real_photo,
            cartoon,
            edge,
        })
    }
}
