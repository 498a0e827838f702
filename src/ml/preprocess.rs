//! 画像の前処理
//!
//! 学習時と推論時で必ず同じ変換を使うこと。正規化が食い違っても
//! エラーにはならず、信頼度が無意味な値になるだけなので、使用した
//! 正規化はモデルのメタデータに記録して推論時にそれを適用します。

use image::{imageops::FilterType, DynamicImage, RgbImage};
use serde::{Deserialize, Serialize};

/// ImageNetの平均値 (RGB)
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNetの標準偏差 (RGB)
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 入力画素の正規化方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// x/255 の後にImageNetの平均と標準偏差で正規化
    #[default]
    ImageNet,
    /// x/255 のみ
    UnitScale,
}

impl Normalization {
    #[inline]
    pub fn apply(&self, value: u8, channel: usize) -> f32 {
        let v = value as f32 / 255.0;
        match self {
            Normalization::ImageNet => (v - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
            Normalization::UnitScale => v,
        }
    }
}

/// RGB8に変換して正方形にリサイズ
pub fn resize_rgb(image: &DynamicImage, size: u32) -> RgbImage {
    image
        .resize_exact(size, size, FilterType::Triangle)
        .to_rgb8()
}

/// RGB画像を (C, H, W) の順で平坦化して正規化
pub fn normalize_chw(image: &RgbImage, normalization: Normalization) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let num_pixels = (width * height) as usize;

    let mut data = vec![0.0f32; 3 * num_pixels];
    for (i, pixel) in image.pixels().enumerate() {
        for channel in 0..3 {
            data[channel * num_pixels + i] = normalization.apply(pixel[channel], channel);
        }
    }
    data
}

/// デコード済み画像をモデル入力に変換
pub fn preprocess(image: &DynamicImage, size: u32, normalization: Normalization) -> Vec<f32> {
    normalize_chw(&resize_rgb(image, size), normalization)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_chw_layout() {
        let mut img = RgbImage::new(2, 2);
        img.put_pixel(1, 0, Rgb([255, 0, 0]));

        let data = normalize_chw(&img, Normalization::UnitScale);
        assert_eq!(data.len(), 12);
        // Rプレーンの2番目の画素
        assert_eq!(data[1], 1.0);
        // G/Bプレーンは全て0
        assert!(data[4..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_imagenet_normalization() {
        let n = Normalization::ImageNet;
        let expected = (1.0 - IMAGENET_MEAN[2]) / IMAGENET_STD[2];
        assert!((n.apply(255, 2) - expected).abs() < 1e-6);
        let expected = (0.0 - IMAGENET_MEAN[0]) / IMAGENET_STD[0];
        assert!((n.apply(0, 0) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_resizes_any_input() {
        let img = DynamicImage::ImageRgba8(image::RgbaImage::new(300, 120));
        let data = preprocess(&img, 224, Normalization::ImageNet);
        assert_eq!(data.len(), 3 * 224 * 224);
    }
}
