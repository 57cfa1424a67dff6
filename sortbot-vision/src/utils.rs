//! Tensor preparation helpers for embedding input

use crate::capability::ChannelStats;
use image::RgbImage;

/// Flatten an RGB image into a CHW float tensor scaled to [0, 1]
pub(crate) fn image_to_chw(image: &RgbImage) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let hw = width * height;

    let mut chw = vec![0.0f32; 3 * hw];
    for (x, y, pixel) in image.enumerate_pixels() {
        let idx = y as usize * width + x as usize;
        for c in 0..3 {
            chw[c * hw + idx] = pixel[c] as f32 / 255.0;
        }
    }

    chw
}

/// Apply per-channel normalization in place (CHW layout)
pub(crate) fn apply_channel_stats(data: &mut [f32], stats: &ChannelStats) {
    const CHANNELS: usize = 3;

    if data.len() < CHANNELS {
        return;
    }

    let hw = data.len() / CHANNELS;
    for c in 0..CHANNELS {
        let mean = stats.mean[c];
        let std = stats.std[c];

        // A zero std would blow the whole channel up
        if std == 0.0 {
            continue;
        }

        for value in &mut data[c * hw..(c + 1) * hw] {
            if value.is_finite() {
                *value = (*value - mean) / std;
                if !value.is_finite() {
                    *value = 0.0;
                }
            } else {
                *value = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_to_chw_layout() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, image::Rgb([255, 0, 0]));
        image.put_pixel(1, 0, image::Rgb([0, 255, 0]));

        let chw = image_to_chw(&image);
        assert_eq!(chw.len(), 6);
        // R channel: [1, 0], G channel: [0, 1], B channel: [0, 0]
        assert_eq!(&chw[0..2], &[1.0, 0.0]);
        assert_eq!(&chw[2..4], &[0.0, 1.0]);
        assert_eq!(&chw[4..6], &[0.0, 0.0]);
    }

    #[test]
    fn test_apply_channel_stats() {
        let mut data = vec![0.5; 6];
        let stats = ChannelStats {
            mean: [0.5, 0.25, 0.0],
            std: [1.0, 0.5, 0.25],
        };
        apply_channel_stats(&mut data, &stats);
        assert_eq!(&data[0..2], &[0.0, 0.0]);
        assert_eq!(&data[2..4], &[0.5, 0.5]);
        assert_eq!(&data[4..6], &[2.0, 2.0]);
    }

    #[test]
    fn test_apply_channel_stats_scrubs_non_finite() {
        let mut data = vec![0.5, f32::NAN, 0.5, 0.5, f32::INFINITY, 0.5];
        apply_channel_stats(&mut data, &ChannelStats::imagenet());
        for value in &data {
            assert!(value.is_finite());
        }
    }

    #[test]
    fn test_apply_channel_stats_empty() {
        let mut data: Vec<f32> = vec![];
        apply_channel_stats(&mut data, &ChannelStats::imagenet());
        assert!(data.is_empty());
    }
}
