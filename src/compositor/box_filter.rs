use crate::compositor::summed_area_table::CreateSummedAreaTable;
use crate::error::BoxFilterError;
use crate::Image;
use image::{ImageBuffer, Luma};

/// 積分画像を使用したボックスフィルタ操作を提供するトレイト
///
/// 窓は `(2 * radius + 1)` 四方で、画像の端では窓を切り詰め、
/// 実際に含まれるピクセル数で割った平均を返します。
/// デバイス側の分離型ボックス平均と同じ定義です。
pub trait BoxFilter {
    /// フィルタ処理の出力型
    type Output;

    /// フィルタ処理で発生する可能性のあるエラー型
    type Error;

    /// X方向とY方向の半径を指定してボックス平均を計算する
    ///
    /// # エラー
    ///
    /// * 空の画像に対して処理を実行した場合
    fn box_filter(&self, x_radius: u32, y_radius: u32) -> Result<Self::Output, Self::Error>;

    /// 正方形のカーネルでボックス平均を計算する
    fn box_filter_square(&self, radius: u32) -> Result<Self::Output, Self::Error> {
        self.box_filter(radius, radius)
    }
}

impl BoxFilter for Image<Luma<f32>> {
    type Output = Self;
    type Error = BoxFilterError;

    fn box_filter(&self, x_radius: u32, y_radius: u32) -> Result<Self::Output, Self::Error> {
        let (width, height) = self.dimensions();

        if width == 0 || height == 0 {
            return Err(BoxFilterError::EmptyImage);
        }

        let sat = self.create_summed_area_table();
        Ok(ImageBuffer::from_fn(width, height, |x, y| {
            Luma([sat.window_mean(x, y, x_radius, y_radius) as f32])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_image_is_unchanged() {
        let image: Image<Luma<f32>> = ImageBuffer::from_pixel(9, 7, Luma([0.4]));
        let filtered = image.box_filter_square(3).unwrap();
        for p in filtered.pixels() {
            assert!((p[0] - 0.4).abs() < 1e-6);
        }
    }

    #[test]
    fn border_windows_are_clipped() {
        let image: Image<Luma<f32>> =
            ImageBuffer::from_raw(3, 1, vec![0.0, 3.0, 6.0]).unwrap();
        let filtered = image.box_filter(1, 0).unwrap();

        // 左端: (0 + 3) / 2, 中央: (0 + 3 + 6) / 3, 右端: (3 + 6) / 2
        assert!((filtered.get_pixel(0, 0)[0] - 1.5).abs() < 1e-6);
        assert!((filtered.get_pixel(1, 0)[0] - 3.0).abs() < 1e-6);
        assert!((filtered.get_pixel(2, 0)[0] - 4.5).abs() < 1e-6);
    }

    #[test]
    fn radius_larger_than_image_averages_everything() {
        let image: Image<Luma<f32>> =
            ImageBuffer::from_raw(2, 2, vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let filtered = image.box_filter_square(10).unwrap();
        for p in filtered.pixels() {
            assert!((p[0] - 2.5).abs() < 1e-6);
        }
    }

    #[test]
    fn empty_image_is_rejected() {
        let image: Image<Luma<f32>> = ImageBuffer::new(0, 4);
        assert_eq!(image.box_filter_square(1), Err(BoxFilterError::EmptyImage));
    }

    #[test]
    fn zero_radius_is_identity() {
        let image: Image<Luma<f32>> =
            ImageBuffer::from_raw(2, 2, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        let filtered = image.box_filter_square(0).unwrap();
        assert_eq!(filtered.as_raw(), image.as_raw());
    }
}
