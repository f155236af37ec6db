//! 積分画像（Summed-Area Table）
//!
//! 上端と左端に 0 の行・列を 1 つずつ足した `(width + 1) x (height + 1)` の
//! テーブルとして保持するため、窓の合計に範囲チェックが要りません。

use crate::Image;
use image::Luma;

/// f64 で累積した単一チャンネルの積分画像
#[derive(Debug, Clone)]
pub struct SummedAreaTable {
    data: Vec<f64>,
    width: u32,
    height: u32,
}

/// 画像から積分画像を作成するトレイト
pub trait CreateSummedAreaTable {
    fn create_summed_area_table(&self) -> SummedAreaTable;
}

/// f32 画像は精度を保つため f64 で累積します
impl CreateSummedAreaTable for Image<Luma<f32>> {
    fn create_summed_area_table(&self) -> SummedAreaTable {
        let (width, height) = self.dimensions();
        SummedAreaTable::from_plane(self.as_raw(), width, height)
    }
}

impl SummedAreaTable {
    /// 行優先の単一チャンネルデータから作成する
    ///
    /// `data` が `width * height` より短い場合、不足分は 0 として扱います。
    #[must_use]
    pub fn from_plane(data: &[f32], width: u32, height: u32) -> Self {
        let w = width as usize;
        let h = height as usize;
        let stride = w + 1;
        let mut table = vec![0.0f64; stride * (h + 1)];

        for y in 0..h {
            let mut row_sum = 0.0f64;
            for x in 0..w {
                row_sum += data.get(y * w + x).copied().map_or(0.0, f64::from);
                table[(y + 1) * stride + x + 1] = row_sum + table[y * stride + x + 1];
            }
        }

        Self {
            data: table,
            width,
            height,
        }
    }

    #[inline]
    fn at(&self, x: u32, y: u32) -> f64 {
        self.data[y as usize * (self.width as usize + 1) + x as usize]
    }

    /// 半開区間 `[x0, x1) x [y0, y1)` の合計
    ///
    /// 端点は画像サイズに切り詰められます。
    #[must_use]
    pub fn window_sum(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        let x0 = x0.min(x1);
        let y0 = y0.min(y1);
        self.at(x1, y1) - self.at(x0, y1) - self.at(x1, y0) + self.at(x0, y0)
    }

    /// `(x, y)` を中心とする窓の平均
    ///
    /// 窓は画像内に切り詰められ、実際に含まれるピクセル数で割ります。
    #[must_use]
    pub fn window_mean(&self, x: u32, y: u32, x_radius: u32, y_radius: u32) -> f64 {
        let x0 = x.saturating_sub(x_radius);
        let y0 = y.saturating_sub(y_radius);
        let x1 = x.saturating_add(x_radius).saturating_add(1).min(self.width);
        let y1 = y.saturating_add(y_radius).saturating_add(1).min(self.height);
        let area = f64::from(x1 - x0) * f64::from(y1 - y0);
        if area == 0.0 {
            return 0.0;
        }
        self.window_sum(x0, y0, x1, y1) / area
    }

    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn table_3x3() -> SummedAreaTable {
        SummedAreaTable::from_plane(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0], 3, 3)
    }

    #[test]
    fn window_sums() {
        let sat = table_3x3();
        assert_eq!(sat.window_sum(0, 0, 3, 3), 45.0);
        assert_eq!(sat.window_sum(1, 1, 2, 2), 5.0);
        assert_eq!(sat.window_sum(0, 0, 2, 2), 12.0);
        assert_eq!(sat.window_sum(2, 0, 3, 3), 18.0);
    }

    #[test]
    fn windows_are_clipped_to_the_image() {
        let sat = table_3x3();
        assert_eq!(sat.window_sum(0, 0, 100, 100), 45.0);
        assert_eq!(sat.window_sum(2, 2, 1, 1), 0.0);
        // 角の窓は 4 ピクセルだけを含む
        assert!((sat.window_mean(0, 0, 1, 1) - 3.0).abs() < 1e-12);
        assert!((sat.window_mean(1, 1, 5, 5) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn float_table_uses_double_precision() {
        let image: Image<Luma<f32>> = ImageBuffer::from_pixel(4, 4, Luma([0.25]));
        let sat = image.create_summed_area_table();
        assert!((sat.window_sum(0, 0, 4, 4) - 4.0).abs() < 1e-12);
        assert!((sat.window_sum(1, 1, 3, 3) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn short_data_is_zero_padded() {
        let sat = SummedAreaTable::from_plane(&[1.0, 1.0], 2, 2);
        assert_eq!(sat.window_sum(0, 0, 2, 2), 2.0);
    }
}
