use image::GrayImage;

/// 运动矢量场：每个网格单元一个位移 (dx, dy)，单位为像素
///
/// 正 dx 表示向右运动，正 dy 表示向下运动。
#[derive(Debug, Clone, PartialEq)]
pub struct MotionField {
    width: usize,
    height: usize,
    dx: Vec<f32>,
    dy: Vec<f32>,
}

impl MotionField {
    pub fn zeros(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            dx: vec![0.0; width * height],
            dy: vec![0.0; width * height],
        }
    }

    /// 由一个函数逐单元生成矢量场
    pub fn from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> (f32, f32)) -> Self {
        let mut field = Self::zeros(width, height);
        for y in 0..height {
            for x in 0..width {
                field.set(x, y, f(x, y));
            }
        }
        field
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn len(&self) -> usize {
        self.dx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dx.is_empty()
    }

    pub fn set(&mut self, x: usize, y: usize, (dx, dy): (f32, f32)) {
        let i = y * self.width + x;
        self.dx[i] = dx;
        self.dy[i] = dy;
    }

    pub fn vector(&self, x: usize, y: usize) -> (f32, f32) {
        let i = y * self.width + x;
        (self.dx[i], self.dy[i])
    }

    pub fn magnitude(&self, x: usize, y: usize) -> f64 {
        let (dx, dy) = self.vector(x, y);
        (dx as f64).hypot(dy as f64)
    }

    /// 方向角，atan2(dy, dx)，范围 [-π, π]
    pub fn angle(&self, x: usize, y: usize) -> f64 {
        let (dx, dy) = self.vector(x, y);
        (dy as f64).atan2(dx as f64)
    }

    pub fn mean_magnitude(&self) -> f64 {
        if self.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .dx
            .iter()
            .zip(&self.dy)
            .map(|(&dx, &dy)| (dx as f64).hypot(dy as f64))
            .sum();
        sum / self.len() as f64
    }

    /// 两个矢量场逐单元差值的模长，形状不一致时返回 None
    pub fn difference_magnitudes(&self, other: &MotionField) -> Option<Vec<f64>> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        Some(
            (0..self.len())
                .map(|i| {
                    let ddx = (self.dx[i] - other.dx[i]) as f64;
                    let ddy = (self.dy[i] - other.dy[i]) as f64;
                    ddx.hypot(ddy)
                })
                .collect(),
        )
    }
}

/// 运动估计后端：根据前后两帧灰度图估计位移场
pub trait MotionEstimator: Send + Sync {
    fn estimate(&self, prev: &GrayImage, curr: &GrayImage) -> MotionField;
}

/// 块匹配运动估计（SAD 全搜索）
#[derive(Debug, Clone, Copy)]
pub struct BlockMatchEstimator {
    block_size: u32,
    search_radius: u32,
}

/// 运动长度惩罚，SAD 相同时优先选择零运动
const MOTION_LAMBDA: f64 = 0.01;
const MIN_BLOCK_SIZE: u32 = 2;

impl Default for BlockMatchEstimator {
    fn default() -> Self {
        Self::new(8, 4)
    }
}

impl BlockMatchEstimator {
    pub fn new(block_size: u32, search_radius: u32) -> Self {
        Self {
            block_size: block_size.max(MIN_BLOCK_SIZE),
            search_radius,
        }
    }

    /// 在 curr 中为 prev 的 (bx, by) 块寻找最佳匹配位置
    fn search_best_match(&self, prev: &GrayImage, curr: &GrayImage, bx: u32, by: u32) -> (f32, f32) {
        let (width, height) = prev.dimensions();
        let block_w = self.block_size.min(width - bx);
        let block_h = self.block_size.min(height - by);
        let radius = self.search_radius as i64;

        let mut best_cost = f64::MAX;
        let mut best = (0i64, 0i64);

        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let cx = bx as i64 + dx;
                let cy = by as i64 + dy;
                if cx < 0 || cy < 0 || cx + block_w as i64 > width as i64 || cy + block_h as i64 > height as i64 {
                    continue;
                }

                let mut sad = 0u64;
                for y in 0..block_h {
                    for x in 0..block_w {
                        let a = prev.get_pixel(bx + x, by + y)[0] as i32;
                        let b = curr.get_pixel(cx as u32 + x, cy as u32 + y)[0] as i32;
                        sad += (a - b).unsigned_abs() as u64;
                    }
                }

                let cost = sad as f64 + ((dx * dx + dy * dy) as f64).sqrt() * MOTION_LAMBDA;
                if cost < best_cost {
                    best_cost = cost;
                    best = (dx, dy);
                }
            }
        }

        (best.0 as f32, best.1 as f32)
    }
}

impl MotionEstimator for BlockMatchEstimator {
    fn estimate(&self, prev: &GrayImage, curr: &GrayImage) -> MotionField {
        if prev.dimensions() != curr.dimensions() || prev.width() == 0 || prev.height() == 0 {
            return MotionField::zeros(0, 0);
        }

        let (width, height) = prev.dimensions();
        let cols = ((width + self.block_size - 1) / self.block_size) as usize;
        let rows = ((height + self.block_size - 1) / self.block_size) as usize;

        let mut field = MotionField::zeros(cols, rows);
        for row in 0..rows {
            for col in 0..cols {
                let bx = col as u32 * self.block_size;
                let by = row as u32 * self.block_size;
                field.set(col, row, self.search_best_match(prev, curr, bx, by));
            }
        }
        field
    }
}
