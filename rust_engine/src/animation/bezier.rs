//! 贝塞尔曲线插值
//!
//! 控制点以 0~127 的字节保存，曲线经过 (0,0) 和 (1,1)。
//! 每个关键帧持有自己的查找表，由 (控制点, 表大小) 纯函数生成。

/// 默认控制点（线性）
pub const DEFAULT_INTERPOLATION: [u8; 4] = [20, 20, 107, 107];

/// 归一化后的三次贝塞尔曲线
#[derive(Clone, Copy, Debug)]
struct BezierCurve {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl BezierCurve {
    fn from_params(params: [u8; 4]) -> Self {
        Self {
            x1: params[0] as f32 / 127.0,
            y1: params[1] as f32 / 127.0,
            x2: params[2] as f32 / 127.0,
            y2: params[3] as f32 / 127.0,
        }
    }

    /// 求 x(s) = x 时的 y(s)；x(s) 在 [0,1] 上单调，用二分法
    fn solve(&self, x: f32) -> f32 {
        if x <= 0.0 {
            return 0.0;
        }
        if x >= 1.0 {
            return 1.0;
        }
        let (mut lo, mut hi) = (0.0f32, 1.0f32);
        let mut s = x;
        for _ in 0..32 {
            s = (lo + hi) * 0.5;
            let value = self.bezier_x(s);
            if (value - x).abs() < 1e-7 {
                break;
            }
            if value < x {
                lo = s;
            } else {
                hi = s;
            }
        }
        self.bezier_y(s)
    }

    fn bezier_x(&self, s: f32) -> f32 {
        let t = 1.0 - s;
        3.0 * t * t * s * self.x1 + 3.0 * t * s * s * self.x2 + s * s * s
    }

    fn bezier_y(&self, s: f32) -> f32 {
        let t = 1.0 - s;
        3.0 * t * t * s * self.y1 + 3.0 * t * s * s * self.y2 + s * s * s
    }
}

/// 控制点 x1 == y1 且 x2 == y2 时曲线退化为直线
pub fn is_linear(params: [u8; 4]) -> bool {
    params[0] == params[1] && params[2] == params[3]
}

/// 生成查找表：第 i 项为 x = i / (size - 1) 处的缓动值
pub fn build_table(params: [u8; 4], size: usize) -> Vec<f32> {
    let size = size.max(2);
    let curve = BezierCurve::from_params(params);
    let step = 1.0 / (size - 1) as f32;
    (0..size).map(|i| curve.solve(i as f32 * step)).collect()
}

/// 单个通道的插值曲线
#[derive(Clone, Debug, PartialEq)]
pub struct InterpolationCurve {
    params: [u8; 4],
    table_size: usize,
    /// 线性曲线不建表
    table: Option<Vec<f32>>,
}

impl InterpolationCurve {
    pub fn new(params: [u8; 4], table_size: usize) -> Self {
        let table = (!is_linear(params)).then(|| build_table(params, table_size));
        Self {
            params,
            table_size,
            table,
        }
    }

    /// 默认（线性）曲线
    pub fn linear(table_size: usize) -> Self {
        Self::new(DEFAULT_INTERPOLATION, table_size)
    }

    pub fn params(&self) -> [u8; 4] {
        self.params
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn is_linear(&self) -> bool {
        self.table.is_none()
    }

    /// 更新控制点并重建查找表
    pub fn set_params(&mut self, params: [u8; 4]) {
        if params != self.params {
            *self = Self::new(params, self.table_size);
        }
    }

    /// 以新的表大小重建
    pub fn resize(&mut self, table_size: usize) {
        if table_size != self.table_size {
            *self = Self::new(self.params, table_size);
        }
    }

    /// 把线性时间比例 `t` 转换为缓动后的比例
    pub fn evaluate(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        let Some(table) = &self.table else {
            return t;
        };
        let position = t * (table.len() - 1) as f32;
        let index = (position.floor() as usize).min(table.len() - 2);
        let fraction = position - index as f32;
        table[index] + (table[index + 1] - table[index]) * fraction
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_skips_table() {
        let curve = InterpolationCurve::linear(256);
        assert!(curve.is_linear());
        assert_eq!(curve.evaluate(0.3), 0.3);

        let curve = InterpolationCurve::new([64, 64, 64, 64], 256);
        assert!(curve.is_linear());
    }

    #[test]
    fn test_ease_in_out() {
        let curve = InterpolationCurve::new([127, 0, 0, 127], 256);
        assert!(!curve.is_linear());
        assert_eq!(curve.evaluate(0.0), 0.0);
        assert!((curve.evaluate(1.0) - 1.0).abs() < 1e-6);
        // 对称曲线在中点取 0.5
        assert!((curve.evaluate(0.5) - 0.5).abs() < 1e-3);
        assert!(curve.evaluate(0.25) < 0.25);
        assert!(curve.evaluate(0.75) > 0.75);
    }

    #[test]
    fn test_table_is_pure_and_sized() {
        let params = [10, 90, 30, 120];
        assert_eq!(build_table(params, 128), build_table(params, 128));
        assert_eq!(build_table(params, 128).len(), 128);

        let mut curve = InterpolationCurve::new(params, 128);
        let copy = curve.clone();
        curve.resize(256);
        assert_eq!(curve.table_size(), 256);
        assert_eq!(copy.table_size(), 128);
        assert!((curve.evaluate(0.4) - copy.evaluate(0.4)).abs() < 1e-2);
    }

    #[test]
    fn test_set_params_rebuilds() {
        let mut curve = InterpolationCurve::linear(64);
        curve.set_params([100, 10, 110, 20]);
        assert!(!curve.is_linear());
        assert_eq!(curve.params(), [100, 10, 110, 20]);
        curve.set_params(DEFAULT_INTERPOLATION);
        assert!(curve.is_linear());
    }
}
