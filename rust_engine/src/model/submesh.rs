//! 子网格（按材质划分的索引区间）

/// 子网格
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubMesh {
    pub begin_index: u32,
    pub index_count: u32,
    pub material_index: i32,
}

impl SubMesh {
    pub fn new(begin_index: u32, index_count: u32, material_index: i32) -> Self {
        Self {
            begin_index,
            index_count,
            material_index,
        }
    }

    /// 区间末尾（不含）
    pub fn end_index(&self) -> u32 {
        self.begin_index + self.index_count
    }
}
