//! 引擎配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 表大小等参数在加载时读取，修改后只影响之后加载的数据。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 引擎配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // ========== 插值 ==========
    /// VMD 插值曲线查找表分辨率，默认 256
    pub vmd_interpolation_table_size: usize,
    /// MVD 插值曲线查找表分辨率，默认 128
    pub mvd_interpolation_table_size: usize,

    // ========== Morph ==========
    /// 组/翻转 Morph 的最大递归深度，默认 16
    /// 超过深度的子 Morph 会被跳过并输出警告
    pub morph_recursion_limit: usize,

    // ========== PMD ==========
    /// PMD 模型是否为名称含「ひざ」的 IK 关节添加膝盖角度限制，默认 true
    pub pmd_knee_limits: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // 分辨率越高曲线越精确，但每个关键帧占用更多内存
            vmd_interpolation_table_size: 256,
            mvd_interpolation_table_size: 128,

            // 正常模型的组 Morph 嵌套很少超过 3 层
            morph_recursion_limit: 16,

            pmd_knee_limits: true,
        }
    }
}

/// 全局配置实例
static ENGINE_CONFIG: Lazy<RwLock<EngineConfig>> = Lazy::new(|| {
    RwLock::new(EngineConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> EngineConfig {
    match ENGINE_CONFIG.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: EngineConfig) {
    match ENGINE_CONFIG.write() {
        Ok(mut guard) => *guard = config,
        Err(poisoned) => *poisoned.into_inner() = config,
    }
}

/// 重置为默认配置
pub fn reset_config() {
    set_config(EngineConfig::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.vmd_interpolation_table_size, 256);
        assert_eq!(config.mvd_interpolation_table_size, 128);
        assert!(config.morph_recursion_limit > 0);
        assert!(config.pmd_knee_limits);
    }
}
