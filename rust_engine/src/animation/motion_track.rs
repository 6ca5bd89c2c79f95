//! 动画轨道
//!
//! 存储单个骨骼、Morph 或全局通道的所有关键帧，按帧号升序排列。

use super::keyframe::Keyframe;

/// 动画轨道
#[derive(Clone, Debug, PartialEq)]
pub struct MotionTrack<K> {
    keyframes: Vec<K>,
}

impl<K> Default for MotionTrack<K> {
    fn default() -> Self {
        Self {
            keyframes: Vec::new(),
        }
    }
}

impl<K: Keyframe> MotionTrack<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入关键帧，同一帧号的旧关键帧被替换并返回
    pub fn insert_keyframe(&mut self, keyframe: K) -> Option<K> {
        match self
            .keyframes
            .binary_search_by_key(&keyframe.frame(), |k| k.frame())
        {
            Ok(index) => Some(std::mem::replace(&mut self.keyframes[index], keyframe)),
            Err(index) => {
                self.keyframes.insert(index, keyframe);
                None
            }
        }
    }

    /// 移除关键帧
    pub fn remove_keyframe(&mut self, frame: u64) -> Option<K> {
        self.keyframes
            .binary_search_by_key(&frame, |k| k.frame())
            .ok()
            .map(|index| self.keyframes.remove(index))
    }

    /// 查找精确帧
    pub fn find(&self, frame: u64) -> Option<&K> {
        self.keyframes
            .binary_search_by_key(&frame, |k| k.frame())
            .ok()
            .map(|index| &self.keyframes[index])
    }

    /// 查找包围 `frame` 的前后关键帧
    pub fn search_closest(&self, frame: f32) -> (Option<&K>, Option<&K>) {
        let index = self
            .keyframes
            .partition_point(|k| k.frame() as f32 <= frame);
        let prev = index.checked_sub(1).map(|i| &self.keyframes[i]);
        (prev, self.keyframes.get(index))
    }

    /// 求值指定帧（可为小数），区间外取端点值，空轨道返回 None
    pub fn seek(&self, frame: f32) -> Option<K::Value> {
        match self.search_closest(frame) {
            (Some(prev), Some(next)) => {
                let interval = (next.frame() - prev.frame()) as f32;
                let t = (frame - prev.frame() as f32) / interval;
                Some(prev.interpolate(next, t))
            }
            (Some(prev), None) => Some(prev.value()),
            (None, Some(next)) => Some(next.value()),
            (None, None) => None,
        }
    }

    pub fn keyframes(&self) -> &[K] {
        &self.keyframes
    }

    pub fn keyframes_mut(&mut self) -> impl Iterator<Item = &mut K> {
        self.keyframes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// 获取最大帧号
    pub fn max_frame_index(&self) -> u64 {
        self.keyframes.last().map_or(0, |k| k.frame())
    }
}

impl<K: Keyframe> FromIterator<K> for MotionTrack<K> {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        let mut track = Self::new();
        for keyframe in iter {
            track.insert_keyframe(keyframe);
        }
        track
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::keyframe::MorphKeyframe;

    fn track(frames: &[(u64, f32)]) -> MotionTrack<MorphKeyframe> {
        frames
            .iter()
            .map(|&(frame, weight)| MorphKeyframe::new(frame, weight, 256))
            .collect()
    }

    #[test]
    fn test_insert_keeps_order_and_replaces() {
        let mut track = track(&[(30, 0.3), (10, 0.1), (20, 0.2)]);
        let frames: Vec<u64> = track.keyframes().iter().map(|k| k.frame).collect();
        assert_eq!(frames, vec![10, 20, 30]);

        let old = track.insert_keyframe(MorphKeyframe::new(20, 0.9, 256));
        assert_eq!(old.map(|k| k.weight), Some(0.2));
        assert_eq!(track.len(), 3);
        assert_eq!(track.find(20).map(|k| k.weight), Some(0.9));
        assert_eq!(track.max_frame_index(), 30);
    }

    #[test]
    fn test_seek_brackets_and_clamps() {
        let track = track(&[(10, 0.0), (20, 1.0)]);
        assert_eq!(track.seek(0.0), Some(0.0));
        assert_eq!(track.seek(10.0), Some(0.0));
        assert!((track.seek(15.0).unwrap() - 0.5).abs() < 1e-6);
        assert!((track.seek(12.5).unwrap() - 0.25).abs() < 1e-6);
        assert_eq!(track.seek(20.0), Some(1.0));
        assert_eq!(track.seek(99.0), Some(1.0));
        assert_eq!(MotionTrack::<MorphKeyframe>::new().seek(1.0), None);
    }

    #[test]
    fn test_remove() {
        let mut track = track(&[(0, 0.0), (5, 1.0)]);
        assert!(track.remove_keyframe(3).is_none());
        assert!(track.remove_keyframe(5).is_some());
        assert_eq!(track.len(), 1);
    }
}
