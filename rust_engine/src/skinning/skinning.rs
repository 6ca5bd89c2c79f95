//! 顶点蒙皮计算

use glam::{Mat4, Quat, Vec3};

use super::{SkinningInput, SkinningOutput};
use crate::model::VertexWeight;

/// 权重和小于此值时顶点不变形
const MIN_WEIGHT_SUM: f32 = 1.0e-6;

/// 计算蒙皮
pub fn compute_skinning(input: &SkinningInput) -> SkinningOutput {
    let mut output = SkinningOutput::default();
    skin_into(input, &mut output);
    output
}

/// 计算蒙皮，复用输出缓冲区
pub fn skin_into(input: &SkinningInput, output: &mut SkinningOutput) {
    output.positions.clear();
    output.normals.clear();
    output.positions.reserve(input.positions.len());
    output.normals.reserve(input.positions.len());

    for ((position, normal), weight) in input
        .positions
        .iter()
        .zip(input.normals)
        .zip(input.weights)
    {
        let (position, normal) = skin_vertex(*position, *normal, weight, input.bone_matrices);
        output.positions.push(position);
        output.normals.push(normal);
    }
}

/// 计算单个顶点的蒙皮
pub fn skin_vertex(
    position: Vec3,
    normal: Vec3,
    weight: &VertexWeight,
    matrices: &[Mat4],
) -> (Vec3, Vec3) {
    match weight {
        VertexWeight::Bdef1 { bone } => {
            let m = get_matrix(matrices, *bone);
            (
                m.transform_point3(position),
                m.transform_vector3(normal).normalize_or_zero(),
            )
        }
        VertexWeight::Bdef2 { bones, weight } => {
            let m0 = get_matrix(matrices, bones[0]);
            let m1 = get_matrix(matrices, bones[1]);
            let w0 = *weight;
            let w1 = 1.0 - w0;

            let pos = m0.transform_point3(position) * w0 + m1.transform_point3(position) * w1;
            let norm = m0.transform_vector3(normal) * w0 + m1.transform_vector3(normal) * w1;
            (pos, norm.normalize_or_zero())
        }
        VertexWeight::Bdef4 { bones, weights } | VertexWeight::Qdef { bones, weights } => {
            let sum: f32 = weights.iter().sum();
            if sum.abs() < MIN_WEIGHT_SUM {
                return (position, normal);
            }

            let mut pos = Vec3::ZERO;
            let mut norm = Vec3::ZERO;
            for (&bone, &w) in bones.iter().zip(weights) {
                if w == 0.0 {
                    continue;
                }
                let m = get_matrix(matrices, bone);
                let w = w / sum;
                pos += m.transform_point3(position) * w;
                norm += m.transform_vector3(normal) * w;
            }
            (pos, norm.normalize_or_zero())
        }
        VertexWeight::Sdef { bones, weight, c, r0, r1 } => {
            let m0 = get_matrix(matrices, bones[0]);
            let m1 = get_matrix(matrices, bones[1]);
            sdef(position, normal, m0, m1, *weight, *c, *r0, *r1)
        }
    }
}

/// 球面变形：绕修正后的中心点做旋转插值
#[allow(clippy::too_many_arguments)]
fn sdef(
    position: Vec3,
    normal: Vec3,
    m0: Mat4,
    m1: Mat4,
    w0: f32,
    c: Vec3,
    r0: Vec3,
    r1: Vec3,
) -> (Vec3, Vec3) {
    let w1 = 1.0 - w0;

    // 按权重修正 R0/R1，使加权中心与 C 一致
    let rw = r0 * w0 + r1 * w1;
    let cr0 = (c + (c + r0 - rw)) * 0.5;
    let cr1 = (c + (c + r1 - rw)) * 0.5;

    let q0 = Quat::from_mat4(&m0).normalize();
    let mut q1 = Quat::from_mat4(&m1).normalize();
    if q0.dot(q1) < 0.0 {
        q1 = -q1;
    }
    let rotation = q0.slerp(q1, w1);

    let pos = rotation * (position - c)
        + m0.transform_point3(cr0) * w0
        + m1.transform_point3(cr1) * w1;
    (pos, (rotation * normal).normalize_or_zero())
}

fn get_matrix(matrices: &[Mat4], index: i32) -> Mat4 {
    usize::try_from(index)
        .ok()
        .and_then(|i| matrices.get(i).copied())
        .unwrap_or(Mat4::IDENTITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Vec3, b: Vec3) -> bool {
        (a - b).length() < 1e-5
    }

    #[test]
    fn test_bdef1_and_bdef2() {
        let matrices = [Mat4::IDENTITY, Mat4::from_translation(Vec3::new(2.0, 0.0, 0.0))];
        let (pos, norm) = skin_vertex(Vec3::ONE, Vec3::Y, &VertexWeight::Bdef1 { bone: 1 }, &matrices);
        assert!(close(pos, Vec3::new(3.0, 1.0, 1.0)));
        assert!(close(norm, Vec3::Y));

        let weight = VertexWeight::Bdef2 {
            bones: [0, 1],
            weight: 0.25,
        };
        let (pos, _) = skin_vertex(Vec3::ZERO, Vec3::Y, &weight, &matrices);
        assert!(close(pos, Vec3::new(1.5, 0.0, 0.0)));
    }

    #[test]
    fn test_bdef4_normalizes_weights() {
        let matrices = [Mat4::IDENTITY, Mat4::from_translation(Vec3::new(4.0, 0.0, 0.0))];
        let weight = VertexWeight::Bdef4 {
            bones: [0, 1, -1, -1],
            weights: [0.6, 0.2, 0.0, 0.0],
        };
        let (pos, _) = skin_vertex(Vec3::ZERO, Vec3::Y, &weight, &matrices);
        // 0.75 × 0 + 0.25 × 4
        assert!(close(pos, Vec3::new(1.0, 0.0, 0.0)));
    }

    #[test]
    fn test_zero_weight_sum_is_untransformed() {
        let matrices = [Mat4::from_translation(Vec3::X)];
        let weight = VertexWeight::Qdef {
            bones: [0, 0, 0, 0],
            weights: [0.0; 4],
        };
        let (pos, norm) = skin_vertex(Vec3::ONE, Vec3::Z, &weight, &matrices);
        assert_eq!(pos, Vec3::ONE);
        assert_eq!(norm, Vec3::Z);
    }

    #[test]
    fn test_sdef_matches_rigid_transform() {
        // 两骨骼相同变换时等价于刚体变换
        let m = Mat4::from_rotation_translation(Quat::from_rotation_z(0.7), Vec3::new(1.0, 2.0, 3.0));
        let weight = VertexWeight::Sdef {
            bones: [0, 1],
            weight: 0.3,
            c: Vec3::new(0.0, 1.0, 0.0),
            r0: Vec3::new(0.0, 0.5, 0.0),
            r1: Vec3::new(0.0, 1.5, 0.0),
        };
        let position = Vec3::new(0.2, 1.1, 0.0);
        let (pos, norm) = skin_vertex(position, Vec3::X, &weight, &[m, m]);
        assert!(close(pos, m.transform_point3(position)));
        assert!(close(norm, m.transform_vector3(Vec3::X)));
    }

    #[test]
    fn test_compute_skinning_buffers() {
        let positions = [Vec3::ZERO, Vec3::Y];
        let normals = [Vec3::Y, Vec3::Y];
        let weights = [VertexWeight::Bdef1 { bone: 0 }, VertexWeight::Bdef1 { bone: -1 }];
        let matrices = [Mat4::from_translation(Vec3::Z)];
        let output = compute_skinning(&SkinningInput {
            positions: &positions,
            normals: &normals,
            weights: &weights,
            bone_matrices: &matrices,
        });
        assert_eq!(output.positions.len(), 2);
        assert!(close(output.positions[0], Vec3::Z));
        // 无骨骼的顶点保持原位
        assert!(close(output.positions[1], Vec3::Y));
    }
}
