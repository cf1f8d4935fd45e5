use glam::{Mat4, Quat, Vec3};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn from_trs(t: Vec3, r: Quat, s: Vec3) -> Self {
        Self {
            translation: t,
            rotation: r,
            scale: s,
        }
    }

    pub fn from_translation(t: Vec3) -> Self {
        Self {
            translation: t,
            ..Self::IDENTITY
        }
    }

    /// Places the transform at `eye` with -Z pointing at `target`.
    pub fn looking_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let view = Mat4::look_at_rh(eye, target, up);
        let (_, rotation, _) = view.inverse().to_scale_rotation_translation();
        Self {
            translation: eye,
            rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn from_matrix(matrix: Mat4) -> Self {
        let (scale, rotation, translation) = matrix.to_scale_rotation_translation();
        Self {
            translation,
            rotation: rotation.normalize(),
            scale,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// World-to-view matrix. Scale is ignored so cameras never skew.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation).inverse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn default_is_identity() {
        let m = Transform::default().matrix();
        assert!(m.abs_diff_eq(Mat4::IDENTITY, 1e-6));
    }

    #[test]
    fn translate_then_scale_ok() {
        let tr = Transform::from_trs(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY, Vec3::splat(2.0));
        let p = tr.matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        // (1,0,0) -> (2,0,0) -> (3,2,3)
        assert!(p.abs_diff_eq(Vec3::new(3.0, 2.0, 3.0), 1e-6));
    }

    #[test]
    fn basis_vectors_follow_rotation() {
        let tr = Transform::from_trs(
            Vec3::ZERO,
            Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            Vec3::ONE,
        );
        assert!(tr.forward().abs_diff_eq(Vec3::NEG_X, 1e-6));
        assert!(tr.right().abs_diff_eq(Vec3::NEG_Z, 1e-6));
        assert!(tr.up().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn looking_at_points_forward_at_target() {
        let tr = Transform::looking_at(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO, Vec3::Y);
        let expected = (Vec3::ZERO - Vec3::new(0.0, 2.0, 5.0)).normalize();
        assert!(tr.forward().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn view_matrix_maps_eye_to_origin() {
        let tr = Transform::looking_at(Vec3::new(3.0, 1.0, -2.0), Vec3::ZERO, Vec3::Y);
        let p = tr.view_matrix().transform_point3(tr.translation);
        assert!(p.abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    fn from_matrix_recovers_components() {
        let tr = Transform::from_trs(
            Vec3::new(1.0, -2.0, 0.5),
            Quat::from_rotation_x(0.3),
            Vec3::splat(1.5),
        );
        let back = Transform::from_matrix(tr.matrix());
        assert!(back.translation.abs_diff_eq(tr.translation, 1e-5));
        assert!(back.scale.abs_diff_eq(tr.scale, 1e-5));
        assert!(back.rotation.abs_diff_eq(tr.rotation, 1e-5));
    }
}
