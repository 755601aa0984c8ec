use super::pick::Ray;
use glam::{Mat4, Vec2, Vec3};

/// Perspective camera on the +Z axis, looking down -Z at the model.
///
/// `height` lifts the camera to the model's half-height so a normalized model
/// resting on y = 0 sits in the middle of the view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub distance: f32,
    pub height: f32,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    pub fn new(fov_y_deg: f32, distance: f32) -> Self {
        Self {
            distance,
            height: 0.0,
            fov_y: fov_y_deg.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }

    pub fn set_viewport(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.aspect = width / height;
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(0.0, self.height, self.distance)
    }

    pub fn forward(&self) -> Vec3 {
        Vec3::NEG_Z
    }

    pub fn view_matrix(&self) -> Mat4 {
        let eye = self.position();
        Mat4::look_at_rh(eye, eye + self.forward(), Vec3::Y)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov_y, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    /// World-space ray through a point in normalized device coordinates.
    pub fn ray_from_ndc(&self, ndc: Vec2) -> Ray {
        let inverse = self.view_projection().inverse();
        let near = inverse.project_point3(ndc.extend(-1.0));
        let far = inverse.project_point3(ndc.extend(1.0));
        let origin = self.position();
        let dir = (far - near).normalize_or_zero();
        Ray::new(origin, if dir == Vec3::ZERO { self.forward() } else { dir })
    }

    /// Project a world point to NDC. None when it is behind the camera.
    pub fn project(&self, point: Vec3) -> Option<Vec3> {
        let clip = self.view_projection() * point.extend(1.0);
        if clip.w <= 0.0 {
            return None;
        }
        Some(clip.truncate() / clip.w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_ray_looks_down_negative_z() {
        let mut camera = Camera::new(75.0, 5.0);
        camera.height = 0.5;
        let ray = camera.ray_from_ndc(Vec2::ZERO);
        assert!((ray.origin - Vec3::new(0.0, 0.5, 5.0)).length() < 1e-5);
        assert!((ray.dir - Vec3::NEG_Z).length() < 1e-4);
    }

    #[test]
    fn ray_passes_through_projected_point() {
        let mut camera = Camera::new(60.0, 4.0);
        camera.set_viewport(800.0, 400.0);
        let target = Vec3::new(0.7, -0.3, 0.2);
        let ndc = camera.project(target).unwrap();
        let ray = camera.ray_from_ndc(ndc.truncate());
        let to_target = (target - ray.origin).normalize();
        assert!(ray.dir.dot(to_target) > 0.9999);
    }

    #[test]
    fn point_behind_camera_does_not_project() {
        let camera = Camera::new(75.0, 5.0);
        assert!(camera.project(Vec3::new(0.0, 0.0, 10.0)).is_none());
    }
}
