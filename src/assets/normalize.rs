use crate::scene::{ModelAsset, Transform};
use glam::Vec3;

/// Recenter the model at the origin, scale its largest dimension to
/// `target_size`, then lift it so its lowest point rests on y = 0.
///
/// The offset lives on the model's pivot, leaving `transform` free for the
/// view rotation.
///
/// Returns the half-height of the normalized model, which the camera uses as
/// its vertical offset. An empty model is left untouched and yields 0.
pub fn normalize_model(model: &mut ModelAsset, target_size: f32) -> f32 {
    model.transform = Transform::default();
    model.pivot = Transform::default();
    let bounds = model.bounds();
    if bounds.is_empty() {
        return 0.0;
    }

    let max_dim = bounds.size().max_element();
    let scale = if max_dim > f32::EPSILON {
        target_size / max_dim
    } else {
        1.0
    };
    model.pivot.scale = Vec3::splat(scale);
    model.pivot.translation = -bounds.center() * scale;

    let measured = model.bounds();
    model.pivot.translation.y -= measured.min.y;
    measured.size().y * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Geometry, Material, MeshPrimitive, Node};

    fn box_model(min: Vec3, max: Vec3) -> ModelAsset {
        let mut model = ModelAsset::default();
        model
            .geometries
            .push(Geometry::new(vec![min, max, Vec3::new(min.x, max.y, min.z)], None));
        model.materials.push(Material::new("m", [1.0; 4]));
        model.add_node(Node {
            primitives: vec![MeshPrimitive {
                geometry: 0,
                material: 0,
            }],
            ..Node::default()
        });
        model
    }

    #[test]
    fn scales_to_target_and_sits_on_ground() {
        let mut model = box_model(Vec3::new(10.0, 10.0, 10.0), Vec3::new(14.0, 12.0, 11.0));
        let half_height = normalize_model(&mut model, 2.0);
        let bounds = model.bounds();
        assert!((bounds.size().max_element() - 2.0).abs() < 1e-5);
        assert!(bounds.min.y.abs() < 1e-5);
        assert!(bounds.center().x.abs() < 1e-5);
        assert!(bounds.center().z.abs() < 1e-5);
        assert!((half_height - 0.5).abs() < 1e-5);
    }

    #[test]
    fn empty_model_is_untouched() {
        let mut model = ModelAsset::default();
        assert_eq!(normalize_model(&mut model, 2.0), 0.0);
        assert_eq!(model.transform, Transform::default());
        assert_eq!(model.pivot, Transform::default());
    }

    #[test]
    fn rotation_turns_about_the_normalized_center() {
        let mut model = box_model(Vec3::new(10.0, 10.0, 10.0), Vec3::new(14.0, 12.0, 11.0));
        normalize_model(&mut model, 2.0);
        let rested = model.bounds();

        model.transform.rotation = glam::Quat::from_rotation_y(std::f32::consts::PI);
        let turned = model.bounds();
        assert!(turned.center().x.abs() < 1e-4);
        assert!(turned.center().z.abs() < 1e-4);
        assert!((turned.center().y - rested.center().y).abs() < 1e-4);
        assert!(turned.min.y.abs() < 1e-4);
    }
}
