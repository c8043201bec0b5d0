//! Integration tests for renderables inside a scene.

use std::sync::Arc;

use oxygen_core::AssetKey;
use oxygen_core::math::{Vec3, mat4_translation};
use oxygen_scene::{
    DistancePolicy, GeometryAsset, LightComponent, LodPolicy, MaterialAsset, Mesh,
    NormalizedDistance, RenderableComponent, Scene, SceneError,
};
use rstest::{fixture, rstest};

#[fixture]
fn geometry() -> Arc<GeometryAsset> {
    let material = Arc::new(MaterialAsset::default().with_base_color([0.2, 0.4, 0.6, 1.0]));
    let lods = (0..3)
        .map(|i| Arc::new(Mesh::cube(format!("lod{i}"), 2.0, Some(material.clone()))))
        .collect();
    Arc::new(GeometryAsset::new(AssetKey::from_u64(7), "crate", lods))
}

#[rstest]
fn test_renderable_follows_parent_transform(geometry: Arc<GeometryAsset>) {
    let mut scene = Scene::new("world");
    let parent = scene.create_node("parent");
    let child = scene.create_child(parent, "child").unwrap();
    scene
        .add_component(child, RenderableComponent::new(geometry))
        .unwrap();
    scene
        .node_mut(parent)
        .unwrap()
        .transform_mut()
        .set_position(Vec3::new(0.0, 5.0, 0.0));
    scene.update_transforms();

    let renderable = scene.component::<RenderableComponent>(child).unwrap();
    assert_eq!(renderable.world_bounding_sphere().center, Vec3::new(0.0, 5.0, 0.0));
    assert_eq!(mat4_translation(renderable.world_matrix()), Vec3::new(0.0, 5.0, 0.0));
}

#[rstest]
#[case::near(1.0, 0)]
#[case::middle(15.0, 1)]
#[case::far(500.0, 2)]
fn test_distance_lod_selection(
    geometry: Arc<GeometryAsset>,
    #[case] distance: f32,
    #[case] expected: usize,
) {
    let mut renderable = RenderableComponent::new(geometry)
        .with_policy(LodPolicy::Distance(DistancePolicy::new(vec![10.0, 100.0], 0.1)));
    assert_eq!(renderable.select_active_mesh_distance(NormalizedDistance(distance)), expected);
    assert_eq!(
        renderable.active_mesh().unwrap().name(),
        format!("lod{expected}")
    );
}

#[rstest]
fn test_components_are_typed(geometry: Arc<GeometryAsset>) {
    let mut scene = Scene::new("world");
    let node = scene.create_node("lamp");
    scene.add_component(node, LightComponent::point(3.0, 2.0)).unwrap();
    assert!(matches!(
        scene.add_component(node, LightComponent::point(1.0, 1.0)),
        Err(SceneError::ComponentExists(_))
    ));

    let old: LightComponent = scene
        .replace_component::<LightComponent, RenderableComponent>(
            node,
            RenderableComponent::new(geometry),
        )
        .unwrap();
    assert_eq!(old.kind.range(), Some(3.0));
    assert!(scene.component::<LightComponent>(node).is_none());
    assert!(scene.component::<RenderableComponent>(node).is_some());
}

#[rstest]
fn test_submesh_material_used_without_override(geometry: Arc<GeometryAsset>) {
    let renderable = RenderableComponent::new(geometry);
    let material = renderable.effective_material(0, 0);
    assert_eq!(material.base_color, [0.2, 0.4, 0.6, 1.0]);
    assert!(!Arc::ptr_eq(&material, &MaterialAsset::default_material()));
}
