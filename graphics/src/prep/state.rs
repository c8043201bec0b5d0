//! Scene preparation: scene graph in, per-view prepared frames out.
//!
//! One frame runs four steps, in order:
//!
//! 1. [`collect`](ScenePrepState::collect) walks the node table once,
//!    offering lights to the [`LightManager`] and caching renderable nodes
//!    in [`FilteredSceneNodes`].
//! 2. [`extract_view`](ScenePrepState::extract_view) culls, selects LODs and
//!    allocates deduplicated transforms, materials and geometry for one view.
//! 3. [`finalize`](ScenePrepState::finalize) runs `ensure_frame_resources`
//!    on every binder and uploader.
//! 4. [`build_view`](ScenePrepState::build_view) resolves geometry indices,
//!    sorts the partitions and uploads the view's draw metadata.
//!
//! [`prepare_frame`](ScenePrepState::prepare_frame) runs all of them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use oxygen_core::Slot;
use oxygen_core::math::BoundingSphere;
use oxygen_scene::{
    LightComponent, LodInput, MaterialFlags, NodeFlags, NodeHandle, NormalizedDistance, PerspectiveCamera,
    RenderableComponent, Scene, ScreenSpaceError,
};

use super::builder::{RenderItem, RenderListBuilder, domain_pass_mask};
use super::{CollectionConfig, FinalizationConfig, PreparedSceneFrame};
use crate::binders::{
    DrawMetadataEmitter, GeometryUploader, MaterialBinder, PassMask, TextureBinder, TextureSource,
    TransformUploader, ViewId,
};
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::graph::SceneConstants;
use crate::lights::{LightBindings, LightManager};
use crate::types::ShaderVisibleIndex;
use crate::upload::UploadCoordinator;

/// A camera scene prep extracts draws for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrepView {
    pub id: ViewId,
    pub camera: PerspectiveCamera,
    pub width: u32,
    pub height: u32,
}

impl PrepView {
    pub fn new(id: ViewId, camera: PerspectiveCamera, width: u32, height: u32) -> Self {
        Self {
            id,
            camera,
            width,
            height,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width.max(1) as f32 / self.height.max(1) as f32
    }
}

#[derive(Debug, Clone, Copy)]
struct FilteredNode {
    handle: NodeHandle,
    flags: NodeFlags,
}

/// Renderable nodes found by the frame-phase traversal, with their
/// effective flags.
#[derive(Debug, Default)]
pub struct FilteredSceneNodes {
    nodes: Vec<FilteredNode>,
}

impl FilteredSceneNodes {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn handles(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.nodes.iter().map(|n| n.handle)
    }

    fn clear(&mut self) {
        self.nodes.clear();
    }
}

/// Counters of the last prepared frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenePrepStats {
    pub filtered_nodes: usize,
    pub lights: usize,
    pub culled: usize,
    pub items: usize,
    pub draws: usize,
    pub dropped: usize,
}

/// Frame-wide bindless indices scene prep publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameBindings {
    pub world_transforms_srv: ShaderVisibleIndex,
    pub normal_transforms_srv: ShaderVisibleIndex,
    pub material_constants_srv: ShaderVisibleIndex,
    pub lights: LightBindings,
}

impl FrameBindings {
    pub fn apply(&self, constants: &mut SceneConstants) {
        constants.world_transforms_srv = self.world_transforms_srv.get();
        constants.normal_transforms_srv = self.normal_transforms_srv.get();
        constants.material_constants_srv = self.material_constants_srv.get();
        constants.directional_lights_srv = self.lights.directional_srv.get();
        constants.directional_light_count = self.lights.directional_count;
        constants.positional_lights_srv = self.lights.positional_srv.get();
        constants.positional_light_count = self.lights.positional_count;
    }
}

/// Owns every binder and uploader plus the caches that persist between
/// frames.
pub struct ScenePrepState {
    collection: CollectionConfig,
    finalization: FinalizationConfig,
    textures: TextureBinder,
    materials: MaterialBinder,
    geometry: GeometryUploader,
    transforms: TransformUploader,
    draw_metadata: DrawMetadataEmitter,
    lights: LightManager,
    filtered: FilteredSceneNodes,
    /// Last LOD per `(view, node)`; hysteresis needs the previous choice.
    lods: HashMap<(ViewId, NodeHandle), usize>,
    slot: Slot,
    stats: ScenePrepStats,
}

impl ScenePrepState {
    pub fn new(
        device: Arc<GraphicsDevice>,
        uploads: &mut UploadCoordinator,
        texture_source: Box<dyn TextureSource>,
    ) -> Result<Self, GraphicsError> {
        let textures = TextureBinder::new(Arc::clone(&device), uploads, texture_source)?;
        Ok(Self {
            collection: CollectionConfig::default(),
            finalization: FinalizationConfig::default(),
            textures,
            materials: MaterialBinder::new(Arc::clone(&device)),
            geometry: GeometryUploader::new(Arc::clone(&device)),
            transforms: TransformUploader::new(Arc::clone(&device)),
            draw_metadata: DrawMetadataEmitter::new(Arc::clone(&device)),
            lights: LightManager::new(device),
            filtered: FilteredSceneNodes::default(),
            lods: HashMap::new(),
            slot: Slot::default(),
            stats: ScenePrepStats::default(),
        })
    }

    pub fn with_collection_config(mut self, config: CollectionConfig) -> Self {
        self.collection = config;
        self
    }

    pub fn with_finalization_config(mut self, config: FinalizationConfig) -> Self {
        self.finalization = config;
        self
    }

    pub fn collection_config(&self) -> &CollectionConfig {
        &self.collection
    }

    pub fn finalization_config(&self) -> &FinalizationConfig {
        &self.finalization
    }

    /// Resets per-frame state for `slot` and applies pending evictions.
    pub fn begin_frame(&mut self, slot: Slot) -> Result<(), GraphicsError> {
        self.slot = slot;
        self.transforms.begin_frame(slot);
        self.lights.begin_frame(slot);
        self.filtered.clear();
        self.stats = ScenePrepStats::default();
        self.geometry.on_frame_start()
    }

    /// Frame phase: one pass over the whole node table.
    pub fn collect(&mut self, scene: &Scene) {
        oxygen_core::profile_scope!("scene_prep_collect");
        for (handle, node) in scene.iter() {
            let flags = scene.effective_flags(handle);
            if self.collection.honor_visibility && !flags.contains(NodeFlags::VISIBLE) {
                continue;
            }
            if self.collection.collect_lights
                && let Some(light) = node.get::<LightComponent>()
            {
                self.lights.add_light(light, node.transform().world_matrix());
            }
            if node.get::<RenderableComponent>().is_some() {
                self.filtered.nodes.push(FilteredNode { handle, flags });
            }
        }
        self.stats.filtered_nodes = self.filtered.len();
        self.stats.lights = self.lights.directional_lights().len() + self.lights.positional_lights().len();
        // LOD choices of nodes that left the scene are forgotten.
        let live: HashSet<NodeHandle> = self.filtered.handles().collect();
        self.lods.retain(|(_, node), _| live.contains(node));
    }

    fn lod_input(
        renderable: &RenderableComponent,
        view: &PrepView,
        sphere: &BoundingSphere,
        distance: f32,
    ) -> LodInput {
        if renderable.policy().wants_screen_space() {
            LodInput::ScreenSpace(ScreenSpaceError(view.camera.projected_radius_px(
                sphere.radius,
                distance,
                view.height as f32,
            )))
        } else {
            LodInput::Distance(NormalizedDistance(distance / sphere.radius.max(f32::EPSILON)))
        }
    }

    /// View phase: visible submesh ranges of `view` with their handles.
    pub fn extract_view(&mut self, scene: &Scene, view: &PrepView) -> Result<Vec<RenderItem>, GraphicsError> {
        oxygen_core::profile_scope!("scene_prep_extract_view");
        let frustum = view.camera.frustum(view.aspect_ratio());
        let mut items = Vec::new();
        for filtered in &self.filtered.nodes {
            let Some(renderable) = scene.component::<RenderableComponent>(filtered.handle) else {
                continue;
            };
            if renderable.lod_count() == 0 {
                continue;
            }
            let sphere = renderable.world_bounding_sphere();
            if self.collection.frustum_culling && !frustum.intersects_sphere(&sphere) {
                self.stats.culled += 1;
                continue;
            }

            let distance = (view.camera.position - sphere.center).norm();
            let input = Self::lod_input(renderable, view, &sphere, distance);
            let key = (view.id, filtered.handle);
            let current = self.lods.get(&key).copied().unwrap_or(0);
            let lod = renderable.policy().select(input, current, renderable.lod_count());
            self.lods.insert(key, lod);

            let geometry_asset = renderable.geometry();
            let Some(mesh) = geometry_asset.mesh(lod) else {
                continue;
            };
            let critical = match input {
                LodInput::Distance(d) => d.0 < self.collection.critical_distance,
                LodInput::ScreenSpace(_) => false,
            };
            let geometry = self.geometry.get_or_allocate(geometry_asset, lod, critical)?;
            let transform = self.transforms.get_or_allocate(renderable.world_matrix());

            for (submesh_index, submesh) in mesh.submeshes().iter().enumerate() {
                if self.collection.honor_visibility && !renderable.is_submesh_visible(lod, submesh_index) {
                    continue;
                }
                let material_asset = renderable.effective_material(lod, submesh_index);
                let material = self.materials.get_or_allocate(&material_asset, &mut self.textures);
                let mut mask = domain_pass_mask(material_asset.domain);
                if material_asset.flags.contains(MaterialFlags::DOUBLE_SIDED) {
                    mask |= PassMask::DOUBLE_SIDED;
                }
                if filtered.flags.contains(NodeFlags::CASTS_SHADOWS) {
                    mask |= PassMask::SHADOW_CASTER;
                }
                for range in &submesh.views {
                    items.push(RenderItem {
                        node: filtered.handle,
                        geometry,
                        transform,
                        material,
                        submesh_index: submesh_index as u32,
                        range: *range,
                        is_indexed: mesh.is_indexed(),
                        mask,
                        view_depth: distance,
                    });
                }
            }
        }
        self.stats.items += items.len();
        log::trace!("ScenePrep: view {} extracted {} items", view.id, items.len());
        Ok(items)
    }

    /// Runs `ensure_frame_resources` on every binder and uploader.
    ///
    /// Textures go first so materials can repoint slots resolved this
    /// frame.
    pub fn finalize(&mut self, uploads: &mut UploadCoordinator) -> Result<(), GraphicsError> {
        oxygen_core::profile_scope!("scene_prep_finalize");
        self.textures.ensure_frame_resources(uploads)?;
        self.materials.ensure_frame_resources(uploads, &mut self.textures)?;
        self.geometry.ensure_frame_resources(uploads)?;
        self.transforms.ensure_frame_resources()?;
        self.lights.ensure_frame_resources()?;
        Ok(())
    }

    /// Builds the prepared frame of `view` from its extracted items.
    pub fn build_view(&mut self, view: ViewId, items: &[RenderItem]) -> Result<PreparedSceneFrame, GraphicsError> {
        let mut builder = RenderListBuilder::new(view);
        for item in items {
            builder.push(item, &self.geometry);
        }
        self.stats.dropped += builder.dropped_count();
        let mut frame = builder.finish(self.finalization.sort_partitions);
        self.stats.draws += frame.len();
        if self.finalization.emit_draw_metadata {
            let srv = self.draw_metadata.emit(view, self.slot, frame.records())?;
            frame.set_draw_metadata_srv(srv);
        }
        Ok(frame)
    }

    /// All four steps for `views`; frames come back in view order.
    pub fn prepare_frame(
        &mut self,
        scene: &Scene,
        views: &[PrepView],
        slot: Slot,
        uploads: &mut UploadCoordinator,
    ) -> Result<Vec<PreparedSceneFrame>, GraphicsError> {
        oxygen_core::profile_function!();
        self.begin_frame(slot)?;
        self.collect(scene);
        let mut extracted = Vec::with_capacity(views.len());
        for view in views {
            extracted.push((view.id, self.extract_view(scene, view)?));
        }
        self.finalize(uploads)?;
        let live: Vec<ViewId> = views.iter().map(|v| v.id).collect();
        self.draw_metadata.retain_views(&live);
        self.lods.retain(|(view, _), _| live.contains(view));
        extracted
            .iter()
            .map(|(view, items)| self.build_view(*view, items))
            .collect()
    }

    pub fn bindings(&self) -> FrameBindings {
        FrameBindings {
            world_transforms_srv: self.transforms.worlds_srv(),
            normal_transforms_srv: self.transforms.normals_srv(),
            material_constants_srv: self.materials.srv_index(),
            lights: self.lights.bindings(),
        }
    }

    /// LOD `view` last selected for `node`.
    pub fn selected_lod(&self, view: ViewId, node: NodeHandle) -> Option<usize> {
        self.lods.get(&(view, node)).copied()
    }

    pub fn filtered_nodes(&self) -> &FilteredSceneNodes {
        &self.filtered
    }

    pub fn stats(&self) -> ScenePrepStats {
        self.stats
    }

    pub fn textures(&self) -> &TextureBinder {
        &self.textures
    }

    pub fn textures_mut(&mut self) -> &mut TextureBinder {
        &mut self.textures
    }

    pub fn materials(&self) -> &MaterialBinder {
        &self.materials
    }

    pub fn geometry(&self) -> &GeometryUploader {
        &self.geometry
    }

    pub fn geometry_mut(&mut self) -> &mut GeometryUploader {
        &mut self.geometry
    }

    pub fn transforms(&self) -> &TransformUploader {
        &self.transforms
    }

    pub fn lights(&self) -> &LightManager {
        &self.lights
    }
}

impl std::fmt::Debug for ScenePrepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScenePrepState")
            .field("slot", &self.slot)
            .field("stats", &self.stats)
            .field("materials", &self.materials.material_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use oxygen_core::AssetKey;
    use oxygen_core::math::Vec3;
    use oxygen_scene::asset::MaterialAsset;
    use oxygen_scene::{DistancePolicy, GeometryAsset, LodPolicy, MaterialDomain, Mesh, TransformComponent};

    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::binders::NoTextureSource;
    use crate::config::{GraphicsConfig, StagingConfig};
    use crate::upload::RingBufferStaging;

    fn setup() -> (UploadCoordinator, ScenePrepState) {
        let device = GraphicsDevice::new(Arc::new(HeadlessBackend::new()), GraphicsConfig::default()).unwrap();
        let staging = RingBufferStaging::new(device.clone(), 3, &StagingConfig::default()).unwrap();
        let mut uploads = UploadCoordinator::new(device.clone(), Box::new(staging));
        let state = ScenePrepState::new(device, &mut uploads, Box::new(NoTextureSource)).unwrap();
        (uploads, state)
    }

    fn two_lod_cube(key: u64) -> Arc<GeometryAsset> {
        Arc::new(GeometryAsset::new(
            AssetKey::from_u64(key),
            "cube",
            vec![
                Arc::new(Mesh::cube("cube_lod0", 2.0, None)),
                Arc::new(Mesh::cube("cube_lod1", 2.0, None)),
            ],
        ))
    }

    fn view(id: u32, position: Vec3) -> PrepView {
        PrepView::new(ViewId::new(id), PerspectiveCamera::looking_at(position, Vec3::zeros()), 64, 64)
    }

    #[test]
    fn test_distance_lod_is_selected_per_view() {
        let (mut uploads, mut state) = setup();
        let mut scene = Scene::new("lod");
        let node = scene.create_node("cube");
        let geometry = two_lod_cube(1);
        let policy = LodPolicy::Distance(DistancePolicy::new(vec![10.0], 0.0));
        scene
            .add_component(node, RenderableComponent::new(geometry.clone()).with_policy(policy))
            .unwrap();
        scene.update_transforms();

        let radius = scene
            .component::<RenderableComponent>(node)
            .unwrap()
            .world_bounding_sphere()
            .radius;
        let views = [view(0, Vec3::new(0.0, 0.0, 3.0)), view(1, Vec3::new(0.0, 0.0, -100.0 * radius))];
        let frames = state.prepare_frame(&scene, &views, Slot::new(0), &mut uploads).unwrap();

        assert_eq!(state.selected_lod(ViewId::new(0), node), Some(0));
        assert_eq!(state.selected_lod(ViewId::new(1), node), Some(1));
        for (frame, lod) in frames.iter().zip([0, 1]) {
            assert_eq!(frame.len(), 1);
            let expected = state.geometry().lookup(geometry.key(), lod).unwrap();
            assert_eq!(frame.geometry_handles(), &[expected]);
            assert_eq!(frame.record(0).unwrap().index_count, 36);
            assert!(frame.draw_metadata_srv().is_valid());
        }
    }

    #[test]
    fn test_culling_visibility_and_transform_dedup() {
        let (mut uploads, mut state) = setup();
        let mut scene = Scene::new("cull");
        let geometry = two_lod_cube(2);
        let mut visible = Vec::new();
        for x in [-2.0, 2.0] {
            let node = scene.create_node("visible");
            scene.add_component(node, RenderableComponent::new(geometry.clone())).unwrap();
            *scene.node_mut(node).unwrap().transform_mut() = TransformComponent::from_position(Vec3::new(x, 0.0, 0.0));
            visible.push(node);
        }
        // Same world matrix as the first node.
        let twin = scene.create_node("twin");
        scene.add_component(twin, RenderableComponent::new(geometry.clone())).unwrap();
        *scene.node_mut(twin).unwrap().transform_mut() = TransformComponent::from_position(Vec3::new(-2.0, 0.0, 0.0));
        let behind = scene.create_node("behind");
        scene.add_component(behind, RenderableComponent::new(geometry.clone())).unwrap();
        *scene.node_mut(behind).unwrap().transform_mut() = TransformComponent::from_position(Vec3::new(0.0, 0.0, 50.0));
        let hidden = scene.create_node("hidden");
        scene.add_component(hidden, RenderableComponent::new(geometry)).unwrap();
        scene.node_mut(hidden).unwrap().set_flag(NodeFlags::VISIBLE, false);
        scene.update_transforms();

        let views = [view(0, Vec3::new(0.0, 0.0, 10.0))];
        let frames = state.prepare_frame(&scene, &views, Slot::new(0), &mut uploads).unwrap();
        let stats = state.stats();
        assert_eq!(stats.filtered_nodes, 4);
        assert_eq!(stats.culled, 1);
        assert_eq!(frames[0].len(), 3);
        assert_eq!(state.transforms().count(), 2);
        let transforms: Vec<u32> = frames[0].records().iter().map(|r| r.transform_index).collect();
        assert_eq!(transforms.iter().filter(|t| **t == transforms[0]).count(), 2);
        assert!(frames[0].nodes().iter().all(|n| *n != hidden && *n != behind));
    }

    #[test]
    fn test_material_domains_fill_partitions() {
        let (mut uploads, mut state) = setup();
        let mut scene = Scene::new("domains");
        let transparent = Arc::new(MaterialAsset {
            domain: MaterialDomain::Transparent,
            flags: MaterialFlags::DOUBLE_SIDED,
            ..(*MaterialAsset::default_material()).clone()
        });
        let geometry = Arc::new(GeometryAsset::new(
            AssetKey::from_u64(3),
            "glass",
            vec![Arc::new(Mesh::cube("glass", 1.0, Some(transparent)))],
        ));
        let glass = scene.create_node("glass");
        scene.add_component(glass, RenderableComponent::new(geometry)).unwrap();
        let solid = scene.create_node("solid");
        scene.add_component(solid, RenderableComponent::new(two_lod_cube(4))).unwrap();
        scene.node_mut(solid).unwrap().set_flag(NodeFlags::CASTS_SHADOWS, false);
        scene.update_transforms();

        let frames = state
            .prepare_frame(&scene, &[view(0, Vec3::new(0.0, 0.0, 6.0))], Slot::new(0), &mut uploads)
            .unwrap();
        let frame = &frames[0];
        assert_eq!(frame.transparent_draws().len(), 1);
        assert_eq!(frame.opaque_draws().len(), 1);
        let glass_mask = frame.record(frame.transparent_draws()[0]).unwrap().pass_mask();
        assert!(glass_mask.contains(PassMask::DOUBLE_SIDED | PassMask::SHADOW_CASTER));
        let solid_mask = frame.record(frame.opaque_draws()[0]).unwrap().pass_mask();
        assert!(!solid_mask.contains(PassMask::SHADOW_CASTER));
        assert_eq!(state.materials().material_count(), 2);
    }

    #[test]
    fn test_lights_reach_bindings() {
        let (mut uploads, mut state) = setup();
        let mut scene = Scene::new("lights");
        let sun = scene.create_node("sun");
        scene.add_component(sun, LightComponent::directional(2.0)).unwrap();
        let lamp = scene.create_node("lamp");
        scene.add_component(lamp, LightComponent::point(5.0, 1.0)).unwrap();
        scene.update_transforms();

        let frames = state
            .prepare_frame(&scene, &[view(0, Vec3::new(0.0, 0.0, 5.0))], Slot::new(1), &mut uploads)
            .unwrap();
        assert!(frames[0].is_empty());
        assert_eq!(state.stats().lights, 2);
        let mut constants = SceneConstants::default();
        state.bindings().apply(&mut constants);
        assert_eq!(constants.directional_light_count, 1);
        assert_eq!(constants.positional_light_count, 1);
        assert!(ShaderVisibleIndex::new(constants.positional_lights_srv).is_valid());
    }
}
