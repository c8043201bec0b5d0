//! # Oxygen Scene
//!
//! Scene graph and the data scene preparation reads from it.
//!
//! - [`Scene`]: generational node arena with parent/child links, node
//!   flags and top-down transform propagation
//! - [`RenderableComponent`]: geometry with LOD policy and per-submesh state
//! - [`LightComponent`]: directional, point, spot and area lights
//! - [`SceneEnvironment`]: one value per environment system type
//!
//! Nodes never own their parents; the arena resolves parent handles, so
//! there are no reference cycles.

pub mod asset;
pub mod camera;
pub mod component;
pub mod environment;
mod error;
pub mod light;
pub mod node;
pub mod renderable;
mod scene;
pub mod transform;

pub use asset::{GeometryAsset, MaterialAsset, MaterialDomain, MaterialFlags, Mesh, Submesh, Vertex};
pub use camera::PerspectiveCamera;
pub use component::{Component, Composition};
pub use environment::{EnvironmentSystem, PostProcessVolume, SceneEnvironment, ToneMapper};
pub use error::SceneError;
pub use light::{LightComponent, LightKind};
pub use node::{NodeFlags, NodeHandle, SceneNode};
pub use renderable::{
    DistancePolicy, FixedPolicy, LodInput, LodPolicy, NormalizedDistance, RenderableComponent,
    ScreenSpaceError, ScreenSpaceErrorPolicy,
};
pub use scene::Scene;
pub use transform::TransformComponent;

static_assertions::assert_impl_all!(Scene: Send, Sync);
static_assertions::assert_impl_all!(SceneNode: Send, Sync);
static_assertions::assert_impl_all!(RenderableComponent: Send, Sync);
