//! Scene lights on the GPU: collection, upload and clustered culling data.

mod clusters;
mod manager;

pub use clusters::{ClusterGrid, ClusterLists, LightCullingConfig, build_cluster_lists};
pub use manager::{
    DirectionalLightData, LIGHT_FLAG_CASTS_SHADOWS, LIGHT_FLAG_SUN, LightBindings, LightManager, PositionalKind,
    PositionalLightData,
};
