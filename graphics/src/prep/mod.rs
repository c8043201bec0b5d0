//! Scene preparation pipeline.
//!
//! [`ScenePrepState`] owns the binders and turns a [`Scene`](oxygen_scene::Scene)
//! into one [`PreparedSceneFrame`] per view. [`RenderListBuilder`] is the
//! last step, exposed for callers that extract items themselves.

mod builder;
mod config;
mod frame;
mod state;

pub use builder::{RenderItem, RenderListBuilder, domain_pass_mask};
pub use config::{CollectionConfig, FinalizationConfig};
pub use frame::PreparedSceneFrame;
pub use state::{FilteredSceneNodes, FrameBindings, PrepView, ScenePrepState, ScenePrepStats};
