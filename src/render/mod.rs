mod composite;
pub mod executor;
mod gaussian;
mod mip;
pub mod publish;
pub mod targets;

pub use executor::{FrameContext, LayerDrawRequest, LayerDrawer, StencilMode};
pub use publish::{PublishedTexture, PublishedTextures, blur_export_name};
pub use targets::{GroupTargetStore, RenderTargetSet};
