//! Layered, stencil-aware frame compositing for liquid-glass UI effects.
//!
//! UI canvas layers are captured into named off-screen output groups,
//! selectively blurred (mip-chain or separable Gaussian), and composited
//! back together with stencil-based occlusion so translucent work is never
//! wasted behind opaque foreground content. The finished composites are
//! published under well-known names for glass materials to sample.
//!
//! The crate owns scheduling, render-target lifetime, stencil discipline and
//! dirty caching. The host engine keeps ownership of layer content: it
//! implements [`LayerDrawer`] and records its own draws into the passes the
//! pipeline prepares.
//!
//! ```no_run
//! # fn demo(device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder,
//! #         drawer: &mut dyn glasspane::LayerDrawer) {
//! use glasspane::{ComposePipeline, ComposeSettings, FrameContext, LayerConfig};
//!
//! let mut pipeline = ComposePipeline::new(ComposeSettings::default());
//! let background = pipeline.register_selector("background");
//! let dialog = pipeline.register_selector("dialog");
//! pipeline.set_layers(vec![
//!     LayerConfig::new(background, "ui_bg").with_gaussian_blur(2.0, 2),
//!     LayerConfig::new(dialog, "ui_bg").with_foreground(true),
//! ]);
//!
//! let mut frame = FrameContext { device, encoder, screen_size: (1920, 1080) };
//! pipeline.run(&mut frame, drawer);
//! let glass_input = pipeline.published("ui_bg");
//! # let _ = glass_input;
//! # }
//! ```

pub mod compose;
mod error;
pub mod render;

pub use compose::{
    BlurAlgorithm, ComposePipeline, ComposeSettings, DirtyCache, GlobalBlur, LayerConfig,
    LayerGraphScheduler, LayerKey, PassPlan, SelectorRegistry,
};
pub use error::ComposeError;
pub use render::{
    FrameContext, GroupTargetStore, LayerDrawRequest, LayerDrawer, PublishedTexture, StencilMode,
};
