use bitflags::bitflags;
use glam::Vec4;
use slotmap::{SlotMap, new_key_type};
use smol_str::SmolStr;

new_key_type! {
    /// Stable identity of a host draw filter. Issued by [`SelectorRegistry`]
    /// and used to address layers in dirty signals and draw requests.
    pub struct LayerKey;
}

/// Registry of the host's per-layer draw filters. The pipeline never
/// inspects layer content; it only hands these keys back through
/// [`crate::render::LayerDrawer`].
pub struct SelectorRegistry {
    selectors: SlotMap<LayerKey, SmolStr>,
}

impl SelectorRegistry {
    pub fn new() -> Self {
        Self {
            selectors: SlotMap::with_key(),
        }
    }

    pub fn register(&mut self, label: impl Into<SmolStr>) -> LayerKey {
        self.selectors.insert(label.into())
    }

    pub fn unregister(&mut self, key: LayerKey) -> bool {
        self.selectors.remove(key).is_some()
    }

    pub fn label(&self, key: LayerKey) -> Option<&str> {
        self.selectors.get(key).map(SmolStr::as_str)
    }

    pub fn contains(&self, key: LayerKey) -> bool {
        self.selectors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlurAlgorithm {
    /// Mip pyramid + fractional-level composite. O(1) composite passes, blur
    /// radius quantized to mip levels.
    MipChain,
    /// Separable H+V Gaussian with progressive iterations. Continuous sigma.
    GaussianSeparable,
}

bitflags! {
    /// Pre-blurred whole-group exports requested alongside the composite.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct GlobalBlur: u8 {
        const MIP_CHAIN = 1 << 0;
        const GAUSSIAN = 1 << 1;
    }
}

pub const MAX_BLUR_MIP: f32 = 8.0;
pub const MAX_GAUSSIAN_SIGMA: f32 = 6.0;
pub const MAX_BLUR_ITERATIONS: u32 = 5;
pub const MIN_RESOLUTION_SCALE: f32 = 0.25;
pub const MAX_STENCIL_REF: u32 = 255;

/// Highest mip level the Gaussian prefilter may tap.
pub(crate) const MAX_PREFILTER_LOD: f32 = 4.0;

/// One compositing layer, back-to-front order within its output group.
#[derive(Clone, Debug)]
pub struct LayerConfig {
    pub selector: LayerKey,
    /// Large opaque occluder; marks the stencil so layers beneath skip the
    /// covered pixels.
    pub foreground: bool,
    pub blur: bool,
    pub blur_algorithm: BlurAlgorithm,
    pub blur_mip: f32,
    pub gaussian_sigma: f32,
    pub iterations: u32,
    /// Alpha-blended over the Gaussian result at composite time. Zero alpha
    /// leaves the blur untinted.
    pub tint: Vec4,
    /// Name the group composite publishes under. Empty disables caching and
    /// publishing for this layer's group.
    pub output_group: SmolStr,
    pub resolution_scale: f32,
    pub global_blur: GlobalBlur,
    pub global_sigma: f32,
    pub global_iterations: u32,
}

impl LayerConfig {
    pub fn new(selector: LayerKey, output_group: impl Into<SmolStr>) -> Self {
        Self {
            selector,
            foreground: false,
            blur: false,
            blur_algorithm: BlurAlgorithm::MipChain,
            blur_mip: 3.0,
            gaussian_sigma: 2.0,
            iterations: 1,
            tint: Vec4::ZERO,
            output_group: output_group.into(),
            resolution_scale: 1.0,
            global_blur: GlobalBlur::empty(),
            global_sigma: 2.0,
            global_iterations: 1,
        }
    }

    pub fn with_foreground(mut self, foreground: bool) -> Self {
        self.foreground = foreground;
        self
    }

    pub fn with_mip_blur(mut self, mip: f32) -> Self {
        self.blur = true;
        self.blur_algorithm = BlurAlgorithm::MipChain;
        self.blur_mip = mip;
        self
    }

    pub fn with_gaussian_blur(mut self, sigma: f32, iterations: u32) -> Self {
        self.blur = true;
        self.blur_algorithm = BlurAlgorithm::GaussianSeparable;
        self.gaussian_sigma = sigma;
        self.iterations = iterations;
        self
    }

    pub fn with_tint(mut self, tint: Vec4) -> Self {
        self.tint = tint;
        self
    }

    pub fn with_resolution_scale(mut self, scale: f32) -> Self {
        self.resolution_scale = scale;
        self
    }

    pub fn with_global_blur(mut self, kinds: GlobalBlur, sigma: f32, iterations: u32) -> Self {
        self.global_blur = kinds;
        self.global_sigma = sigma;
        self.global_iterations = iterations;
        self
    }

    pub(crate) fn normalize(&mut self) {
        self.blur_mip = self.blur_mip.clamp(0.0, MAX_BLUR_MIP);
        self.gaussian_sigma = self.gaussian_sigma.clamp(0.0, MAX_GAUSSIAN_SIGMA);
        self.iterations = self.iterations.clamp(1, MAX_BLUR_ITERATIONS);
        self.resolution_scale = self.resolution_scale.clamp(MIN_RESOLUTION_SCALE, 1.0);
        self.global_sigma = self.global_sigma.clamp(0.0, MAX_GAUSSIAN_SIGMA);
        self.global_iterations = self.global_iterations.clamp(1, MAX_BLUR_ITERATIONS);
    }
}

/// Pipeline-wide configuration, supplied explicitly at construction.
#[derive(Clone, Debug)]
pub struct ComposeSettings {
    /// Group name assumed when the layer list is empty but targets are
    /// still requested.
    pub default_group: SmolStr,
    pub resolution_scale: f32,
    pub use_hdr: bool,
    pub clear_color: [f32; 4],
    /// Accumulation mode: blurred layers seed from the live group composite
    /// instead of an isolated cleared scratch.
    pub mix_layers: bool,
    /// Forces every layer dirty each frame (editor preview).
    pub force_redraw: bool,
    pub stencil_ref: u32,
    /// Base ordering event the host scheduler sorts emitted passes under.
    pub inject_event: u32,
}

impl Default for ComposeSettings {
    fn default() -> Self {
        Self {
            default_group: SmolStr::new_static("ui_background"),
            resolution_scale: 1.0,
            use_hdr: false,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            mix_layers: false,
            force_redraw: false,
            stencil_ref: 1,
            inject_event: 0,
        }
    }
}

impl ComposeSettings {
    pub(crate) fn normalize(&mut self) {
        self.resolution_scale = self.resolution_scale.clamp(MIN_RESOLUTION_SCALE, 1.0);
        self.stencil_ref = self.stencil_ref.min(MAX_STENCIL_REF);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> LayerKey {
        let mut registry = SelectorRegistry::new();
        registry.register("test")
    }

    #[test]
    fn layer_params_clamp_to_valid_ranges() {
        let mut config = LayerConfig::new(key(), "bg")
            .with_mip_blur(12.0)
            .with_resolution_scale(0.1);
        config.gaussian_sigma = 9.0;
        config.iterations = 0;
        config.global_iterations = 99;
        config.normalize();

        assert_eq!(config.blur_mip, MAX_BLUR_MIP);
        assert_eq!(config.gaussian_sigma, MAX_GAUSSIAN_SIGMA);
        assert_eq!(config.iterations, 1);
        assert_eq!(config.global_iterations, MAX_BLUR_ITERATIONS);
        assert_eq!(config.resolution_scale, MIN_RESOLUTION_SCALE);
    }

    #[test]
    fn settings_clamp_stencil_ref_to_byte_range() {
        let mut settings = ComposeSettings {
            stencil_ref: 999,
            resolution_scale: 2.0,
            ..ComposeSettings::default()
        };
        settings.normalize();
        assert_eq!(settings.stencil_ref, MAX_STENCIL_REF);
        assert_eq!(settings.resolution_scale, 1.0);
    }

    #[test]
    fn registry_issues_stable_keys() {
        let mut registry = SelectorRegistry::new();
        let a = registry.register("panel");
        let b = registry.register("dialog");
        assert_ne!(a, b);
        assert_eq!(registry.label(a), Some("panel"));
        assert!(registry.unregister(a));
        assert!(!registry.contains(a));
        assert_eq!(registry.label(b), Some("dialog"));
    }
}
