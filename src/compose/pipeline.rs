use smol_str::SmolStr;

use crate::render::executor::{FrameContext, LayerDrawer, RenderStages, execute_plan};
use crate::render::publish::{PublishedTexture, PublishedTextures, blur_export_name};
use crate::render::targets::{GroupTargetStore, color_format};

use super::config::{ComposeSettings, LayerConfig, LayerKey, SelectorRegistry};
use super::dirty::DirtyCache;
use super::scheduler::LayerGraphScheduler;

/// Composition root: owns the scheduler, dirty tracking, render targets and
/// the publish registry, wired together explicitly by the host instead of
/// located through any global state.
///
/// Once per frame the host calls [`run`](Self::run); the pipeline builds the
/// minimal plan for the groups that changed, records its passes into the
/// frame's encoder and refreshes the published textures. A frame with no
/// dirty layers records nothing; the previously published handles remain
/// valid and are what consumers read.
pub struct ComposePipeline {
    settings: ComposeSettings,
    selectors: SelectorRegistry,
    layers: Vec<LayerConfig>,
    dirty: DirtyCache,
    scheduler: LayerGraphScheduler,
    targets: GroupTargetStore,
    published: PublishedTextures,
    stages: Option<RenderStages>,
    last_pass_count: usize,
}

impl ComposePipeline {
    pub fn new(mut settings: ComposeSettings) -> Self {
        settings.normalize();
        Self {
            settings,
            selectors: SelectorRegistry::new(),
            layers: Vec::new(),
            dirty: DirtyCache::new(),
            scheduler: LayerGraphScheduler::new(),
            targets: GroupTargetStore::new(),
            published: PublishedTextures::new(),
            stages: None,
            last_pass_count: 0,
        }
    }

    pub fn settings(&self) -> &ComposeSettings {
        &self.settings
    }

    /// Settings changes invalidate everything: format, mix mode and clear
    /// color all change what the cached composites look like.
    pub fn set_settings(&mut self, mut settings: ComposeSettings) {
        settings.normalize();
        self.settings = settings;
        self.invalidate_all();
    }

    pub fn register_selector(&mut self, label: impl Into<SmolStr>) -> LayerKey {
        self.selectors.register(label)
    }

    pub fn selector_label(&self, key: LayerKey) -> Option<&str> {
        self.selectors.label(key)
    }

    /// Replaces the layer stack, e.g. after screens were added, removed or
    /// reordered. Every layer starts dirty.
    pub fn set_layers(&mut self, mut layers: Vec<LayerConfig>) {
        for layer in &mut layers {
            layer.normalize();
        }
        self.dirty.retain_layers(&layers);
        for layer in &layers {
            self.dirty.mark(layer.selector, true);
        }
        self.layers = layers;
    }

    pub fn layers(&self) -> &[LayerConfig] {
        &self.layers
    }

    pub fn mark_dirty(&mut self, selector: LayerKey, dirty: bool) {
        self.dirty.mark(selector, dirty);
    }

    pub fn invalidate_all(&mut self) {
        for layer in &self.layers {
            self.dirty.mark(layer.selector, true);
        }
    }

    /// Last published composite for a group name, if the pipeline has run
    /// for it. Missing means "no background effect".
    pub fn published(&self, name: &str) -> Option<&PublishedTexture> {
        self.published.get(name)
    }

    /// The pre-blurred export published alongside a group, if requested.
    pub fn published_blur(&self, name: &str) -> Option<&PublishedTexture> {
        self.published.get(&blur_export_name(name))
    }

    /// Builds and records this frame's passes. Returns the number of passes
    /// recorded; zero means a pure cache hit.
    pub fn run(&mut self, frame: &mut FrameContext<'_>, drawer: &mut dyn LayerDrawer) -> usize {
        let plan = self.scheduler.build_plan(
            &self.layers,
            &mut self.dirty,
            &self.settings,
            frame.screen_size,
        );
        self.last_pass_count = plan.pass_count();
        if plan.is_empty() {
            return 0;
        }

        let format = color_format(self.settings.use_hdr);
        if self.stages.as_ref().map(RenderStages::format) != Some(format) {
            self.stages = Some(RenderStages::new(frame.device, format));
        }
        if let Some(stages) = self.stages.as_ref() {
            execute_plan(
                &plan,
                stages,
                &mut self.targets,
                &mut self.published,
                &self.settings,
                frame,
                drawer,
            );
        }
        self.last_pass_count
    }

    /// Read-only state snapshot for overlays and tooling.
    pub fn diagnostics(&self) -> PipelineDiagnostics {
        PipelineDiagnostics {
            layer_count: self.layers.len(),
            dirty_layer_count: self
                .layers
                .iter()
                .filter(|layer| self.dirty.is_dirty(layer))
                .count(),
            last_pass_count: self.last_pass_count,
            groups: self
                .targets
                .names()
                .filter_map(|name| {
                    self.targets.get(name).map(|set| GroupDiagnostics {
                        name: name.clone(),
                        width: set.width(),
                        height: set.height(),
                        mip_levels: set.mip_levels(),
                    })
                })
                .collect(),
            published: self.published.names().cloned().collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GroupDiagnostics {
    pub name: SmolStr,
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
}

#[derive(Clone, Debug)]
pub struct PipelineDiagnostics {
    pub layer_count: usize,
    pub dirty_layer_count: usize,
    pub last_pass_count: usize,
    pub groups: Vec<GroupDiagnostics>,
    pub published: Vec<SmolStr>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::LayerConfig;

    #[test]
    fn new_layer_stacks_start_fully_dirty() {
        let mut pipeline = ComposePipeline::new(ComposeSettings::default());
        let a = pipeline.register_selector("a");
        let b = pipeline.register_selector("b");
        pipeline.set_layers(vec![
            LayerConfig::new(a, "bg"),
            LayerConfig::new(b, "bg"),
        ]);

        let diagnostics = pipeline.diagnostics();
        assert_eq!(diagnostics.layer_count, 2);
        assert_eq!(diagnostics.dirty_layer_count, 2);
        assert_eq!(diagnostics.last_pass_count, 0);
        assert!(diagnostics.groups.is_empty());
    }

    #[test]
    fn set_layers_normalizes_parameters() {
        let mut pipeline = ComposePipeline::new(ComposeSettings::default());
        let key = pipeline.register_selector("a");
        pipeline.set_layers(vec![
            LayerConfig::new(key, "bg")
                .with_mip_blur(20.0)
                .with_resolution_scale(0.01),
        ]);
        let layer = &pipeline.layers()[0];
        assert_eq!(layer.blur_mip, 8.0);
        assert_eq!(layer.resolution_scale, 0.25);
    }

    #[test]
    fn mark_dirty_round_trips_through_diagnostics() {
        let mut pipeline = ComposePipeline::new(ComposeSettings::default());
        let key = pipeline.register_selector("a");
        pipeline.set_layers(vec![LayerConfig::new(key, "bg")]);
        pipeline.mark_dirty(key, false);
        assert_eq!(pipeline.diagnostics().dirty_layer_count, 0);
        pipeline.mark_dirty(key, true);
        assert_eq!(pipeline.diagnostics().dirty_layer_count, 1);
    }

    #[test]
    fn nothing_is_published_before_the_first_run() {
        let pipeline = ComposePipeline::new(ComposeSettings::default());
        assert!(pipeline.published("ui_background").is_none());
        assert!(pipeline.published_blur("ui_background").is_none());
    }
}
