use glam::Vec4;
use smol_str::SmolStr;
use tracing::debug;

use super::config::{BlurAlgorithm, ComposeSettings, GlobalBlur, LayerConfig, MAX_PREFILTER_LOD};
use super::decision::{LayerFacts, PrepassKind, decide};
use super::dirty::DirtyCache;
use super::plan::{
    DrawPhase, GroupId, GroupPlan, OrderKey, PassDesc, PassKind, PassPlan, Surface, scaled_extent,
};

/// Sigmas at or below this are treated as unblurred and skip the H/V passes.
pub const MIN_GAUSSIAN_SIGMA: f32 = 1e-3;

/// A maximal run of consecutive layers sharing one output group name.
struct GroupRun {
    start: usize,
    end: usize,
    name: SmolStr,
}

fn group_runs(layers: &[LayerConfig]) -> Vec<GroupRun> {
    let mut runs: Vec<GroupRun> = Vec::new();
    for (index, layer) in layers.iter().enumerate() {
        match runs.last_mut() {
            Some(run) if run.name == layer.output_group => run.end = index + 1,
            _ => runs.push(GroupRun {
                start: index,
                end: index + 1,
                name: layer.output_group.clone(),
            }),
        }
    }
    runs
}

struct PlanEmitter {
    plan: PassPlan,
    event: u32,
    seq: u32,
}

impl PlanEmitter {
    fn new(inject_event: u32) -> Self {
        Self {
            plan: PassPlan::default(),
            event: inject_event,
            seq: 0,
        }
    }

    fn add_group(&mut self, group: GroupPlan) -> GroupId {
        let id = GroupId(self.plan.groups.len());
        self.plan.groups.push(group);
        id
    }

    fn emit(&mut self, group: GroupId, kind: PassKind) {
        self.plan.passes.push(PassDesc {
            group,
            order: OrderKey {
                event: self.event,
                seq: self.seq,
            },
            kind,
        });
        self.event += 1;
        self.seq += 1;
    }

    fn mark_publish_blur(&mut self, group: GroupId) {
        self.plan.groups[group.0].publish_blur = true;
    }

    fn finish(self) -> PassPlan {
        self.plan
    }
}

/// Builds the minimal ordered pass sequence that brings every stale output
/// group back up to date. Owns no GPU state; the plan is pure data.
pub struct LayerGraphScheduler;

impl LayerGraphScheduler {
    pub fn new() -> Self {
        Self
    }

    pub fn build_plan(
        &self,
        layers: &[LayerConfig],
        dirty: &mut DirtyCache,
        settings: &ComposeSettings,
        screen_size: (u32, u32),
    ) -> PassPlan {
        if layers.is_empty() {
            return PassPlan::default();
        }

        if settings.force_redraw {
            for layer in layers {
                dirty.mark(layer.selector, true);
            }
        }

        let Some(mut first) = layers.iter().position(|layer| dirty.is_dirty(layer)) else {
            return PassPlan::default();
        };

        // Group content is cumulative: a dirty layer invalidates everything
        // composited beneath it in the same group.
        let dirty_name = layers[first].output_group.clone();
        while first > 0 && layers[first - 1].output_group == dirty_name {
            first -= 1;
        }
        // Later groups composite this one's output and inherit the staleness.
        for layer in &layers[first..] {
            dirty.mark(layer.selector, true);
        }

        let runs = group_runs(layers);
        let first_run = runs
            .iter()
            .position(|run| run.start == first)
            .unwrap_or(0);

        let mut emitter = PlanEmitter::new(settings.inject_event);
        let mix = settings.mix_layers;
        let mut prev_group: Option<GroupId> = None;

        for run in &runs[first_run..] {
            let group = &layers[run.start..run.end];
            let (width, height) = scaled_extent(screen_size, group[0].resolution_scale);
            let gid = emitter.add_group(GroupPlan {
                name: run.name.clone(),
                width,
                height,
                publish_blur: false,
            });

            emitter.emit(gid, PassKind::ClearGroup);

            // Foreground stencil prepasses, in layer order, before anything
            // reads the stencil.
            for (index, layer) in group.iter().enumerate() {
                if !layer.foreground {
                    continue;
                }
                let facts = LayerFacts::gather(group, index);
                let decision = decide(&facts, mix);
                emitter.emit(
                    gid,
                    PassKind::StencilPrepass {
                        selector: layer.selector,
                        write_color: decision.prepass == PrepassKind::OpaqueAndStencil,
                    },
                );
            }

            // Everything already composited beneath this group is copied in,
            // clipped against the fresh foreground marks when accumulating.
            let source = match prev_group {
                Some(id) => Some(id),
                None if run.start > 0 => {
                    let prev = &runs[first_run - 1];
                    let prev_slice = &layers[prev.start..prev.end];
                    let (pw, ph) = scaled_extent(screen_size, prev_slice[0].resolution_scale);
                    Some(emitter.add_group(GroupPlan {
                        name: prev.name.clone(),
                        width: pw,
                        height: ph,
                        publish_blur: false,
                    }))
                }
                None => None,
            };
            if let Some(from) = source {
                let stencil_clip = mix && group.iter().any(|layer| layer.foreground);
                emitter.emit(gid, PassKind::CompositeGroup { from, stencil_clip });
            }

            for (index, layer) in group.iter().enumerate() {
                let facts = LayerFacts::gather(group, index);
                let decision = decide(&facts, mix);
                let dest = if layer.blur {
                    Surface::Scratch
                } else {
                    Surface::GroupColor
                };

                if layer.blur {
                    if mix {
                        emitter.emit(gid, PassKind::SeedScratch);
                    } else {
                        emitter.emit(gid, PassKind::ClearScratch);
                    }
                }

                let (phase, stencil_clip) =
                    if layer.foreground && decision.prepass == PrepassKind::OpaqueAndStencil {
                        (DrawPhase::AlphaOnly, false)
                    } else {
                        (DrawPhase::Full, decision.clip_draw)
                    };
                emitter.emit(
                    gid,
                    PassKind::DrawLayer {
                        selector: layer.selector,
                        dest,
                        phase,
                        stencil_clip,
                    },
                );

                if layer.blur {
                    match layer.blur_algorithm {
                        BlurAlgorithm::MipChain => {
                            emitter.emit(
                                gid,
                                PassKind::GenerateMips {
                                    target: Surface::Scratch,
                                },
                            );
                            emitter.emit(
                                gid,
                                PassKind::MipComposite {
                                    src: Surface::Scratch,
                                    mip: layer.blur_mip,
                                    stencil_clip: decision.clip_composite,
                                },
                            );
                        }
                        BlurAlgorithm::GaussianSeparable => {
                            emit_gaussian(
                                &mut emitter,
                                gid,
                                Surface::Scratch,
                                Surface::GroupColor,
                                layer.gaussian_sigma,
                                layer.iterations,
                                layer.tint,
                                decision.clip_composite,
                            );
                        }
                    }
                }

                if layer.global_blur.contains(GlobalBlur::MIP_CHAIN) {
                    emitter.emit(
                        gid,
                        PassKind::GenerateMips {
                            target: Surface::GroupColor,
                        },
                    );
                }
                if layer.global_blur.contains(GlobalBlur::GAUSSIAN) {
                    emit_gaussian(
                        &mut emitter,
                        gid,
                        Surface::GroupColor,
                        Surface::Scratch,
                        layer.global_sigma,
                        layer.global_iterations,
                        Vec4::ZERO,
                        false,
                    );
                    emitter.emit(
                        gid,
                        PassKind::GenerateMips {
                            target: Surface::Scratch,
                        },
                    );
                    if !run.name.is_empty() {
                        emitter.mark_publish_blur(gid);
                        emitter.emit(gid, PassKind::PublishBlur);
                    }
                }
            }

            if !run.name.is_empty() {
                emitter.emit(gid, PassKind::PublishColor);
            }
            prev_group = Some(gid);
        }

        for layer in &layers[first..] {
            dirty.clear(layer.selector);
        }

        let plan = emitter.finish();
        debug!(
            groups = plan.groups.len(),
            passes = plan.passes.len(),
            first_layer = first,
            "compose plan built"
        );
        plan
    }
}

impl Default for LayerGraphScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::too_many_arguments)]
fn emit_gaussian(
    emitter: &mut PlanEmitter,
    gid: GroupId,
    src: Surface,
    dest: Surface,
    sigma: f32,
    iterations: u32,
    tint: Vec4,
    stencil_clip: bool,
) {
    let sigma = sigma.max(0.0);
    let mut input = src;
    if sigma > MIN_GAUSSIAN_SIGMA {
        // Prefilter taps a downsampled level so wide kernels stay cheap.
        let lod = sigma.min(MAX_PREFILTER_LOD);
        emitter.emit(gid, PassKind::GenerateMips { target: src });
        for _ in 0..iterations.max(1) {
            let tap_lod = if input == src { lod } else { 0.0 };
            emitter.emit(
                gid,
                PassKind::GaussianHorizontal {
                    src: input,
                    sigma,
                    lod: tap_lod,
                },
            );
            emitter.emit(gid, PassKind::GaussianVertical { sigma });
            input = Surface::GaussDst;
        }
    }
    emitter.emit(
        gid,
        PassKind::GaussianComposite {
            src: input,
            dest,
            tint,
            stencil_clip,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::config::SelectorRegistry;

    struct Fixture {
        registry: SelectorRegistry,
        scheduler: LayerGraphScheduler,
        dirty: DirtyCache,
        settings: ComposeSettings,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                registry: SelectorRegistry::new(),
                scheduler: LayerGraphScheduler::new(),
                dirty: DirtyCache::new(),
                settings: ComposeSettings::default(),
            }
        }

        fn layer(&mut self, group: &str) -> LayerConfig {
            LayerConfig::new(self.registry.register("layer"), group)
        }

        fn build(&mut self, layers: &[LayerConfig]) -> PassPlan {
            self.scheduler
                .build_plan(layers, &mut self.dirty, &self.settings, (256, 256))
        }
    }

    fn count_kind(plan: &PassPlan, matcher: impl Fn(&PassKind) -> bool) -> usize {
        plan.passes.iter().filter(|p| matcher(&p.kind)).count()
    }

    #[test]
    fn empty_layer_list_is_a_noop() {
        let mut fx = Fixture::new();
        assert!(fx.build(&[]).is_empty());
    }

    #[test]
    fn second_build_without_new_dirt_is_empty() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg"), fx.layer("bg")];
        assert!(!fx.build(&layers).is_empty());
        assert!(fx.build(&layers).is_empty());
    }

    #[test]
    fn force_redraw_rebuilds_every_frame() {
        let mut fx = Fixture::new();
        fx.settings.force_redraw = true;
        let layers = vec![fx.layer("bg")];
        assert!(!fx.build(&layers).is_empty());
        assert!(!fx.build(&layers).is_empty());
    }

    #[test]
    fn dirt_propagates_forward_through_stacked_groups() {
        let mut fx = Fixture::new();
        let layers = vec![
            fx.layer("g0"),
            fx.layer("g0"),
            fx.layer("g1"),
            fx.layer("g2"),
        ];
        fx.build(&layers);

        // One layer of g0 changes: g0, g1 and g2 all rebuild.
        fx.dirty.mark(layers[1].selector, true);
        let plan = fx.build(&layers);
        let rebuilt: Vec<_> = plan
            .passes
            .iter()
            .filter(|p| matches!(p.kind, PassKind::DrawLayer { .. }))
            .map(|p| plan.group(p.group).name.clone())
            .collect();
        assert_eq!(rebuilt, ["g0", "g0", "g1", "g2"]);
    }

    #[test]
    fn clean_leading_groups_are_not_redrawn() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("g0"), fx.layer("g1")];
        fx.build(&layers);

        fx.dirty.mark(layers[1].selector, true);
        let plan = fx.build(&layers);
        assert_eq!(
            count_kind(&plan, |k| matches!(k, PassKind::DrawLayer { .. })),
            1
        );
        // The cached g0 output is still composited underneath.
        let (g0, _) = plan.group_named("g0").expect("g0 referenced as source");
        assert_eq!(
            count_kind(
                &plan,
                |k| matches!(k, PassKind::CompositeGroup { from, .. } if *from == g0)
            ),
            1
        );
        // g0 is a read-only source this frame, never cleared or republished.
        assert!(plan.passes.iter().all(|p| p.group != g0));
    }

    #[test]
    fn dirty_range_expands_back_to_group_start() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("g0"), fx.layer("g0"), fx.layer("g0")];
        fx.build(&layers);

        fx.dirty.mark(layers[2].selector, true);
        let plan = fx.build(&layers);
        assert_eq!(
            count_kind(&plan, |k| matches!(k, PassKind::DrawLayer { .. })),
            3
        );
    }

    #[test]
    fn group_switch_composites_previous_group_after_prepass() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("g0"), fx.layer("g1").with_foreground(true)];
        let plan = fx.build(&layers);

        let (g1, _) = plan.group_named("g1").unwrap();
        let kinds: Vec<_> = plan.passes_for(g1).map(|p| &p.kind).collect();
        let prepass = kinds
            .iter()
            .position(|k| matches!(k, PassKind::StencilPrepass { .. }))
            .unwrap();
        let composite = kinds
            .iter()
            .position(|k| matches!(k, PassKind::CompositeGroup { .. }))
            .unwrap();
        assert!(prepass < composite, "stencil marks precede the group copy");
    }

    #[test]
    fn group_composite_is_clipped_only_when_mixing_over_a_foreground() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("g0"), fx.layer("g1").with_foreground(true)];
        let plan = fx.build(&layers);
        assert_eq!(
            count_kind(
                &plan,
                |k| matches!(k, PassKind::CompositeGroup { stencil_clip: false, .. })
            ),
            1
        );

        fx.settings.mix_layers = true;
        for layer in &layers {
            fx.dirty.mark(layer.selector, true);
        }
        let plan = fx.build(&layers);
        assert_eq!(
            count_kind(
                &plan,
                |k| matches!(k, PassKind::CompositeGroup { stencil_clip: true, .. })
            ),
            1
        );
    }

    #[test]
    fn clean_foreground_group_merges_opaque_into_prepass() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg"), fx.layer("bg").with_foreground(true)];
        let plan = fx.build(&layers);

        assert_eq!(
            count_kind(
                &plan,
                |k| matches!(k, PassKind::StencilPrepass { write_color: true, .. })
            ),
            1
        );
        // The foreground's own draw only tops up translucency.
        assert_eq!(
            count_kind(&plan, |k| matches!(
                k,
                PassKind::DrawLayer {
                    phase: DrawPhase::AlphaOnly,
                    stencil_clip: false,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn blur_beneath_foreground_forces_stencil_only_prepass() {
        let mut fx = Fixture::new();
        let layers = vec![
            fx.layer("bg").with_mip_blur(3.0),
            fx.layer("bg").with_foreground(true),
        ];
        let plan = fx.build(&layers);

        assert_eq!(
            count_kind(
                &plan,
                |k| matches!(k, PassKind::StencilPrepass { write_color: false, .. })
            ),
            1
        );
        let foreground_draws = plan
            .passes
            .iter()
            .filter_map(|p| match &p.kind {
                PassKind::DrawLayer { phase, dest, .. } if *dest == Surface::GroupColor => {
                    Some(*phase)
                }
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(foreground_draws, [DrawPhase::Full]);
    }

    #[test]
    fn background_below_foreground_draws_with_stencil_clip() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg"), fx.layer("bg").with_foreground(true)];
        let plan = fx.build(&layers);
        let clips: Vec<bool> = plan
            .passes
            .iter()
            .filter_map(|p| match &p.kind {
                PassKind::DrawLayer { stencil_clip, .. } => Some(*stencil_clip),
                _ => None,
            })
            .collect();
        assert_eq!(clips, [true, false]);
    }

    #[test]
    fn background_above_foreground_draws_unclipped() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg").with_foreground(true), fx.layer("bg")];
        let plan = fx.build(&layers);
        let clips: Vec<bool> = plan
            .passes
            .iter()
            .filter_map(|p| match &p.kind {
                PassKind::DrawLayer { stencil_clip, .. } => Some(*stencil_clip),
                _ => None,
            })
            .collect();
        assert_eq!(clips, [false, false]);
    }

    #[test]
    fn zero_sigma_gaussian_skips_separable_passes() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg").with_gaussian_blur(0.0, 3)];
        let plan = fx.build(&layers);

        assert_eq!(
            count_kind(&plan, |k| matches!(k, PassKind::GaussianHorizontal { .. })),
            0
        );
        assert_eq!(
            count_kind(&plan, |k| matches!(k, PassKind::GaussianVertical { .. })),
            0
        );
        // The untouched scratch content is still composited through.
        assert_eq!(
            count_kind(&plan, |k| matches!(
                k,
                PassKind::GaussianComposite {
                    src: Surface::Scratch,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn gaussian_iterations_refine_progressively() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg").with_gaussian_blur(2.0, 3)];
        let plan = fx.build(&layers);

        let horizontal: Vec<Surface> = plan
            .passes
            .iter()
            .filter_map(|p| match &p.kind {
                PassKind::GaussianHorizontal { src, .. } => Some(*src),
                _ => None,
            })
            .collect();
        assert_eq!(
            horizontal,
            [Surface::Scratch, Surface::GaussDst, Surface::GaussDst]
        );
        assert_eq!(
            count_kind(&plan, |k| matches!(k, PassKind::GaussianVertical { .. })),
            3
        );
        assert_eq!(
            count_kind(&plan, |k| matches!(
                k,
                PassKind::GaussianComposite {
                    src: Surface::GaussDst,
                    dest: Surface::GroupColor,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn mip_blur_generates_pyramid_then_composites_fractional_level() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg").with_mip_blur(2.5)];
        let plan = fx.build(&layers);

        let kinds: Vec<_> = plan.passes.iter().map(|p| &p.kind).collect();
        let pyramid = kinds
            .iter()
            .position(|k| {
                matches!(
                    k,
                    PassKind::GenerateMips {
                        target: Surface::Scratch
                    }
                )
            })
            .unwrap();
        let composite = kinds
            .iter()
            .position(|k| matches!(k, PassKind::MipComposite { mip, .. } if *mip == 2.5))
            .unwrap();
        assert!(pyramid < composite);
    }

    #[test]
    fn mip_composite_is_clipped_when_mixing_under_a_foreground() {
        let mut fx = Fixture::new();
        fx.settings.mix_layers = true;
        let layers = vec![
            fx.layer("bg").with_mip_blur(3.0),
            fx.layer("bg").with_foreground(true),
        ];
        let plan = fx.build(&layers);
        assert_eq!(
            count_kind(
                &plan,
                |k| matches!(k, PassKind::MipComposite { stencil_clip: true, .. })
            ),
            1
        );

        // Outside mix mode the composite rewrites the whole target.
        fx.settings.mix_layers = false;
        for layer in &layers {
            fx.dirty.mark(layer.selector, true);
        }
        let plan = fx.build(&layers);
        assert_eq!(
            count_kind(
                &plan,
                |k| matches!(k, PassKind::MipComposite { stencil_clip: false, .. })
            ),
            1
        );
    }

    #[test]
    fn isolated_blur_clears_scratch_and_mixing_blur_seeds_it() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg").with_gaussian_blur(1.0, 1)];
        let plan = fx.build(&layers);
        assert_eq!(count_kind(&plan, |k| *k == PassKind::ClearScratch), 1);
        assert_eq!(count_kind(&plan, |k| *k == PassKind::SeedScratch), 0);

        fx.settings.mix_layers = true;
        fx.dirty.mark(layers[0].selector, true);
        let plan = fx.build(&layers);
        assert_eq!(count_kind(&plan, |k| *k == PassKind::ClearScratch), 0);
        assert_eq!(count_kind(&plan, |k| *k == PassKind::SeedScratch), 1);
    }

    #[test]
    fn global_exports_follow_the_layer_composite() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg").with_global_blur(
            GlobalBlur::MIP_CHAIN | GlobalBlur::GAUSSIAN,
            2.0,
            1,
        )];
        let plan = fx.build(&layers);

        assert!(plan.groups[0].publish_blur);
        assert_eq!(
            count_kind(&plan, |k| matches!(
                k,
                PassKind::GenerateMips {
                    target: Surface::GroupColor
                }
            )),
            // One explicit pyramid plus the Gaussian prefilter on the same
            // surface.
            2
        );
        assert_eq!(count_kind(&plan, |k| *k == PassKind::PublishBlur), 1);
        assert_eq!(
            count_kind(&plan, |k| matches!(
                k,
                PassKind::GaussianComposite {
                    dest: Surface::Scratch,
                    ..
                }
            )),
            1
        );
    }

    #[test]
    fn groups_publish_once_at_their_end() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("g0"), fx.layer("g0"), fx.layer("g1")];
        let plan = fx.build(&layers);
        assert_eq!(count_kind(&plan, |k| *k == PassKind::PublishColor), 2);
        assert_eq!(
            plan.passes.last().map(|p| &p.kind),
            Some(&PassKind::PublishColor)
        );
    }

    #[test]
    fn unnamed_groups_rebuild_every_frame_and_never_publish() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("")];
        let plan = fx.build(&layers);
        assert_eq!(count_kind(&plan, |k| *k == PassKind::PublishColor), 0);
        // No identity, no caching: the next frame rebuilds again.
        assert!(!fx.build(&layers).is_empty());
    }

    #[test]
    fn resolution_scale_shrinks_targets_with_a_floor_of_one_pixel() {
        let mut fx = Fixture::new();
        let layers = vec![fx.layer("bg").with_resolution_scale(0.25)];
        let plan = fx
            .scheduler
            .build_plan(&layers, &mut fx.dirty, &fx.settings, (64, 64));
        assert_eq!((plan.groups[0].width, plan.groups[0].height), (16, 16));

        fx.dirty.mark(layers[0].selector, true);
        let plan = fx
            .scheduler
            .build_plan(&layers, &mut fx.dirty, &fx.settings, (2, 2));
        assert_eq!((plan.groups[0].width, plan.groups[0].height), (1, 1));
    }

    #[test]
    fn pass_order_is_strictly_monotonic() {
        let mut fx = Fixture::new();
        let layers = vec![
            fx.layer("g0").with_gaussian_blur(2.0, 2),
            fx.layer("g0").with_foreground(true),
            fx.layer("g1").with_mip_blur(3.0),
        ];
        let plan = fx.build(&layers);
        assert!(
            plan.passes
                .windows(2)
                .all(|pair| pair[0].order < pair[1].order)
        );
        assert_eq!(plan.passes[0].order.event, fx.settings.inject_event);
    }
}
