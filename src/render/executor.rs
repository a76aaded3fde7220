use glam::Vec2;
use tracing::{trace, warn};

use crate::compose::config::{ComposeSettings, LayerKey};
use crate::compose::plan::{DrawPhase, GroupPlan, PassKind, PassPlan, Surface};
use crate::error::ComposeError;

use super::composite::CompositeStage;
use super::gaussian::GaussianStage;
use super::mip::MipChainGenerator;
use super::publish::{PublishedTexture, PublishedTextures, blur_export_name};
use super::targets::{GroupTargetStore, RenderTargetSet};

/// Stencil behavior a layer draw must realize in its pipeline state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StencilMode {
    Disabled,
    /// Write the reference value where the layer covers pixels
    /// (pass op Replace, compare Always).
    WriteReference,
    /// Draw only where the reference has not been written
    /// (compare NotEqual, no stencil writes).
    ClipNotEqual,
}

/// Everything the host needs to record one layer's content into the render
/// pass it is handed: which draw filter, which content phase, and the
/// stencil/attachment state its pipelines must match.
#[derive(Clone, Copy, Debug)]
pub struct LayerDrawRequest {
    pub selector: LayerKey,
    pub phase: DrawPhase,
    pub stencil: StencilMode,
    /// Already set on the pass; exposed so host pipelines can bake it.
    pub stencil_ref: u32,
    pub color_format: wgpu::TextureFormat,
    /// The pass carries a `Depth24PlusStencil8` attachment; host pipelines
    /// need a matching `depth_stencil` state.
    pub has_depth_stencil: bool,
    pub target_size: (u32, u32),
}

/// Host seam for layer content. The pipeline owns targets, pass setup and
/// ordering; the host owns meshes, materials and draw submission.
pub trait LayerDrawer {
    fn draw_layer(&mut self, request: &LayerDrawRequest, pass: &mut wgpu::RenderPass<'_>);
}

/// Per-frame GPU access handed in by the host. Commands are recorded into
/// the encoder in plan order; the host submits them.
pub struct FrameContext<'a> {
    pub device: &'a wgpu::Device,
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub screen_size: (u32, u32),
}

/// Shared pipelines for the fixed-function passes, built once per color
/// format.
pub(crate) struct RenderStages {
    composite: CompositeStage,
    gaussian: GaussianStage,
    mips: MipChainGenerator,
    format: wgpu::TextureFormat,
}

impl RenderStages {
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Self {
        Self {
            composite: CompositeStage::new(device, format),
            gaussian: GaussianStage::new(device, format),
            mips: MipChainGenerator::new(device, format),
            format,
        }
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }
}

/// Records every pass of the plan into the frame's encoder, in plan order.
/// Failures are absorbed per pass: a missing surface skips that pass with a
/// warning and the affected group keeps its stale publish.
pub(crate) fn execute_plan(
    plan: &PassPlan,
    stages: &RenderStages,
    targets: &mut GroupTargetStore,
    published: &mut PublishedTextures,
    settings: &ComposeSettings,
    frame: &mut FrameContext<'_>,
    drawer: &mut dyn LayerDrawer,
) {
    for group in &plan.groups {
        targets.ensure(
            frame.device,
            &group.name,
            group.width,
            group.height,
            stages.format(),
        );
    }

    let stencil_ref = settings.stencil_ref;
    for pass in &plan.passes {
        let group = plan.group(pass.group);
        let set = match resolve_targets(targets, group) {
            Ok(set) => set,
            Err(error) => {
                warn!(%error, "skipping pass");
                continue;
            }
        };
        trace!(group = group.name.as_str(), kind = ?pass.kind, "recording pass");

        match &pass.kind {
            PassKind::ClearGroup => {
                let color = settings.clear_color;
                let _pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Group"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: set.color_target(),
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: color[0] as f64,
                                g: color[1] as f64,
                                b: color[2] as f64,
                                a: color[3] as f64,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                        resolve_target: None,
                    })],
                    depth_stencil_attachment: Some(depth_stencil_attachment(
                        set.depth_stencil(),
                        wgpu::LoadOp::Clear(1.0),
                        wgpu::LoadOp::Clear(0),
                    )),
                    ..Default::default()
                });
            }
            PassKind::ClearScratch => {
                let _pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Clear Scratch"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: set.scratch_target(),
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                        depth_slice: None,
                        resolve_target: None,
                    })],
                    depth_stencil_attachment: None,
                    ..Default::default()
                });
            }
            PassKind::SeedScratch => {
                stages.composite.composite(
                    frame.device,
                    frame.encoder,
                    "Seed Scratch",
                    set.color_sample(),
                    set.scratch_target(),
                    None,
                    false,
                    stencil_ref,
                    glam::Vec4::ZERO,
                    0.0,
                );
            }
            PassKind::StencilPrepass {
                selector,
                write_color,
            } => {
                let phase = if *write_color {
                    DrawPhase::OpaqueAndStencil
                } else {
                    DrawPhase::StencilOnly
                };
                draw_layer_pass(
                    frame,
                    drawer,
                    set,
                    "Stencil Prepass",
                    *selector,
                    Surface::GroupColor,
                    phase,
                    StencilMode::WriteReference,
                    stencil_ref,
                );
            }
            PassKind::DrawLayer {
                selector,
                dest,
                phase,
                stencil_clip,
            } => {
                let stencil = if *stencil_clip {
                    StencilMode::ClipNotEqual
                } else {
                    StencilMode::Disabled
                };
                draw_layer_pass(
                    frame, drawer, set, "Draw Layer", *selector, *dest, *phase, stencil,
                    stencil_ref,
                );
            }
            PassKind::GenerateMips { target } => {
                let texture = match target {
                    Surface::GroupColor => set.color_texture(),
                    Surface::Scratch => set.scratch_texture(),
                    other => {
                        warn!(surface = ?other, "surface has no mip chain");
                        continue;
                    }
                };
                stages
                    .mips
                    .generate(frame.device, frame.encoder, texture, set.mip_levels());
            }
            PassKind::MipComposite {
                src,
                mip,
                stencil_clip,
            } => {
                let lod = mip.min((set.mip_levels() - 1) as f32);
                stages.composite.composite(
                    frame.device,
                    frame.encoder,
                    "Mip Composite",
                    sample_view(set, *src),
                    set.color_target(),
                    Some(set.depth_stencil()),
                    *stencil_clip,
                    stencil_ref,
                    glam::Vec4::ZERO,
                    lod,
                );
            }
            PassKind::GaussianHorizontal { src, sigma, lod } => {
                stages.gaussian.blur(
                    frame.device,
                    frame.encoder,
                    "Gaussian H",
                    sample_view(set, *src),
                    set.gauss_tmp(),
                    texel_size(set),
                    [1.0, 0.0],
                    *sigma,
                    *lod,
                );
            }
            PassKind::GaussianVertical { sigma } => {
                stages.gaussian.blur(
                    frame.device,
                    frame.encoder,
                    "Gaussian V",
                    set.gauss_tmp(),
                    set.gauss_dst(),
                    texel_size(set),
                    [0.0, 1.0],
                    *sigma,
                    0.0,
                );
            }
            PassKind::GaussianComposite {
                src,
                dest,
                tint,
                stencil_clip,
            } => {
                let (destination, depth_stencil) = match dest {
                    Surface::GroupColor => {
                        (set.color_target(), Some(set.depth_stencil()))
                    }
                    Surface::Scratch => (set.scratch_target(), None),
                    other => {
                        warn!(surface = ?other, "invalid gaussian composite destination");
                        continue;
                    }
                };
                stages.composite.composite(
                    frame.device,
                    frame.encoder,
                    "Gaussian Composite",
                    sample_view(set, *src),
                    destination,
                    depth_stencil,
                    *stencil_clip,
                    stencil_ref,
                    *tint,
                    0.0,
                );
            }
            PassKind::CompositeGroup { from, stencil_clip } => {
                let source_group = plan.group(*from);
                let Some(source) = targets.get(&source_group.name) else {
                    warn!(
                        group = source_group.name.as_str(),
                        "source group has no targets; skipping composite"
                    );
                    continue;
                };
                stages.composite.composite(
                    frame.device,
                    frame.encoder,
                    "Composite Group",
                    source.color_sample(),
                    set.color_target(),
                    Some(set.depth_stencil()),
                    *stencil_clip,
                    stencil_ref,
                    glam::Vec4::ZERO,
                    0.0,
                );
            }
            PassKind::PublishColor => {
                published.publish(
                    group.name.clone(),
                    PublishedTexture {
                        view: set.color_sample().clone(),
                        width: set.width(),
                        height: set.height(),
                        uv_scale: uv_scale(set, frame.screen_size),
                    },
                );
            }
            PassKind::PublishBlur => {
                published.publish(
                    blur_export_name(&group.name),
                    PublishedTexture {
                        view: set.scratch_sample().clone(),
                        width: set.width(),
                        height: set.height(),
                        uv_scale: uv_scale(set, frame.screen_size),
                    },
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_layer_pass(
    frame: &mut FrameContext<'_>,
    drawer: &mut dyn LayerDrawer,
    set: &RenderTargetSet,
    label: &str,
    selector: LayerKey,
    dest: Surface,
    phase: DrawPhase,
    stencil: StencilMode,
    stencil_ref: u32,
) {
    // Blurred layers render into scratch with no stencil surface; everything
    // else draws over the accumulating group color.
    let (view, depth_stencil) = match dest {
        Surface::Scratch => (set.scratch_target(), None),
        _ => (set.color_target(), Some(set.depth_stencil())),
    };

    let request = LayerDrawRequest {
        selector,
        phase,
        stencil: if depth_stencil.is_some() {
            stencil
        } else {
            StencilMode::Disabled
        },
        stencil_ref,
        color_format: set.format(),
        has_depth_stencil: depth_stencil.is_some(),
        target_size: (set.width(), set.height()),
    };

    let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Load,
                store: wgpu::StoreOp::Store,
            },
            depth_slice: None,
            resolve_target: None,
        })],
        depth_stencil_attachment: depth_stencil.map(|ds| {
            depth_stencil_attachment(ds, wgpu::LoadOp::Load, wgpu::LoadOp::Load)
        }),
        ..Default::default()
    });
    if request.has_depth_stencil {
        pass.set_stencil_reference(stencil_ref);
    }
    drawer.draw_layer(&request, &mut pass);
}

fn resolve_targets<'a>(
    targets: &'a GroupTargetStore,
    group: &GroupPlan,
) -> Result<&'a RenderTargetSet, ComposeError> {
    targets
        .get(&group.name)
        .ok_or_else(|| ComposeError::MissingGroup(group.name.clone()))
}

fn sample_view(set: &RenderTargetSet, surface: Surface) -> &wgpu::TextureView {
    match surface {
        Surface::GroupColor => set.color_sample(),
        Surface::Scratch => set.scratch_sample(),
        Surface::GaussTmp => set.gauss_tmp(),
        Surface::GaussDst => set.gauss_dst(),
    }
}

fn texel_size(set: &RenderTargetSet) -> [f32; 2] {
    [1.0 / set.width() as f32, 1.0 / set.height() as f32]
}

fn uv_scale(set: &RenderTargetSet, screen: (u32, u32)) -> Vec2 {
    Vec2::new(
        set.width() as f32 / screen.0.max(1) as f32,
        set.height() as f32 / screen.1.max(1) as f32,
    )
}

fn depth_stencil_attachment<'a>(
    view: &'a wgpu::TextureView,
    depth_load: wgpu::LoadOp<f32>,
    stencil_load: wgpu::LoadOp<u32>,
) -> wgpu::RenderPassDepthStencilAttachment<'a> {
    wgpu::RenderPassDepthStencilAttachment {
        view,
        depth_ops: Some(wgpu::Operations {
            load: depth_load,
            store: wgpu::StoreOp::Store,
        }),
        stencil_ops: Some(wgpu::Operations {
            load: stencil_load,
            store: wgpu::StoreOp::Store,
        }),
    }
}
