use glam::Vec4;
use smol_str::SmolStr;

use super::config::LayerKey;

/// Logical ordering key: host injection event plus a monotonic counter.
/// Passes within one plan execute in exactly this order; later passes read
/// surfaces written by earlier ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    pub event: u32,
    pub seq: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GroupId(pub usize);

/// One output group's resolved allocation request for this frame.
#[derive(Clone, Debug)]
pub struct GroupPlan {
    pub name: SmolStr,
    pub width: u32,
    pub height: u32,
    /// A pre-blurred export is produced and published under the `_BLUR`
    /// suffix name.
    pub publish_blur: bool,
}

/// Surfaces of a group's render-target set that passes read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Surface {
    /// Accumulating group composite, mip-capable, depth/stencil attached.
    GroupColor,
    /// Blur staging buffer, mip-capable, no depth/stencil.
    Scratch,
    /// Gaussian ping-pong pair, single mip.
    GaussTmp,
    GaussDst,
}

/// What portion of a layer's content a draw covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawPhase {
    /// Opaque and translucent content together.
    Full,
    /// Translucent content only; the opaque part was drawn during the
    /// stencil prepass.
    AlphaOnly,
    /// Stencil reference only, color writes disabled.
    StencilOnly,
    /// Stencil reference and opaque color in one draw.
    OpaqueAndStencil,
}

#[derive(Clone, Debug, PartialEq)]
pub enum PassKind {
    /// Clear the group color and stencil to their frame-start state.
    ClearGroup,
    /// Clear the scratch buffer before an isolated layer blur.
    ClearScratch,
    /// Copy the live group composite into scratch so the blur accumulates
    /// over it.
    SeedScratch,
    StencilPrepass {
        selector: LayerKey,
        write_color: bool,
    },
    DrawLayer {
        selector: LayerKey,
        dest: Surface,
        phase: DrawPhase,
        stencil_clip: bool,
    },
    GenerateMips {
        target: Surface,
    },
    /// Composite a fractional mip of the scratch pyramid onto the group
    /// color.
    MipComposite {
        src: Surface,
        mip: f32,
        stencil_clip: bool,
    },
    GaussianHorizontal {
        src: Surface,
        sigma: f32,
        /// Mip level of the first tap; prefiltering for large sigmas.
        lod: f32,
    },
    GaussianVertical {
        sigma: f32,
    },
    GaussianComposite {
        src: Surface,
        dest: Surface,
        tint: Vec4,
        stencil_clip: bool,
    },
    /// Copy a previously composited group under this one. The only
    /// cross-group read in the pipeline.
    CompositeGroup {
        from: GroupId,
        stencil_clip: bool,
    },
    PublishColor,
    PublishBlur,
}

#[derive(Clone, Debug)]
pub struct PassDesc {
    pub group: GroupId,
    pub order: OrderKey,
    pub kind: PassKind,
}

/// The scheduler's output for one frame. Rebuilt whenever a dirty group is
/// processed, discarded after submission.
#[derive(Clone, Debug, Default)]
pub struct PassPlan {
    pub groups: Vec<GroupPlan>,
    pub passes: Vec<PassDesc>,
}

impl PassPlan {
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    pub fn group(&self, id: GroupId) -> &GroupPlan {
        &self.groups[id.0]
    }

    pub fn group_named(&self, name: &str) -> Option<(GroupId, &GroupPlan)> {
        self.groups
            .iter()
            .enumerate()
            .find(|(_, g)| g.name == name)
            .map(|(i, g)| (GroupId(i), g))
    }

    pub fn passes_for(&self, id: GroupId) -> impl Iterator<Item = &PassDesc> {
        self.passes.iter().filter(move |p| p.group == id)
    }
}

/// Rounded extent after resolution scaling, clamped to one pixel per axis.
pub(crate) fn scaled_extent(screen: (u32, u32), scale: f32) -> (u32, u32) {
    let w = (screen.0 as f32 * scale).round().max(1.0) as u32;
    let h = (screen.1 as f32 * scale).round().max(1.0) as u32;
    (w, h)
}
