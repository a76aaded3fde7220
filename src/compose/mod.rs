pub mod config;
pub mod decision;
pub mod dirty;
pub mod pipeline;
pub mod plan;
pub mod scheduler;

pub use config::{
    BlurAlgorithm, ComposeSettings, GlobalBlur, LayerConfig, LayerKey, SelectorRegistry,
};
pub use decision::{LayerDecision, LayerFacts, PrepassKind, decide};
pub use dirty::DirtyCache;
pub use pipeline::{ComposePipeline, GroupDiagnostics, PipelineDiagnostics};
pub use plan::{DrawPhase, GroupId, GroupPlan, OrderKey, PassDesc, PassKind, PassPlan, Surface};
pub use scheduler::{LayerGraphScheduler, MIN_GAUSSIAN_SIGMA};
