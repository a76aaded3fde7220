use smol_str::SmolStr;
use thiserror::Error;

/// Pass-level failures. These never escape a frame: the executor absorbs
/// them, skips the affected pass and leaves the group's last publish stale.
#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("output group `{0}` has no allocated render targets")]
    MissingGroup(SmolStr),
}
