//! Reference host target for graphc programs.
//!
//! Every computable operator is lowered into a [`Kernel`] that runs the operator's
//! host implementation and counts launches on the [`RefContext`].

mod kernel;
mod target;

use std::sync::Arc;

use once_cell::sync::Lazy;

pub use kernel::{Kernel, LowerToRef, KERNEL_NAME};
pub use target::{RefContext, RefTarget, TARGET_NAME};

static REGISTERED: Lazy<()> = Lazy::new(|| {
    graphc::target::register_target(TARGET_NAME, || Arc::new(RefTarget::new()));
    graphc::ops::register_operator::<Kernel>(KERNEL_NAME);
    tracing::debug!(target = TARGET_NAME, "registered reference target");
});

/// Registers the `"ref"` target and the `ref::kernel` operator.
///
/// Needed before loading a serialized program compiled for this target.
/// Calling it more than once is harmless.
pub fn register_ref_target() {
    Lazy::force(&REGISTERED);
}
