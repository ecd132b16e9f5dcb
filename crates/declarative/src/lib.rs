//! # Declarative
//!
//! Primitives for converging a remote system on a declared state.
//!
//! ## Core Concepts
//!
//! - **ResourceMapping**: name → server id, built once per collection per run
//! - **Store**: a remote collection that can create and overwrite records
//! - **upsert**: update-if-present-else-create, by unconditional overwrite
//! - **Containers**: resources owning member ids; target selection,
//!   conflict detachment planning and membership echo checks
//! - **Pipeline**: ordered steps, each classified by [`StepOutcome`]
//!
//! ## Example
//!
//! ```ignore
//! use declarative::{NoObserver, Pipeline, StepOutcome};
//!
//! let report = Pipeline::new()
//!     .step("authenticate", StepOutcome::Fatal, |ctx: &mut Run| ctx.authenticate())
//!     .step("resolve flow", StepOutcome::Informational, |ctx: &mut Run| ctx.resolve_flow())
//!     .step("upsert grafana", StepOutcome::Recoverable, |ctx: &mut Run| ctx.upsert("grafana"))
//!     .step("assign membership", StepOutcome::Fatal, |ctx: &mut Run| ctx.assign())
//!     .run(&mut run, &mut NoObserver);
//!
//! if !report.is_success() {
//!     eprintln!("aborted at {:?}", report.aborted_at);
//! }
//! ```
//!
//! The crate has no knowledge of any particular API: stores are generic over
//! their id, specification and error types.

pub mod container;
pub mod mapping;
pub mod pipeline;
pub mod resource;
pub mod types;

// Re-export main types at crate root
pub use container::{ContainerSelector, ContainerView, Detachment, MembershipCheck, plan_detach};
pub use mapping::ResourceMapping;
pub use pipeline::{
    NoObserver, Pipeline, PipelineReport, StepObserver, StepRecord, StepStatus,
};
pub use resource::{Store, Upserted, upsert};
pub use types::{ApplyResult, ApplySummary, StepOutcome};
