//! Domain model (ids, envelopes, intents, catalog, plans, errors).

pub mod catalog;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod intent;
pub mod plan;
pub mod state;

pub use self::catalog::{
    Catalog, CatalogEntry, CatalogFilter, EntryKind, EntryRef, FaqEntry, InputSpec, OutputSpec,
    Script, ScriptHelp, Workflow, WorkflowStep,
};
pub use self::envelope::{Body, Envelope, EnvelopeKind, Notice, Reply, RequestBody};
pub use self::errors::{BusError, CeaplanError, ErrorKind, ErrorPayload, ProviderError};
pub use self::ids::{EnvelopeId, HandlerId};
pub use self::intent::{ActionCategory, FileKind, FileMention, Intent, MissingPiece, Scope};
pub use self::plan::{ExecutionPlan, PlanStep};
pub use self::state::HandlerState;
