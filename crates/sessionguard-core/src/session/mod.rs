//! Session reconciliation against the server and the lifecycle around it.
//!
//! - `SessionValidator`: one validation run, never overlapping
//! - `LifecycleManager`: triggers, remediation and redirect after invalidation

pub mod lifecycle;
pub mod types;
pub mod validator;

pub use lifecycle::{redirect_destination, LifecycleManager, LifecycleState, PageEvent};
pub use types::{Session, ValidationResult, ValidationStatus};
pub use validator::{SessionValidator, ValidationGuard, ValidationPhase};
