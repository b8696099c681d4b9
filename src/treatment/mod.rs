//! Treatment catalog and approval/execution workflow.
//!
//! A diagnosed condition is looked up in the [`TreatmentCatalog`], the
//! resulting options are approved by a human or by the autonomous rule in
//! [`TreatmentOrchestrator`], and approved remedies run through handlers
//! registered per treatment id. Outcomes feed back into the catalog's
//! effectiveness ledger.

pub mod catalog;
pub mod orchestrator;

pub use catalog::{
    ContainmentTier, EffectivenessLedger, RiskLevel, TreatmentCatalog, TreatmentEffectiveness,
    TreatmentOption,
};
pub use orchestrator::{
    handler_fn, ApprovedTreatment, Approver, BoxedApply, ConditionSeverity, ExecutionStatus,
    FnHandler, HandlerError, ParseSeverityError, TreatmentError, TreatmentHandler, TreatmentMode,
    TreatmentOrchestrator, TreatmentRecord,
};
