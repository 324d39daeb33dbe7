//! Round-stepping negotiation kernel.
//!
//! A fixed roster of self-interested actors negotiates a collective priority
//! ordering: each round, every actor independently hill-climbs to the
//! position maximizing its own expected utility while everyone else stands
//! still, and the chosen positions form the next round. Expected utility
//! comes from a pluggable coalition-voting oracle; behaviorally identical
//! positions are collapsed before every oracle call.

pub mod actor;
pub mod dedupe;
pub mod matrix;
pub mod negotiation;
pub mod oracle;
pub mod position;
pub mod scenario;
pub mod search;
pub mod state;

pub use negotiation::{
    CapabilityError, NegotiationEngine, RoundMetrics, ScenarioError, StepError, IMPROVEMENT_EPS,
};
