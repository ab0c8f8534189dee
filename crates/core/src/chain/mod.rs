pub mod engine;

pub use engine::{
    AdvanceContext, AdvanceOutcome, ApproveOutcome, CancelContext, ChainEngine, Decision,
    KindProfile, SubmitContext, SubmitOutcome,
};
