pub mod assignment;
pub mod dispatch;
pub mod ledger;
pub mod matching;
pub mod queue;
pub mod registry;
pub mod state_machine;
