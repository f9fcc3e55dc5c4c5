// Order execution: exit checks and fill reconciliation
pub mod exits;
pub mod reconciler;

pub use exits::{should_exit, ExitLevels};
pub use reconciler::{OrderReconciler, ReconcileNotice};
