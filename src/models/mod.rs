mod operation;

pub use operation::{EntityKind, OperationKind, PendingOperation};
