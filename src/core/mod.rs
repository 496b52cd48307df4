pub mod constants;
pub mod identity;
pub mod operation;
pub mod socket;
pub mod user_data;

pub use identity::{ClientIdentity, Frame, Identity, Multipart, WorkerIdentity};
pub use operation::{Operation, Side};
