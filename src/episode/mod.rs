mod filename;
mod transfer;

pub use filename::{resolve_filename, sanitize_name};
pub use transfer::{TransferJob, TransferOutcome, execute_transfer};
