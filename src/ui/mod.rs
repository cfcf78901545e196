mod format;
mod status;
mod table;

pub use format::{format_bytes, format_u64_commas};
pub use status::{print_command_status, CommandStatus};
pub use table::listing_table;
