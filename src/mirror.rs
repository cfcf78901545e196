use anyhow::Result;

use crate::args::BaseArgs;
use crate::export::{self, BucketArgs};
use crate::ui::{print_command_status, CommandStatus};

pub async fn run(base: BaseArgs, args: BucketArgs) -> Result<()> {
    print_command_status(
        CommandStatus::Warning,
        "Command 'mirror' is deprecated. Use 'export bucket' instead",
    );
    export::run_bucket(&base, args).await
}
