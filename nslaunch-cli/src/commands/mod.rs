use crate::cli::Commands;
use anyhow::Result;
use nslaunch_core::{CreationStage, LaunchError};

pub mod namespaces;
pub mod run;

/// Exit status for a program that could not be found, as in sh(1)
const STATUS_NOT_FOUND: i32 = 127;

/// Exit status for a program that was found but could not be started
const STATUS_CANNOT_EXECUTE: i32 = 126;

/// Dispatch command to appropriate handler, returning the exit status
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run(args) => run::execute(args).await,

        Commands::Namespaces { pid } => {
            namespaces::execute(pid)?;
            Ok(0)
        }
    }
}

/// Exit status for a command that failed before producing one
pub fn failure_status(error: &anyhow::Error) -> i32 {
    match error.downcast_ref::<LaunchError>() {
        Some(LaunchError::ExecutableNotFound { .. }) => STATUS_NOT_FOUND,
        Some(LaunchError::CreationFailed(e)) if e.stage == CreationStage::Exec => {
            STATUS_CANNOT_EXECUTE
        }
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use nix::errno::Errno;
    use nslaunch_core::CreationError;

    #[test]
    fn test_failure_status() {
        let not_found: Result<()> = Err(LaunchError::ExecutableNotFound {
            program: "nope".to_string(),
        })
        .context("Failed to launch nope");
        assert_eq!(failure_status(&not_found.unwrap_err()), STATUS_NOT_FOUND);

        let exec = anyhow::Error::new(LaunchError::from(CreationError::new(
            CreationStage::Exec,
            Errno::EACCES,
        )));
        assert_eq!(failure_status(&exec), STATUS_CANNOT_EXECUTE);

        let clone = anyhow::Error::new(LaunchError::from(CreationError::new(
            CreationStage::Clone,
            Errno::EPERM,
        )));
        assert_eq!(failure_status(&clone), 1);

        assert_eq!(failure_status(&anyhow::anyhow!("other")), 1);
    }
}
