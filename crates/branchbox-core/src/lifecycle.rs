use crate::CoreError;
use branchbox_store::EnvState;

pub fn validate_transition(from: EnvState, to: EnvState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (EnvState::Provisioning, EnvState::Running | EnvState::Failed)
            | (EnvState::Running, EnvState::Destroying)
            | (EnvState::Destroying, EnvState::Destroyed)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
