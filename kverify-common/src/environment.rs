//! Projection of instance identity and state into `KITCHEN_*` variables.

use crate::shellout::ShellOutOptions;
use crate::state::{InstanceIdentity, State};
use std::collections::BTreeMap;
use tracing::warn;

/// Prefix shared by every projected variable.
pub const ENV_PREFIX: &str = "KITCHEN_";

/// Environment variable names to values, ordered by name.
pub type Environment = BTreeMap<String, String>;

/// Build the `KITCHEN_*` variables for an instance.
///
/// The three identity variables are seeded first; every state entry then
/// adds `KITCHEN_<KEY>` with the key uppercased. Later writes win, so a
/// state key such as `suite` overrides the seeded `KITCHEN_SUITE`, and two
/// keys that uppercase identically resolve to whichever sorts last. Both
/// cases are logged.
pub fn project_environment(instance: &InstanceIdentity, state: &State) -> Environment {
    let mut env = Environment::new();
    env.insert(format!("{ENV_PREFIX}INSTANCE"), instance.name.clone());
    env.insert(format!("{ENV_PREFIX}PLATFORM"), instance.platform.clone());
    env.insert(format!("{ENV_PREFIX}SUITE"), instance.suite.clone());

    for (key, value) in state.iter() {
        let name = format!("{ENV_PREFIX}{}", key.to_uppercase());
        if let Some(previous) = env.insert(name.clone(), value.to_string()) {
            warn!(
                "State key '{}' overwrites {} (previous value '{}')",
                key, name, previous
            );
        }
    }

    env
}

/// Derive new shell-out options carrying the projected variables. The
/// caller's options are left untouched; projected keys win on collision.
pub fn project_into(
    options: &ShellOutOptions,
    instance: &InstanceIdentity,
    state: &State,
) -> ShellOutOptions {
    options.merged_with(&project_environment(instance, state))
}
