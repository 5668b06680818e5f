use super::{colorize_state, json_pretty, EXIT_SUCCESS};
use branchbox_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let envs = engine.list().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&envs)?);
    } else if envs.is_empty() {
        println!("no environments found");
    } else {
        println!(
            "{:<42} {:<20} {:<8} {:<10} {:>7} URL",
            "ENV_ID", "BRANCH", "SERVICE", "STATE", "TTL_MIN"
        );
        for env in &envs {
            let state = colorize_state(&env.record.state.to_string());
            println!(
                "{:<42} {:<20} {:<8} {:<10} {:>7} {}",
                env.record.env_id,
                env.record.branch,
                env.record.service,
                state,
                env.minutes_remaining,
                env.record.public_url
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
