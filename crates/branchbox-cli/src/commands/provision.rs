use super::{exit_code_for, json_pretty, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use branchbox_core::Engine;

pub fn run(
    engine: &Engine,
    branch: &str,
    service: &str,
    ttl_minutes: Option<i64>,
    json: bool,
) -> Result<u8, String> {
    let pb = (!json).then(|| spinner(&format!("provisioning {branch} ({service})...")));

    match engine.provision(branch, service, ttl_minutes) {
        Ok(receipt) => {
            if let Some(ref pb) = pb {
                spin_ok(pb, &format!("environment {} is up", receipt.env_id));
            }
            if json {
                println!("{}", json_pretty(&receipt)?);
            } else {
                println!("url:        {}", receipt.url);
                println!("commit:     {}", receipt.commit);
                println!("expires at: {}", receipt.expires_at.to_rfc3339());
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            if let Some(ref pb) = pb {
                spin_fail(pb, &format!("provisioning {branch} failed"));
            }
            eprintln!("error: {e}");
            Ok(exit_code_for(e.kind()))
        }
    }
}
