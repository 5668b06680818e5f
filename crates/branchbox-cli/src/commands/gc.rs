use super::{json_pretty, EXIT_FAILURE, EXIT_SUCCESS};
use branchbox_core::Engine;

pub fn run(engine: &Engine, json: bool) -> Result<u8, String> {
    let report = engine.garbage_collect().map_err(|e| e.to_string())?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!("gc: reclaimed {} environments", report.destroyed.len());
        for env_id in &report.destroyed {
            println!("  {env_id}");
        }
        for failure in &report.failed {
            eprintln!("  failed: {} ({})", failure.env_id, failure.error);
        }
    }
    // Per-id failures are reported, not fatal to the sweep; still signal them
    if report.failed.is_empty() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_FAILURE)
    }
}
