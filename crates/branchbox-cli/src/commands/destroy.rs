use super::{exit_code_for, EXIT_SUCCESS};
use branchbox_core::Engine;

pub fn run(engine: &Engine, env_id: &str, json: bool) -> Result<u8, String> {
    match engine.destroy(env_id) {
        Ok(()) => {
            if json {
                println!(r#"{{"ok": true}}"#);
            } else {
                println!("destroyed {env_id}");
            }
            Ok(EXIT_SUCCESS)
        }
        Err(e) => {
            eprintln!("error: {e}");
            Ok(exit_code_for(e.kind()))
        }
    }
}
