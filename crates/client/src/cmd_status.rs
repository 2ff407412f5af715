//! `dispatchlink status`: print resolved configuration and data paths.

use dispatchlink::{ClientConfig, DataDir, VERSION};
use dispatchlink_protocol::Role;

pub fn run(
    data_dir: &DataDir,
    config: &ClientConfig,
    role: &str,
    has_token: bool,
) -> anyhow::Result<()> {
    println!();
    println!("  Dispatchlink v{}", VERSION);
    println!("  Data dir: {}", data_dir.root().display());

    let config_path = data_dir.config_path();
    if config_path.exists() {
        println!("  Config: {}", config_path.display());
    } else {
        println!("  Config: {} (not found, using defaults)", config_path.display());
    }
    println!("  Log file: {}", data_dir.log_path().display());

    println!();
    println!("  Push endpoint: {}", config.ws_url);
    println!("  API base: {}", config.api_url);
    println!(
        "  Handshake timeout: {}s, reconnect {}",
        config.connect_timeout.as_secs(),
        if config.auto_reconnect {
            format!("every {}s", config.reconnect_delay.as_secs())
        } else {
            "disabled".to_string()
        }
    );

    println!();
    match role.parse::<Role>() {
        Ok(parsed) => println!("  Role: {} (topic {})", role, parsed.topic().destination()),
        Err(_) => println!("  Role: {} (no notification topic for this role)", role),
    }
    println!("  Token: {}", if has_token { "set" } else { "not set" });
    println!();
    Ok(())
}
