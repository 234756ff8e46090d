//! Files the engine reads at start-up: `server.properties` and `eula.txt`.

use crate::config::DeclaredConfig;
use crate::error::Result;
use std::path::Path;

pub const PROPERTIES_FILE: &str = "server.properties";
pub const EULA_FILE: &str = "eula.txt";

/// Render the declared config as flat `key=value` lines.
pub fn render_properties(config: &DeclaredConfig) -> String {
    let entries: [(&str, String); 10] = [
        ("server-port", config.port.to_string()),
        ("server-ip", config.bind_address.clone()),
        ("level-name", config.world_name.clone()),
        ("max-players", config.max_players.to_string()),
        ("difficulty", config.difficulty.to_string()),
        ("enable-command-block", config.enable_command_block.to_string()),
        ("motd", escape_value(&config.motd)),
        ("online-mode", config.online_mode.to_string()),
        ("enable-query", config.enable_query.to_string()),
        ("query.port", config.query_port.to_string()),
    ];

    let mut out = String::new();
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(&value);
        out.push('\n');
    }
    out
}

/// Write `server.properties` into `dir`, replacing any previous file.
pub async fn write_properties(dir: &Path, config: &DeclaredConfig) -> Result<()> {
    tokio::fs::write(dir.join(PROPERTIES_FILE), render_properties(config)).await?;
    Ok(())
}

/// Write the license acceptance marker into `dir`.
pub async fn write_eula(dir: &Path) -> Result<()> {
    tokio::fs::write(dir.join(EULA_FILE), "eula=true\n").await?;
    Ok(())
}

/// Look up a key in a properties document. Comments and malformed lines are skipped.
pub fn property<'a>(contents: &'a str, key: &str) -> Option<&'a str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with('!'))
        .filter_map(|line| line.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim())
}

/// Effective player cap from the properties file in `dir`.
///
/// `None` when the file is unreadable or the value is not a number.
pub async fn read_max_players(dir: &Path) -> Option<u32> {
    let contents = tokio::fs::read_to_string(dir.join(PROPERTIES_FILE)).await.ok()?;
    property(&contents, "max-players")?.parse().ok()
}

// Newlines would split the entry.
fn escape_value(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\n', "\\n").replace('\r', "")
}
