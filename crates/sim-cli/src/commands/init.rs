use std::path::Path;

use sim_config::ConfigLoader;
use sim_core::Result;

pub(super) fn cmd_init(force: bool) -> Result<()> {
    let path = std::env::current_dir()?.join(ConfigLoader::FILE_NAME);
    write_config(&path, force)?;
    println!("Wrote {}", path.display());
    println!("   Add a [[population]] entry per agent, then run 'simulacra run'.");
    Ok(())
}

fn write_config(path: &Path, force: bool) -> Result<()> {
    ConfigLoader::write_default(path, force)
}
