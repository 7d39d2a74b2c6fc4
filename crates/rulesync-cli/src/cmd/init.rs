use anyhow::Context;
use rulesync_core::{config::Config, io, paths};
use std::path::Path;

pub fn run(root: &Path, server: Option<&str>) -> anyhow::Result<()> {
    println!("Initializing rulesync in: {}", root.display());

    let dir = paths::rulesync_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_path = paths::config_path(root);
    let config = if config_path.exists() {
        let mut cfg = Config::load(root).context("failed to read config.yaml")?;
        match server {
            Some(url) if url != cfg.server_url => {
                cfg.server_url = url.to_string();
                cfg.save(root).context("failed to write config.yaml")?;
                println!("  updated: {} (server_url)", paths::CONFIG_FILE);
            }
            _ => println!("  exists:  {}", paths::CONFIG_FILE),
        }
        cfg
    } else {
        let cfg = match server {
            Some(url) => Config::new(url),
            None => Config::default(),
        };
        cfg.save(root).context("failed to write config.yaml")?;
        println!("  created: {}", paths::CONFIG_FILE);
        cfg
    };

    let rules = paths::rules_dir(root, &config.rules_dir);
    if rules.is_dir() {
        println!("  exists:  {}/", config.rules_dir);
    } else {
        io::ensure_dir(&rules).with_context(|| format!("failed to create {}", rules.display()))?;
        println!("  created: {}/", config.rules_dir);
    }

    println!("\nServer: {}", config.server_url);
    println!("Next: add rules to {}/ and run `rulesync sync`.", config.rules_dir);
    Ok(())
}
