use crate::cmd::{open_controller, runtime};
use crate::output::print_json;
use std::path::Path;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let rt = runtime()?;
    let (status, server_url, reachable) = rt.block_on(async {
        let ctl = open_controller(root)?;
        let reachable = ctl.check_connection().await.unwrap_or(false);
        let url = ctl.config().server_url.clone();
        Ok::<_, anyhow::Error>((ctl.status().await, url, reachable))
    })?;

    if json {
        return print_json(&serde_json::json!({
            "server": server_url,
            "reachable": reachable,
            "rules": status.rules,
            "synced": status.synced,
            "localOnly": status.local_only,
            "conflicts": status.conflicts,
            "pendingDeletions": status.pending_deletions,
            "unreadable": status.unreadable,
        }));
    }

    let health = if reachable { "reachable" } else { "unreachable" };
    println!("Server:            {server_url} ({health})");
    println!(
        "Rules:             {} ({} synced, {} local changes)",
        status.rules, status.synced, status.local_only
    );
    if status.conflicts.is_empty() {
        println!("Conflicts:         none");
    } else {
        println!("Conflicts:         {}", status.conflicts.join(", "));
        println!("  resolve with `rulesync resolve <id> --strategy <choice>`");
    }
    if status.pending_deletions.is_empty() {
        println!("Pending deletions: none");
    } else {
        println!("Pending deletions: {}", status.pending_deletions.join(", "));
    }
    if !status.unreadable.is_empty() {
        println!("Unreadable:        {}", status.unreadable.join(", "));
        println!("  fix these files; sync leaves them alone until they parse");
    }
    Ok(())
}
