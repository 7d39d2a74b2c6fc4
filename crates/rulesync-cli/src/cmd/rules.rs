use crate::cmd::{open_controller, runtime};
use crate::output::{print_json, print_table, status_label, truncate};
use anyhow::anyhow;
use std::path::Path;

// ---------------------------------------------------------------------------
// list
// ---------------------------------------------------------------------------

pub fn list(root: &Path, json: bool) -> anyhow::Result<()> {
    let rt = runtime()?;
    let rules = rt.block_on(async {
        let ctl = open_controller(root)?;
        Ok::<_, anyhow::Error>(ctl.rules().await)
    })?;

    if json {
        let summary: Vec<serde_json::Value> = rules
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.metadata.id,
                    "filename": r.metadata.filename,
                    "description": r.metadata.description,
                    "filePatterns": r.metadata.file_patterns,
                    "syncStatus": r.metadata.sync_status,
                })
            })
            .collect();
        return print_json(&summary);
    }

    if rules.is_empty() {
        println!("No rules.");
        return Ok(());
    }

    let rows = rules
        .iter()
        .map(|r| {
            vec![
                r.metadata.id.clone(),
                status_label(r.metadata.sync_status).to_string(),
                truncate(&r.metadata.file_patterns.join(", "), 30),
                truncate(r.metadata.description.as_deref().unwrap_or("-"), 50),
            ]
        })
        .collect();
    print_table(&["ID", "STATUS", "PATTERNS", "DESCRIPTION"], rows);
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

pub fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let rt = runtime()?;
    let rule = rt
        .block_on(async {
            let ctl = open_controller(root)?;
            Ok::<_, anyhow::Error>(ctl.rule(id).await)
        })?
        .ok_or_else(|| anyhow!("rule not found: {id}"))?;

    if json {
        return print_json(&rule);
    }

    let m = &rule.metadata;
    println!("Rule:        {}", m.id);
    println!("File:        {}", m.filename);
    println!("Status:      {}", status_label(m.sync_status));
    println!("Modified:    {}", m.last_modified.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(d) = &m.description {
        println!("Description: {d}");
    }
    if !m.file_patterns.is_empty() {
        println!("Patterns:    {}", m.file_patterns.join(", "));
    }
    if !m.referenced_files.is_empty() {
        println!("References:  {}", m.referenced_files.join(", "));
    }
    println!("\n{}", rule.content.trim_end());
    Ok(())
}

// ---------------------------------------------------------------------------
// delete
// ---------------------------------------------------------------------------

pub fn delete(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let rt = runtime()?;
    rt.block_on(async {
        let ctl = open_controller(root)?;
        ctl.delete_rule(id).await?;
        Ok::<_, anyhow::Error>(())
    })?;

    if json {
        print_json(&serde_json::json!({ "deleted": id, "pendingServerDeletion": true }))
    } else {
        println!("Deleted '{id}'. The server copy is removed on the next sync.");
        Ok(())
    }
}
