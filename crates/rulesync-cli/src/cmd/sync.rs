use crate::cmd::{open_controller, open_with_resolver, runtime};
use crate::output::print_json;
use rulesync_core::diff;
use rulesync_core::executor::SyncResult;
use rulesync_core::resolver::{ConflictResolver, Resolution, ResolutionRequest};
use rulesync_core::SyncReport;
use std::io::{BufRead, IsTerminal, Write};
use std::path::Path;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// sync
// ---------------------------------------------------------------------------

pub fn run(root: &Path, strategy: Option<Resolution>, json: bool) -> anyhow::Result<()> {
    let rt = runtime()?;
    let report = rt.block_on(async {
        let resolver = match strategy {
            Some(choice) => ConflictResolver::fixed(choice).0,
            None if std::io::stdin().is_terminal() && !json => {
                let (resolver, rx) = ConflictResolver::channel(8);
                tokio::spawn(prompt_loop(rx));
                resolver
            }
            // Nobody to ask: conflicts are skipped and reported.
            None => ConflictResolver::fixed(Resolution::Skip).0,
        };
        let ctl = open_with_resolver(root, resolver)?;
        Ok::<_, anyhow::Error>(ctl.sync_now().await?)
    })?;

    if json {
        return print_json(&report);
    }
    print_report(&report);
    Ok(())
}

fn print_report(report: &SyncReport) {
    print_counts(&report.result);
    for r in &report.resolutions {
        match &r.duplicate_id {
            Some(dup) => println!("  {}: {} (server copy saved as {dup})", r.id, r.resolution),
            None => println!("  {}: {}", r.id, r.resolution),
        }
    }
    let skipped = report
        .resolutions
        .iter()
        .filter(|r| r.resolution == Resolution::Skip)
        .count();
    if skipped > 0 {
        println!("{skipped} conflict(s) skipped; they come back on the next sync.");
    }
    if !report.held.is_empty() {
        println!("Held conflicts: {}", report.held.join(", "));
    }
}

fn print_counts(result: &SyncResult) {
    println!(
        "Uploaded {}, downloaded {}, deleted {} on server, {} locally, {} unchanged.",
        result.uploaded,
        result.downloaded,
        result.deleted_remote,
        result.deleted_local,
        result.unchanged
    );
    if let Some(summary) = result.failure_summary() {
        println!("Problems: {summary}");
        for e in &result.errors {
            println!("  - {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Interactive conflict prompt
// ---------------------------------------------------------------------------

async fn prompt_loop(mut rx: mpsc::Receiver<ResolutionRequest>) {
    while let Some(req) = rx.recv().await {
        let id = req.conflict.id.clone();
        let shown = diff::render(&req.diff);
        let choices = req.choices.clone();
        let choice = tokio::task::spawn_blocking(move || ask(&id, &shown, &choices))
            .await
            .unwrap_or(Resolution::Skip);
        req.respond(choice);
    }
}

/// Blocking terminal prompt. End of input means skip.
fn ask(id: &str, diff: &str, choices: &[Resolution]) -> Resolution {
    let mut out = std::io::stdout();
    let _ = writeln!(out, "\nConflict in '{id}' (- local, + server):\n{diff}");
    for (n, c) in choices.iter().enumerate() {
        let _ = writeln!(out, "  {}) {:<12} {}", n + 1, c.as_str(), c.describe());
    }
    let stdin = std::io::stdin();
    loop {
        let _ = write!(out, "choice [1-{}]: ", choices.len());
        let _ = out.flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return Resolution::Skip,
            Ok(_) => {}
        }
        let answer = line.trim();
        if let Ok(n) = answer.parse::<usize>() {
            if let Some(c) = n.checked_sub(1).and_then(|i| choices.get(i)) {
                return *c;
            }
        }
        if let Ok(c) = answer.parse::<Resolution>() {
            return c;
        }
        let _ = writeln!(out, "unrecognized choice '{answer}'");
    }
}

// ---------------------------------------------------------------------------
// resolve
// ---------------------------------------------------------------------------

pub fn resolve(root: &Path, id: &str, strategy: Resolution, json: bool) -> anyhow::Result<()> {
    let rt = runtime()?;
    let outcome = rt.block_on(async {
        let ctl = open_controller(root)?;
        Ok::<_, anyhow::Error>(ctl.resolve_marked(id, strategy).await?)
    })?;

    if json {
        return print_json(&outcome);
    }
    if !outcome.applied {
        anyhow::bail!("could not apply {} to '{id}'; it is still in conflict", strategy);
    }
    match outcome.duplicate_id {
        Some(dup) => println!("Resolved '{id}' ({strategy}); server copy saved as '{dup}'."),
        None => println!("Resolved '{id}' ({strategy})."),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pull
// ---------------------------------------------------------------------------

pub fn pull(root: &Path, ids: &[String], json: bool) -> anyhow::Result<()> {
    let rt = runtime()?;
    let result = rt.block_on(async {
        let ctl = open_controller(root)?;
        Ok::<_, anyhow::Error>(ctl.pull(ids).await?)
    })?;

    if json {
        return print_json(&result);
    }
    print_counts(&result);
    if result.error_occurred() {
        anyhow::bail!("some rules could not be pulled");
    }
    Ok(())
}
