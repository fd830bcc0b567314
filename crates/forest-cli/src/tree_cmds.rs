//! `forest tree` commands.

use anyhow::{Context, Result};

use forest_store::{DocumentStore, HtaTree, Resource};

use crate::TreeCommands;

pub async fn run_tree_command(command: TreeCommands, store: &DocumentStore) -> Result<()> {
    match command {
        TreeCommands::Show {
            project_id,
            path,
            json,
        } => show(store, &project_id, &path, json).await,
        TreeCommands::Check {
            project_id,
            path,
            fix,
        } => check(store, &project_id, &path, fix).await,
    }
}

async fn show(store: &DocumentStore, project_id: &str, path: &str, json: bool) -> Result<()> {
    let document = store
        .load(project_id, &Resource::tree(path))
        .await?
        .with_context(|| format!("no tree at {project_id}/{path}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&document)?);
        return Ok(());
    }

    let tree = HtaTree::from_document(document)
        .with_context(|| format!("tree at {project_id}/{path} has malformed nodes"))?;

    if let Some(goal) = &tree.goal {
        println!("Goal: {goal}");
    }
    let meta = &tree.hierarchy_metadata;
    println!(
        "{} branches, {} open tasks, {} completed",
        meta.total_branches, meta.total_tasks, meta.completed_tasks
    );

    for branch in &tree.strategic_branches {
        println!();
        println!("[{}] {}", branch.order, branch.title);
        for task in tree
            .frontier_nodes
            .iter()
            .filter(|t| t.branch == branch.id || t.branch == branch.title)
        {
            let mark = if task.completed { "x" } else { " " };
            match &task.duration {
                Some(duration) => println!("  [{mark}] {} ({duration})", task.title),
                None => println!("  [{mark}] {}", task.title),
            }
        }
    }

    let orphans = tree.orphaned_tasks();
    if !orphans.is_empty() {
        println!();
        println!("Unassigned:");
        for task in orphans {
            println!("  [ ] {} (branch {:?})", task.title, task.branch);
        }
    }
    Ok(())
}

/// Report repairs and orphans. With `fix`, write the repaired tree, move an
/// unreadable one aside and sweep temp files.
async fn check(store: &DocumentStore, project_id: &str, path: &str, fix: bool) -> Result<()> {
    let resource = Resource::tree(path);
    let repaired = match store.load_with_repairs(project_id, &resource).await {
        Ok(found) => found.with_context(|| format!("no tree at {project_id}/{path}"))?,
        Err(e) if e.is_decode() && fix => {
            println!("unreadable: {e}");
            if let Some(moved) = store.quarantine(project_id, &resource).await? {
                println!("Moved unreadable tree to {}", moved.display());
            }
            return sweep(store, project_id).await;
        }
        Err(e) if e.is_decode() => {
            return Err(e).with_context(|| {
                format!("tree at {project_id}/{path} is unreadable; --fix moves it aside")
            });
        }
        Err(e) => return Err(e.into()),
    };

    if repaired.was_repaired() {
        for repair in &repaired.repairs {
            println!("repaired: {repair}");
        }
    } else {
        println!("structure: ok");
    }

    let tree = HtaTree::from_document(repaired.document.clone())
        .with_context(|| format!("tree at {project_id}/{path} has malformed nodes"))?;
    let orphans = tree.orphaned_tasks();
    for task in &orphans {
        println!(
            "orphaned: task {:?} ({}) references unknown branch {:?}",
            task.id, task.title, task.branch
        );
    }
    if orphans.is_empty() {
        println!("orphans: none");
    }

    if !fix {
        if repaired.was_repaired() {
            println!("Run with --fix to write the repaired tree.");
        }
        return Ok(());
    }

    if repaired.was_repaired() {
        store
            .save(project_id, &resource, repaired.document)
            .await
            .with_context(|| format!("failed to save repaired tree {project_id}/{path}"))?;
        println!("Wrote repaired tree.");
    }
    sweep(store, project_id).await
}

async fn sweep(store: &DocumentStore, project_id: &str) -> Result<()> {
    let removed = store.sweep_temp_files(project_id).await?;
    println!("Removed {removed} leftover temp file(s).");
    Ok(())
}
