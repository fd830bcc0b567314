//! `forest project` commands.

use anyhow::{Context, Result, bail};

use forest_store::{DocumentStore, ProjectConfig, StoreError};

use crate::ProjectCommands;

pub async fn run_project_command(command: ProjectCommands, store: &DocumentStore) -> Result<()> {
    match command {
        ProjectCommands::Create { id, goal, context } => create(store, &id, &goal, &context).await,
        ProjectCommands::List => list(store).await,
        ProjectCommands::Show { id } => show(store, &id).await,
    }
}

async fn create(store: &DocumentStore, id: &str, goal: &str, context: &str) -> Result<()> {
    let project = ProjectConfig::new(id, goal).with_context(context);
    match store.create_project(&project).await {
        Ok(()) => {
            println!("Created project {id}");
            Ok(())
        }
        Err(StoreError::AlreadyExists { .. }) => bail!("project {id} already exists"),
        Err(e) => Err(e).with_context(|| format!("failed to create project {id}")),
    }
}

async fn list(store: &DocumentStore) -> Result<()> {
    let ids = store.list_projects().await?;
    if ids.is_empty() {
        println!("No projects.");
        return Ok(());
    }
    for id in ids {
        match store.load_project(&id).await {
            Ok(Some(project)) => println!("{id}\t{}", project.goal),
            Ok(None) => println!("{id}"),
            Err(e) => println!("{id}\t(unreadable: {e})"),
        }
    }
    Ok(())
}

async fn show(store: &DocumentStore, id: &str) -> Result<()> {
    let project = store
        .load_project(id)
        .await?
        .with_context(|| format!("project {id} not found"))?;

    println!("Project: {}", project.id);
    println!("Goal: {}", project.goal);
    if !project.context.is_empty() {
        println!("Context: {}", project.context);
    }
    println!("Created: {}", project.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Active path: {}", project.active_path);

    match store.load_tree(id, &project.active_path).await? {
        Some(tree) => println!(
            "Tree: {} branches, {} open tasks, {} completed",
            tree.hierarchy_metadata.total_branches,
            tree.hierarchy_metadata.total_tasks,
            tree.hierarchy_metadata.completed_tasks,
        ),
        None => println!("Tree: none yet (run `forest generate {id}` or `forest ingest {id}`)"),
    }
    Ok(())
}
