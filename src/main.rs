use anyhow::Result;
use inquire::{Confirm, Select, Text};
use log::{info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use novelforge::core::config::Config;
use novelforge::core::io::{NativeStorage, Storage};
use novelforge::core::project::Project;
use novelforge::core::record::KEY_IDEA;
use novelforge::core::state::ContentType;
use novelforge::services::decision::{DecisionMaker, FixedDecisions, PromptDecisions};
use novelforge::services::events::{EventSink, PipelineEvent};
use novelforge::services::llm::{create_backend, test_connection};
use novelforge::services::pause::PauseGate;
use novelforge::services::stream::IncrementTracker;
use novelforge::services::worker::PipelineWorker;
use novelforge::services::workflow::{Operation, PipelineConfig, WorkflowManager};
use novelforge::utils::logging;
use novelforge::utils::text::word_count;

const NEW_PROJECT: &str = "<New project>";

#[tokio::main]
async fn main() -> Result<()> {
    if !Path::new("config.yml").exists() {
        Config::default_with_llm("ollama", "http://localhost:11434").save()?;
        println!("Wrote a default config.yml for a local Ollama server.");
    }

    let config = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            eprintln!("Please ensure 'config.yml' exists with valid LLM settings.");
            return Err(e);
        }
    };

    let log_file = logging::init(Path::new(&config.log_folder))?;
    config.ensure_directories()?;
    info!("Logging to {}", log_file.display());

    let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());
    let projects_root = PathBuf::from(&config.projects_folder);
    let project = choose_project(storage, &projects_root).await?;
    let fresh = !project.snapshot().config.contains(KEY_IDEA);

    let backend = create_backend(&config)?;
    if !test_connection(backend.as_ref(), &config.llm.model).await {
        warn!(
            "Could not reach {} at {}, generation will retry on demand",
            config.llm.model, config.llm.base_url
        );
    }

    let decisions: Box<dyn DecisionMaker> = if config.unattended {
        Box::new(FixedDecisions::default())
    } else {
        Box::new(PromptDecisions)
    };
    let (events, mut rx) = EventSink::channel();
    let stop_timeout = config.generation.stop_timeout();
    let default_soft_target = config.generation.default_soft_target;
    let auto_approve = config.auto_approve;

    let manager = WorkflowManager::new(config, backend, project, events, decisions).await?;
    let mut awaiting = manager.stage().awaiting();
    watch_interrupts(manager.gate());
    let worker = PipelineWorker::spawn(manager, stop_timeout);

    let first = if fresh {
        Operation::Start(ask_pipeline_config(default_soft_target)?)
    } else {
        Operation::Resume
    };
    worker.submit(first).await?;

    let mut tracker = IncrementTracker::new();
    let mut finished = false;
    while let Some(event) = rx.recv().await {
        match event {
            PipelineEvent::Increment { text, .. } => {
                if let Some(growth) = tracker.observe(&text) {
                    print!("{}", growth);
                    std::io::stdout().flush()?;
                }
            }
            PipelineEvent::StageComplete { slot, .. } => {
                tracker.reset();
                println!();
                awaiting = slot.parse::<ContentType>().ok();
            }
            PipelineEvent::NewDraft(text) => {
                tracker.reset();
                println!();
                info!("New draft in the buffer ({} words)", word_count(&text));
            }
            // Already written by the logger.
            PipelineEvent::Log(_) => {}
            PipelineEvent::Error(message) => eprintln!("Error: {}", message),
            PipelineEvent::InitComplete => println!("Pipeline initialised"),
            PipelineEvent::NovelComplete => {
                println!("The novel is complete.");
                finished = true;
            }
            PipelineEvent::OperationFinished => {
                tracker.reset();
                if finished {
                    break;
                }
                let next = match Operation::auto_approval(auto_approve, awaiting) {
                    Some(op) => {
                        info!("Auto-submitting {}", op.label());
                        Some(op)
                    }
                    None => next_operation(awaiting)?,
                };
                match next {
                    Some(op) => {
                        // A fresh StageComplete names whatever waits next.
                        if matches!(op, Operation::Approve(_)) {
                            awaiting = None;
                        }
                        worker.submit(op).await?;
                    }
                    None => break,
                }
            }
        }
    }

    worker.shutdown().await?;
    Ok(())
}

async fn choose_project(storage: Arc<dyn Storage>, root: &Path) -> Result<Project> {
    let mut options = Project::list(storage.as_ref(), root).await?;
    options.insert(0, NEW_PROJECT.to_string());

    let choice = Select::new("Select a project:", options).prompt()?;
    if choice != NEW_PROJECT {
        return Project::open(storage, root, &choice).await;
    }

    loop {
        let name = Text::new("Project name:").prompt()?;
        match Project::create(storage.clone(), root, name.trim()).await {
            Ok(project) => return Ok(project),
            Err(e) => eprintln!("{}", e),
        }
    }
}

fn ask_pipeline_config(default_soft_target: u64) -> Result<PipelineConfig> {
    loop {
        let input = Text::new("Pipeline configuration:")
            .with_placeholder("Idea: ..., Tone: ..., Soft Target: 80,000")
            .with_help_message("Soft Target is optional")
            .prompt()?;
        match PipelineConfig::parse(&input, default_soft_target) {
            Ok(pipeline) => return Ok(pipeline),
            Err(e) => eprintln!("{}", e),
        }
    }
}

/// Asks what to do with the content waiting for approval. `None` quits.
fn next_operation(awaiting: Option<ContentType>) -> Result<Option<Operation>> {
    let Some(content) = awaiting else {
        let resume = Confirm::new("Nothing is waiting for approval. Resume the pipeline?")
            .with_default(true)
            .prompt()?;
        return Ok(resume.then_some(Operation::Resume));
    };

    let options = vec!["Approve", "Adjust", "Quit"];
    let choice = Select::new(&format!("The {} is ready.", content), options).prompt()?;
    match choice {
        "Approve" => Ok(Some(Operation::Approve(content))),
        "Adjust" => {
            let feedback = Text::new("Feedback:").prompt()?;
            if feedback.trim().is_empty() {
                return next_operation(Some(content));
            }
            Ok(Some(Operation::Adjust { content, feedback }))
        }
        _ => Ok(None),
    }
}

/// Ctrl-C pauses a running generation; pressing it again resumes.
fn watch_interrupts(gate: PauseGate) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            let paused = !gate.is_paused();
            gate.set_paused(paused);
            if paused {
                println!("\nPaused. Press Ctrl-C again to resume.");
            }
        }
    });
}
