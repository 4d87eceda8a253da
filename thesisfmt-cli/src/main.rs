use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use thesisfmt_cli::load_config;
use thesisfmt_core::{
    apply_overrides, FileStorage, FormatterConfig, JobOrchestrator, JobState, RuleSet,
    RuleSetPatch, TargetKind, Template, TemplateDetector, TemplateRegistry, TemplateStore,
};

#[derive(Parser)]
#[command(name = "thesisfmt")]
#[command(about = "Detect thesis formatting rules from a reference DOCX and apply them to DOCX or PDF targets")]
struct Args {
    /// Path to custom config file (YAML format)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Directory for templates, jobs and outputs
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect a rule set from a reference document
    Detect {
        reference: PathBuf,
        /// Write the rules as YAML here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Format a target in one go, without recording a job
    Apply {
        target: PathBuf,
        /// Rules from a YAML file
        #[arg(long, conflicts_with = "template")]
        rules: Option<PathBuf>,
        /// Rules from a stored template (default template when neither is given)
        #[arg(long)]
        template: Option<String>,
        /// Rule override such as groups.body.font_name="Times New Roman"
        #[arg(long = "set")]
        overrides: Vec<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Manage stored templates
    Templates {
        #[command(subcommand)]
        command: TemplateCommand,
    },
    /// Submit and inspect formatting jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommand,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum TemplateCommand {
    List,
    Show {
        id: String,
    },
    /// Detect rules from a reference DOCX and store them
    Import {
        file: PathBuf,
        #[arg(long)]
        name: Option<String>,
    },
    Delete {
        id: String,
    },
    /// Recreate the default template from the default reference document
    ResetDefault,
    /// Replace a template's rules with a YAML rule set
    SetRules {
        id: String,
        rules: PathBuf,
    },
}

#[derive(Subcommand)]
enum JobCommand {
    /// Queue a target for formatting and run it to completion
    Submit {
        target: PathBuf,
        /// Template id (default template when omitted)
        #[arg(long)]
        template: Option<String>,
        #[arg(long = "set")]
        overrides: Vec<String>,
        /// Print progress while the job runs
        #[arg(long)]
        wait: bool,
    },
    Status {
        id: String,
        /// Print the job record as JSON
        #[arg(long)]
        json: bool,
    },
    List,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration (API keys omitted)
    Show,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.data_dir.as_deref())?;

    match args.command {
        Command::Detect { reference, output } => detect(&config, &reference, output.as_deref()),
        Command::Apply {
            target,
            rules,
            template,
            overrides,
            output,
        } => apply(config, &target, rules.as_deref(), template.as_deref(), &overrides, &output),
        Command::Templates { command } => templates(&config, command),
        Command::Jobs { command } => jobs(config, command).await,
        Command::Config {
            command: ConfigCommand::Show,
        } => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("   ⚠️  {}", warning);
    }
}

fn detect(config: &FormatterConfig, reference: &Path, output: Option<&Path>) -> Result<()> {
    let detector = TemplateDetector::new(&config.classifier)?;
    let report = detector.detect_bytes(&read_input(reference)?)?;

    println!("🔍 Detected rules from {}", reference.display());
    for (group, count) in &report.sample_counts {
        println!("   {:.<22} {} paragraph(s)", group.as_str(), count);
    }
    print_warnings(&report.warnings);

    let yaml = report.rules.to_yaml()?;
    match output {
        Some(path) => {
            std::fs::write(path, yaml).with_context(|| format!("Failed to write {}", path.display()))?;
            println!("💾 Rules saved to: {}", path.display());
        }
        None => print!("{}", yaml),
    }
    Ok(())
}

fn open_registry(config: &FormatterConfig) -> Result<(Arc<FileStorage>, TemplateRegistry)> {
    let storage = Arc::new(FileStorage::new(
        &config.storage.templates_dir(),
        &config.storage.jobs_dir(),
    )?);
    let store: Arc<dyn TemplateStore> = storage.clone();
    let registry = TemplateRegistry::new(store, config)?;
    Ok((storage, registry))
}

/// The named template, or the default one (created on first use)
fn resolve_template(registry: &TemplateRegistry, id: Option<&str>) -> Result<Template> {
    match id {
        Some(id) => Ok(registry.get(id)?),
        None => match registry.default_template()? {
            Some(template) => Ok(template),
            None => {
                println!("📋 No default template yet, creating it");
                Ok(registry.reset_default()?)
            }
        },
    }
}

fn apply(
    config: FormatterConfig,
    target: &Path,
    rules_path: Option<&Path>,
    template: Option<&str>,
    overrides: &[String],
    output: &Path,
) -> Result<()> {
    let kind = TargetKind::from_file_name(&file_name_of(target))
        .ok_or_else(|| anyhow!("unsupported target file type: {} (expected .docx or .pdf)", target.display()))?;
    let patch = RuleSetPatch::from_assignments(overrides)?;

    let (storage, registry) = open_registry(&config)?;
    let base = match rules_path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            println!("📋 Loaded rules from: {}", path.display());
            RuleSet::from_yaml(&text)?
        }
        None => {
            let template = resolve_template(&registry, template)?;
            println!("📋 Using template: {} ({})", template.name, template.id);
            template.rules
        }
    };
    let rules = apply_overrides(&base, &patch);
    thesisfmt_core::validate(&rules)?;

    let orchestrator = JobOrchestrator::new_with_dependencies(storage.clone(), storage, config);
    println!("📄 Processing: {}", target.display());
    let result = orchestrator.format_document(kind, &read_input(target)?, &rules, &mut |_| {})?;

    std::fs::write(output, &result.docx).with_context(|| format!("Failed to write {}", output.display()))?;
    println!("✅ Formatted {} paragraph(s)", result.formatted);
    if let Some(confidence) = result.conversion_confidence {
        println!("   PDF conversion confidence: {:.2}", confidence);
    }
    print_warnings(&result.warnings);
    println!("💾 Output saved to: {}", output.display());
    Ok(())
}

fn print_template(template: &Template) {
    let marker = if template.is_default { " (default)" } else { "" };
    println!(
        "📋 {}  {}{}  created {}",
        template.id,
        template.name,
        marker,
        template.created_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M")
    );
}

fn templates(config: &FormatterConfig, command: TemplateCommand) -> Result<()> {
    let (_, registry) = open_registry(config)?;

    match command {
        TemplateCommand::List => {
            let templates = registry.list()?;
            if templates.is_empty() {
                println!("No templates yet. Try `thesisfmt templates reset-default`.");
            }
            for template in &templates {
                print_template(template);
            }
        }
        TemplateCommand::Show { id } => {
            let template = registry.get(&id)?;
            print_template(&template);
            if let Some(source) = &template.source_filename {
                println!("   Source: {}", source);
            }
            print_warnings(&template.detection_notes);
            print!("{}", template.rules.to_yaml()?);
        }
        TemplateCommand::Import { file, name } => {
            let template = registry.create_from_reference(
                name.as_deref(),
                &file_name_of(&file),
                &read_input(&file)?,
            )?;
            println!("✅ Template imported");
            print_template(&template);
            print_warnings(&template.detection_notes);
        }
        TemplateCommand::Delete { id } => {
            registry.delete(&id)?;
            println!("🗑️  Deleted template {}", id);
        }
        TemplateCommand::ResetDefault => {
            let template = registry.reset_default()?;
            println!("✅ Default template reset");
            print_template(&template);
        }
        TemplateCommand::SetRules { id, rules } => {
            let text = std::fs::read_to_string(&rules)
                .with_context(|| format!("Failed to read {}", rules.display()))?;
            let rule_set: RuleSet = serde_yaml::from_str(&text)
                .with_context(|| format!("Failed to parse {}", rules.display()))?;
            let template = registry.update_rules(&id, rule_set)?;
            println!("✅ Rules replaced");
            print_template(&template);
        }
    }
    Ok(())
}

fn print_job(job: &thesisfmt_core::Job) {
    let icon = match job.state {
        JobState::Queued => "⏳",
        JobState::Running => "🔄",
        JobState::Success => "✅",
        JobState::Failed => "❌",
    };
    println!("{} {}  {}  {}%  {}", icon, job.id, job.state, job.progress, job.target_filename);
    if let Some(path) = &job.output_path {
        println!("   💾 Output: {}", path.display());
    }
    if let Some(confidence) = job.conversion_confidence {
        println!("   PDF conversion confidence: {:.2}", confidence);
    }
    if let Some(warning) = &job.warning {
        print_warnings(&warning.lines().map(str::to_string).collect::<Vec<_>>());
    }
    if let Some(error) = &job.error {
        println!("   Error: {}", error);
    }
}

async fn jobs(config: FormatterConfig, command: JobCommand) -> Result<()> {
    let (storage, registry) = open_registry(&config)?;

    match command {
        JobCommand::Submit {
            target,
            template,
            overrides,
            wait,
        } => {
            let template = resolve_template(&registry, template.as_deref())?;
            let patch = RuleSetPatch::from_assignments(&overrides)?;
            let orchestrator =
                JobOrchestrator::new_with_dependencies(storage.clone(), storage, config);

            let job_id = orchestrator
                .submit(&template.id, &file_name_of(&target), read_input(&target)?, &patch)
                .await?;
            println!("📤 Submitted job {}", job_id);

            // The worker lives in this process, so the job is always seen through
            let interval = Duration::from_millis(500);
            let mut last_progress = None;
            let job = loop {
                let job = orchestrator.get_status(&job_id)?;
                if wait && last_progress != Some(job.progress) {
                    println!("   {} {}%", job.state, job.progress);
                    last_progress = Some(job.progress);
                }
                if job.state.is_terminal() {
                    break job;
                }
                tokio::time::sleep(interval).await;
            };
            print_job(&job);
            if job.state == JobState::Failed {
                std::process::exit(1);
            }
        }
        JobCommand::Status { id, json } => {
            let orchestrator = JobOrchestrator::new_with_dependencies(storage.clone(), storage, config);
            let job = orchestrator.get_status(&id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_job(&job);
            }
        }
        JobCommand::List => {
            let orchestrator = JobOrchestrator::new_with_dependencies(storage.clone(), storage, config);
            let jobs = orchestrator.list_jobs()?;
            if jobs.is_empty() {
                println!("No jobs yet.");
            }
            for job in &jobs {
                print_job(job);
            }
        }
    }
    Ok(())
}
