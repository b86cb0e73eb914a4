use anyhow::{Result, anyhow, bail};
use clap::Args;
use recs_application::{RecommendationWorkflow, WorkflowState, WorkflowStep};
use recs_core::form::FormField;
use recs_core::recommendation::{
    AnalysisType, Length, Recommendation, RecommendationOption, RecommendationType, Tone,
};
use tokio::sync::watch;

use super::session::Session;

const PREVIEW_CHARS: usize = 240;

#[derive(Args)]
pub struct GenerateArgs {
    /// GitHub username, `owner/repo` or a github.com repository URL
    github: String,

    /// How you worked with this person (at least 10 characters)
    #[arg(short, long)]
    relationship: String,

    #[arg(long = "type", default_value_t)]
    recommendation_type: RecommendationType,

    #[arg(long, default_value_t)]
    tone: Tone,

    #[arg(long, default_value_t)]
    length: Length,

    /// Restrict analysis to one repository of the user
    #[arg(long)]
    repository: Option<String>,

    #[arg(long)]
    target_role: Option<String>,

    /// Skill to emphasize (repeatable)
    #[arg(long = "skill")]
    skills: Vec<String>,

    /// Keyword to leave out (repeatable)
    #[arg(long = "exclude")]
    exclude: Vec<String>,

    /// Persist the option with this id
    #[arg(long)]
    select: Option<i64>,

    /// Rewrite the selected recommendation with these instructions
    #[arg(long, requires = "select")]
    refine: Option<String>,

    /// Print options in full instead of a preview
    #[arg(long)]
    full: bool,
}

pub async fn run(args: GenerateArgs) -> Result<()> {
    let session = Session::load()?;
    let workflow = RecommendationWorkflow::open(session.workflow_deps()?);
    let mut updates = workflow.subscribe();

    if workflow.state().show_limit_exceeded {
        bail!(
            "You have used all {} free generations for today. Sign in or come back tomorrow.",
            session.quota.ceiling()
        );
    }

    workflow.update_form(|form| {
        form.github_input = args.github.clone();
        form.working_relationship = args.relationship.clone();
        form.recommendation_type = args.recommendation_type;
        form.tone = args.tone;
        form.length = args.length;
        if let Some(repository) = &args.repository {
            form.analysis_type = AnalysisType::RepoOnly;
            form.repository_url = repository.clone();
        }
        form.target_role = args.target_role.clone().unwrap_or_default();
        form.include_specific_skills = args.skills.clone();
        form.exclude_keywords = args.exclude.clone();
    })?;

    if let Err(err) = workflow.submit() {
        for (field, message) in &workflow.state().validation_errors {
            eprintln!("  {}: {message}", field_label(*field));
        }
        bail!(err.user_message());
    }

    let mut last: Option<(String, u8)> = None;
    let report_progress = |s: &WorkflowState| {
        let current = (s.current_stage.clone(), s.progress);
        let changed = last.as_ref() != Some(&current);
        if s.step == WorkflowStep::Generating && !s.current_stage.is_empty() && changed {
            eprintln!("[{:>3}%] {}", current.1, current.0);
            last = Some(current);
        }
    };
    let state = tokio::select! {
        state = wait_until(
            &mut updates,
            |s| s.step != WorkflowStep::Generating,
            report_progress,
        ) => state?,
        _ = tokio::signal::ctrl_c() => {
            workflow.close();
            bail!("interrupted");
        }
    };

    if state.step != WorkflowStep::Options {
        bail!(
            state
                .error
                .unwrap_or_else(|| "generation did not produce options".to_string())
        );
    }
    print_options(&state.options, args.full);

    let Some(option_id) = args.select else {
        eprintln!("Pick one with --select <id>");
        workflow.close();
        return Ok(());
    };

    let recommendation = workflow
        .select_option(option_id)
        .await
        .map_err(|e| anyhow!(e.user_message()))?;
    eprintln!("Saved as recommendation #{}", recommendation.id);

    let Some(instructions) = args.refine else {
        print_recommendation(&recommendation);
        workflow.close();
        return Ok(());
    };

    workflow.set_refine_instructions(instructions)?;
    workflow.refine().map_err(|e| anyhow!(e.user_message()))?;
    eprintln!("Refining...");

    let state = tokio::select! {
        state = wait_until(&mut updates, |s| !s.is_refining, |_| {}) => state?,
        _ = tokio::signal::ctrl_c() => {
            workflow.close();
            bail!("interrupted");
        }
    };
    workflow.close();

    if let Some(error) = state.error {
        // The previous content is still the saved one
        print_recommendation(&recommendation);
        bail!(error);
    }
    match &state.result {
        Some(refined) => print_recommendation(refined),
        None => print_recommendation(&recommendation),
    }
    Ok(())
}

/// Waits for the first published state matching `done`, passing every state
/// seen to `on_state`.
async fn wait_until(
    updates: &mut watch::Receiver<WorkflowState>,
    done: impl Fn(&WorkflowState) -> bool,
    mut on_state: impl FnMut(&WorkflowState),
) -> Result<WorkflowState> {
    loop {
        let state = updates.borrow_and_update().clone();
        on_state(&state);
        if done(&state) {
            return Ok(state);
        }
        updates
            .changed()
            .await
            .map_err(|_| anyhow!("workflow closed unexpectedly"))?;
    }
}

fn field_label(field: FormField) -> &'static str {
    match field {
        FormField::GithubInput => "github",
        FormField::WorkingRelationship => "relationship",
        FormField::RepositoryUrl => "repository",
    }
}

fn print_options(options: &[RecommendationOption], full: bool) {
    for option in options {
        println!(
            "[{}] {} ({} words, {})",
            option.id, option.name, option.word_count, option.focus
        );
        println!("    {}", option.title);
        if full || option.content.chars().count() <= PREVIEW_CHARS {
            println!("{}\n", option.content);
        } else {
            let preview: String = option.content.chars().take(PREVIEW_CHARS).collect();
            println!("{preview}...\n");
        }
    }
}

fn print_recommendation(recommendation: &Recommendation) {
    println!("{}\n", recommendation.title);
    println!("{}", recommendation.content);
}
