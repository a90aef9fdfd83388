//! One-shot generation command — `appforge generate`.

use anyhow::Result;
use console::style;

pub async fn cmd_generate(prompt: &str, user: Option<String>, no_wait: bool) -> Result<()> {
    use appforge::config::Config;
    use appforge::pipeline::PipelineOutcome;
    use appforge::server::build_state;

    let config = Config::from_env()?;
    let wait = !no_wait && config.wait_for_build;
    let state = build_state(&config)?;

    let conversation = user.unwrap_or_else(|| format!("cli-{}", uuid::Uuid::new_v4()));
    println!("{} {}", style("Generating app for:").bold(), prompt);

    let outcome = state.runner.run(&conversation, prompt, wait).await?;

    match &outcome {
        PipelineOutcome::Completed {
            job, download_url, ..
        } => {
            println!("{}", style("Build succeeded.").green().bold());
            println!("  build:    {}", job.id);
            if let Some(log_url) = &job.log_url {
                println!("  logs:     {log_url}");
            }
            println!("  download: {download_url}");
        }
        PipelineOutcome::Pending { job, .. } => {
            println!("{}", style("Build triggered.").yellow().bold());
            println!("  build: {}", job.id);
            if let Some(log_url) = &job.log_url {
                println!("  logs:  {log_url}");
            }
        }
    }

    Ok(())
}
