use anyhow::{Context, Result};
use clap::Parser;
use docqa::config::ConfigArgs;
use docqa::{format_answer, format_sources, Assistant};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "docqa-ask",
    about = "Answer one question from the indexed documents, with citations"
)]
struct AskCli {
    /// Question to answer
    query: String,

    #[command(flatten)]
    config: ConfigArgs,

    /// Generation model (must be one of the configured models)
    #[arg(long, env = "DOCQA_MODEL")]
    model: Option<String>,

    /// Number of chunks retrieved as context
    #[arg(long, short = 'k', env = "DOCQA_TOP_K")]
    top_k: Option<usize>,

    /// Characters shown per source preview
    #[arg(long)]
    preview_chars: Option<usize>,

    /// Also print the prompt sent to the model
    #[arg(long, default_value_t = false)]
    show_prompt: bool,

    /// Only print the retrieved sources and prompt (skip the model call)
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = AskCli::parse();
    let config = cli.config.resolve().context("failed to load configuration")?;
    let preview_chars = cli.preview_chars.unwrap_or(config.retrieval.preview_chars);
    let assistant = Assistant::open(config).context("failed to open assistant")?;

    if cli.dry_run {
        let prepared = assistant
            .prepare(&cli.query, cli.top_k)
            .context("retrieval failed")?;
        println!("--- Sources ---\n{}\n", format_sources(&prepared.sources, preview_chars));
        println!("--- Prompt ---\n{}", prepared.prompt);
        println!("\ndry-run enabled; skipping model call.");
        return Ok(());
    }

    let answer = assistant
        .ask(&cli.query, cli.model.as_deref(), cli.top_k)
        .context("failed to answer question")?;
    let prompt = cli.show_prompt.then_some(answer.prompt.as_str());
    print!(
        "{}",
        format_answer(&answer.answer, &answer.sources, prompt, preview_chars)
    );
    Ok(())
}
