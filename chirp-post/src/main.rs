//! chirp-post - Post to X/Twitter right now
//!
//! One-shot posting with literal text or AI-generated content. The
//! shared daily quota applies: a post that would exceed it is refused,
//! not queued.

use clap::Parser;
use libchirpcast::content::OpenAiGenerator;
use libchirpcast::delivery::TwitterClient;
use libchirpcast::scheduler::DeliveryOutcome;
use libchirpcast::{ChirpcastError, Config, Database, PostRequest, QuotaTracker, Result, Scheduler};
use std::io::Read;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "chirp-post")]
#[command(version)]
#[command(about = "Post to X/Twitter immediately")]
#[command(long_about = "\
chirp-post - Post to X/Twitter immediately

DESCRIPTION:
    chirp-post sends a single post right away. Give it literal text, or
    a prompt to generate text from. Posting counts against the shared
    daily quota (17 successful sends per UTC day by default); when the
    quota is exhausted the post is refused.

USAGE EXAMPLES:
    # Post literal text
    chirp-post \"Shipped the new release today\"

    # Post from stdin
    echo \"Hello from the pipeline\" | chirp-post

    # Generate the text from a prompt
    chirp-post --prompt \"why sqlite is underrated\"

    # Attach an image
    chirp-post \"Look at this\" --image-url https://example.com/pic.png
    chirp-post \"Look at this\" --image-file ./screenshot.png

    # Machine-readable result
    chirp-post \"Hello\" --format json

CONFIGURATION:
    Configuration file: ~/.config/chirpcast/config.toml
    Database location:  ~/.local/share/chirpcast/chirpcast.db

    Override with environment variables:
        CHIRPCAST_CONFIG      - Path to config file
        TWITTER_BEARER_TOKEN  - Posting credentials
        OPENAI_API_KEY        - Content generation credentials

EXIT CODES:
    0 - Posted successfully
    1 - Delivery failed
    2 - Missing or rejected credentials
    3 - Invalid input
    4 - Daily quota exhausted
")]
struct Cli {
    /// Text to post (reads from stdin if not provided and no --prompt)
    text: Option<String>,

    /// Generate the post text from this prompt instead
    #[arg(short, long, conflicts_with = "text")]
    prompt: Option<String>,

    /// Attach an image to the post
    #[arg(long)]
    image: bool,

    /// Image URL to attach (implies --image)
    #[arg(long, value_name = "URL")]
    image_url: Option<String>,

    /// Render the image from this text (implies --image)
    #[arg(long, value_name = "TEXT")]
    image_prompt: Option<String>,

    /// Upload this local image file (implies --image)
    #[arg(long, value_name = "PATH")]
    image_file: Option<String>,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libchirpcast::logging::init_from_env(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.format != "text" && cli.format != "json" {
        return Err(ChirpcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            cli.format
        )));
    }

    let request = build_request(&cli)?;

    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    let scheduler = Scheduler::new(
        db,
        QuotaTracker::new(config.quota.daily_limit),
        Arc::new(TwitterClient::from_config(&config)),
        Arc::new(OpenAiGenerator::from_config(&config)),
        config.scheduler.clone(),
    );

    let outcome = scheduler.submit_now(&request).await?;

    if let DeliveryOutcome::Sent { tweet_id, text } = outcome {
        if cli.format == "json" {
            let json = serde_json::json!({
                "tweet_id": tweet_id,
                "text": text,
            });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        } else {
            println!("Posted: {}", tweet_id);
        }
    }

    Ok(())
}

fn build_request(cli: &Cli) -> Result<PostRequest> {
    let literal_text = match (&cli.text, &cli.prompt) {
        (Some(text), _) => Some(text.clone()),
        (None, Some(_)) => None,
        (None, None) => Some(read_stdin()?),
    };

    if let Some(path) = &cli.image_file {
        if !std::path::Path::new(path).is_file() {
            return Err(ChirpcastError::InvalidInput(format!(
                "Image file not found: {}",
                path
            )));
        }
    }

    Ok(PostRequest {
        literal_text,
        custom_prompt: cli.prompt.clone(),
        include_image: cli.image
            || cli.image_url.is_some()
            || cli.image_prompt.is_some()
            || cli.image_file.is_some(),
        image_url: cli.image_url.clone(),
        image_prompt: cli.image_prompt.clone(),
        image_file: cli.image_file.clone(),
    })
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .map_err(|e| ChirpcastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;

    let text = buffer.trim().to_string();
    if text.is_empty() {
        return Err(ChirpcastError::InvalidInput(
            "No text to post (provide an argument, --prompt, or stdin)".to_string(),
        ));
    }
    Ok(text)
}
