//! Shieldgate CLI
//!
//! Developer tool: lint filter lists, classify a request against loaded
//! lists, and dump the cosmetic resources for a host.

use std::fs;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use sg_compiler::{parse_filter_list, TrackerTable};
use sg_core::types::{CosmeticControl, RequestContext, ResourceType, Verdict};
use sg_engine::{spawn, EngineConfig, MemoryCounterStore, NoopResolver, NullEventSink};

#[derive(Parser)]
#[command(name = "sg-cli")]
#[command(about = "Shieldgate filter list tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify a request URL against filter lists
    Check {
        /// Request URL to classify
        url: String,

        /// URL of the top-level document
        #[arg(short, long)]
        tab: String,

        /// Resource type (script, image, xhr, ...)
        #[arg(short = 'T', long, default_value = "other")]
        resource_type: String,

        /// Default filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,

        /// Custom (user) filter list file
        #[arg(short, long)]
        custom: Option<String>,

        /// Resource manifest (JSON) for redirects and scriptlets
        #[arg(short, long)]
        resources: Option<String>,

        /// Tracker relationship table (JSON)
        #[arg(long)]
        trackers: Option<String>,
    },

    /// Print the cosmetic resources applying to a document
    Cosmetics {
        /// URL of the top-level document
        tab: String,

        /// Filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,
    },

    /// Parse filter lists and report malformed rules
    Lint {
        /// Filter list files
        #[arg(short, long, required = true)]
        input: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            url,
            tab,
            resource_type,
            input,
            custom,
            resources,
            trackers,
        } => cmd_check(&url, &tab, &resource_type, &input, custom, resources, trackers).await,
        Commands::Cosmetics { tab, input } => cmd_cosmetics(&tab, &input).await,
        Commands::Lint { input } => cmd_lint(&input),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_lists(inputs: &[String]) -> Result<String, String> {
    let mut combined = String::new();
    for path in inputs {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        combined.push_str(&content);
        combined.push('\n');
    }
    Ok(combined)
}

#[allow(clippy::too_many_arguments)]
async fn cmd_check(
    url: &str,
    tab: &str,
    resource_type: &str,
    inputs: &[String],
    custom: Option<String>,
    resources: Option<String>,
    trackers: Option<String>,
) -> Result<(), String> {
    let rules = read_lists(inputs)?;
    let resources_json = match resources {
        Some(path) => {
            fs::read_to_string(&path).map_err(|e| format!("Failed to read '{}': {}", path, e))?
        }
        None => String::new(),
    };

    let handle = spawn(
        EngineConfig {
            cname_uncloaking: false,
            ..EngineConfig::default()
        },
        Arc::new(NoopResolver),
        Box::new(MemoryCounterStore::default()),
        Box::new(NullEventSink),
    );

    handle.update_default_rules(&rules, &resources_json).await;

    if let Some(path) = custom {
        let text =
            fs::read_to_string(&path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        handle.update_custom_rules(&text).await;
    }

    if let Some(path) = trackers {
        let text =
            fs::read_to_string(&path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        let table =
            TrackerTable::parse(&text).map_err(|e| format!("Bad tracker table: {}", e))?;
        handle.set_tracker_table(table).await;
    }

    let ctx = RequestContext::from_urls(url, tab, ResourceType::from_label(resource_type))
        .with_frame(1, 0);
    let decision = handle.classify(ctx).await;

    match &decision.verdict {
        Verdict::Allow => println!("ALLOW"),
        Verdict::Block => println!("BLOCK"),
        Verdict::Redirect(data_url) => println!("REDIRECT {}", data_url),
    }
    if let Some(rule) = &decision.matched_rule {
        println!("  rule:     {}", rule);
    }
    if let Some(category) = decision.category {
        println!("  category: {:?}", category);
    }
    if let Some(csp) = &decision.csp {
        println!("  csp:      {}", csp);
    }

    Ok(())
}

async fn cmd_cosmetics(tab: &str, inputs: &[String]) -> Result<(), String> {
    let rules = read_lists(inputs)?;

    let handle = spawn(
        EngineConfig::default(),
        Arc::new(NoopResolver),
        Box::new(MemoryCounterStore::default()),
        Box::new(NullEventSink),
    );
    handle.update_default_rules(&rules, "").await;

    let resources = handle.cosmetic_resources(tab, CosmeticControl::Block).await;

    println!("Cosmetic resources for {}", tab);
    println!("  generics suppressed: {}", resources.generics_suppressed);
    println!("  hide selectors ({}):", resources.hide_selectors.len());
    for selector in &resources.hide_selectors {
        println!("    {}", selector);
    }
    if !resources.style_rules.is_empty() {
        println!("  style rules:");
        for (selector, css) in &resources.style_rules {
            println!("    {} {{ {} }}", selector, css);
        }
    }
    if !resources.scriptlets.is_empty() {
        println!("  scriptlets:");
        for scriptlet in &resources.scriptlets {
            let args = if scriptlet.args.is_empty() {
                String::new()
            } else {
                format!(" ({})", scriptlet.args.join(", "))
            };
            let body = if scriptlet.body.is_some() {
                "resolved"
            } else {
                "unresolved"
            };
            println!("    {}{} [{}]", scriptlet.name, args, body);
        }
    }

    Ok(())
}

fn cmd_lint(inputs: &[String]) -> Result<(), String> {
    let mut total_network = 0usize;
    let mut total_cosmetic = 0usize;
    let mut total_skipped = 0usize;

    for path in inputs {
        let content =
            fs::read_to_string(path).map_err(|e| format!("Failed to read '{}': {}", path, e))?;
        let parsed = parse_filter_list(&content);
        println!(
            "{}: {} network, {} cosmetic, {} skipped",
            path,
            parsed.network.len(),
            parsed.cosmetic.len(),
            parsed.skipped
        );
        total_network += parsed.network.len();
        total_cosmetic += parsed.cosmetic.len();
        total_skipped += parsed.skipped;
    }

    if inputs.len() > 1 {
        println!(
            "total: {} network, {} cosmetic, {} skipped",
            total_network, total_cosmetic, total_skipped
        );
    }

    Ok(())
}
