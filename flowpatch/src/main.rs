mod application;
mod lock;
mod logging;
mod options;
mod patch;
mod template;

use anyhow::Result;
use clap::{CommandFactory as _, Parser, Subcommand};
use flowpatch_core::{document::DEFAULT_NODES_KEY, sanitize};
use options::Options;
use std::path::PathBuf;

fn main() {
    let args = Args::parse();
    let r = logging::set_up(&args.options).and_then(|()| run_args(args));
    application::handle_result(r);
}

fn run_args(args: Args) -> Result<()> {
    match &args.command {
        Commands::Patch(subargs) => patch::patch(&args.options, subargs),
        Commands::Sanitize(subargs) => {
            let t = subargs.template.read()?;
            let sanitized = sanitize(&t, subargs.policy.into())?;
            tracing::debug!(line_breaks = sanitized.line_breaks, "template sanitized");
            println!("{}", sanitized.value);
            Ok(())
        }
        Commands::Nodes { doc, nodes_key } => {
            let doc = application::load_document(doc, std::io::stdin().lock())?;
            for name in doc.node_names(nodes_key)? {
                println!("{}", name);
            }
            Ok(())
        }
        Commands::GenerateMan => {
            let cmd = Args::command();
            let man = clap_mangen::Man::new(cmd);
            let mut buffer: Vec<u8> = Default::default();
            man.render(&mut buffer)?;
            println!("{}", String::from_utf8(buffer)?);
            Ok(())
        }
        Commands::GenerateMarkdown => {
            let opts = clap_markdown::MarkdownOptions::new().show_footer(false);
            let markdown: String = clap_markdown::help_markdown_custom::<Args>(&opts);
            println!("{}", markdown);
            Ok(())
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Args::command();
            clap_complete::generate(*shell, &mut cmd, "flowpatch", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// flowpatch: embed multi-line expression templates into workflow documents
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    options: Options,
}

#[derive(clap::Args, Debug)]
struct SanitizeArgs {
    #[command(flatten)]
    template: template::TemplateArgs,

    #[arg(long, value_enum, default_value_t = template::Policy::Escape)]
    policy: template::Policy,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a sanitized template into a field of a workflow node
    #[command()]
    Patch(patch::Args),

    /// Print a template as the single line `patch` would write
    #[command()]
    Sanitize(SanitizeArgs),

    /// List the node names of a workflow document
    Nodes {
        /// Workflow document, or `-` for stdin
        #[arg(long, value_name = "PATH")]
        doc: PathBuf,

        /// Top-level key holding the node sequence
        #[arg(long, default_value = DEFAULT_NODES_KEY)]
        nodes_key: String,
    },

    /// Generate markdown documentation for flowpatch
    #[command(hide = true)]
    GenerateMarkdown,

    /// Generate a manpage for flowpatch
    #[command(hide = true)]
    GenerateMan,

    /// Generate shell completion for flowpatch
    #[command(hide = true)]
    GenerateCompletion {
        /// The shell to generate completion for
        #[arg(long)]
        shell: clap_complete::Shell,
    },
}
