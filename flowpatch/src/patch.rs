use crate::{
    application::{is_stdio, load_document},
    lock::DestinationLock,
    options::Options,
    template::{Policy, TemplateArgs},
};
use anyhow::{bail, Context, Result};
use flowpatch_core::{
    document::DEFAULT_NODES_KEY, FieldPath, MatchPolicy, NodeSelector, PatchOptions,
};
use std::{
    io::{Read, Write},
    path::{Path, PathBuf},
};

#[derive(clap::Parser, Debug)]
#[command(group(
    clap::ArgGroup::new("output")
        .required(true)
        .args(["in_place", "out", "dry_run"])
))]
pub(crate) struct Args {
    /// Workflow document to patch, or `-` for stdin
    #[arg(long, value_name = "PATH")]
    doc: PathBuf,

    /// Name of the node to patch
    #[arg(long, value_name = "NAME")]
    node: String,

    /// Field to overwrite, e.g. `parameters.jsonBody`
    #[arg(long, value_name = "PATH")]
    field: FieldPath,

    #[command(flatten)]
    template: TemplateArgs,

    /// Write the result back to the document
    #[arg(long)]
    in_place: bool,

    /// Write the result to PATH, or `-` for stdout
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,

    /// Only print the JSON Patch that would be applied
    #[arg(long)]
    dry_run: bool,

    /// Patch every node with this name instead of only the first
    #[arg(long)]
    all: bool,

    #[arg(long, value_enum, default_value_t = Policy::Escape)]
    policy: Policy,

    /// Top-level key holding the node sequence
    #[arg(long, default_value = DEFAULT_NODES_KEY)]
    nodes_key: String,

    /// Hold an exclusive lock on `<destination>.lock` while patching
    #[arg(long)]
    lock: bool,
}

enum Destination<'a> {
    File(&'a Path),
    Stdout,
    Nowhere,
}

impl Args {
    fn destination(&self) -> Result<Destination<'_>> {
        if self.dry_run {
            return Ok(Destination::Nowhere);
        }
        let path = match &self.out {
            Some(out) => out.as_path(),
            None if is_stdio(&self.doc) => bail!("cannot patch stdin in place; use --out"),
            None => self.doc.as_path(),
        };
        Ok(if is_stdio(path) {
            Destination::Stdout
        } else {
            Destination::File(path)
        })
    }

    fn selector(&self) -> NodeSelector {
        NodeSelector {
            name: self.node.clone(),
            policy: if self.all {
                MatchPolicy::All
            } else {
                MatchPolicy::First
            },
        }
    }
}

/// Run the `patch` command.
pub(crate) fn patch(options: &Options, args: &Args) -> Result<()> {
    patch_with_stdio(
        options,
        args,
        std::io::stdin().lock(),
        std::io::stdout().lock(),
    )
}

fn patch_with_stdio(
    _options: &Options,
    args: &Args,
    stdin: impl Read,
    mut stdout: impl Write,
) -> Result<()> {
    if is_stdio(&args.doc) && args.template.reads_stdin() {
        bail!("the document and the template cannot both be read from stdin");
    }
    let destination = args.destination()?;

    let mut lock = match (&destination, args.lock) {
        (Destination::File(path), true) => Some(DestinationLock::open(path)?),
        (_, true) => {
            tracing::warn!("--lock has no effect without a destination file");
            None
        }
        (_, false) => None,
    };
    let _guard = lock.as_mut().map(|l| l.acquire()).transpose()?;

    let template = args.template.read().context("reading template")?;
    let mut doc = load_document(&args.doc, stdin)?;
    let options = PatchOptions {
        nodes_key: args.nodes_key.clone(),
        sanitize: args.policy.into(),
    };
    let selector = args.selector();
    let result = flowpatch_core::patch(&mut doc, &selector, &args.field, &template, &options)
        .with_context(|| {
            format!(
                "patching `{}` of node {:?} in {}",
                args.field,
                args.node,
                args.doc.display()
            )
        })?;

    match destination {
        Destination::Nowhere => {
            let ops = serde_json::to_string_pretty(&result.operations)?;
            writeln!(stdout, "{}", ops).context("writing to stdout")?;
        }
        Destination::Stdout => {
            doc.write_to(&mut stdout, "<stdout>")?;
        }
        Destination::File(path) => {
            doc.save(path)?;
        }
    }

    eprintln!(
        "{} `{}` in {} node(s) named {:?}: {} bytes, {} line break(s) removed{}",
        if args.dry_run { "Would patch" } else { "Patched" },
        args.field,
        result.patched,
        args.node,
        result.sanitized_len,
        result.line_breaks_removed,
        if result.changed() { "" } else { " (value unchanged)" }
    );
    Ok(())
}
