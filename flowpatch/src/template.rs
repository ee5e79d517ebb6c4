use crate::application::read_input;
use anyhow::Result;
use flowpatch_core::SanitizePolicy;
use std::path::PathBuf;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Policy {
    /// Line breaks inside expression string literals become `\n` escapes
    Escape,
    /// Every line break becomes a space
    Flatten,
}

impl From<Policy> for SanitizePolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Escape => SanitizePolicy::Escape,
            Policy::Flatten => SanitizePolicy::Flatten,
        }
    }
}

#[derive(clap::Args, Debug)]
#[group(required = true, multiple = true)]
pub(crate) struct TemplateArgs {
    /// File holding the template, or `-` for stdin. Takes precedence over
    /// `--template-text`. A single trailing line break is ignored.
    #[arg(long, value_name = "FILE")]
    template: Option<PathBuf>,

    /// The template text itself
    #[arg(long, value_name = "TEXT", env = "FLOWPATCH_TEMPLATE")]
    template_text: Option<String>,
}

impl TemplateArgs {
    pub(crate) fn reads_stdin(&self) -> bool {
        self.template
            .as_deref()
            .is_some_and(crate::application::is_stdio)
    }

    pub(crate) fn read(&self) -> Result<String> {
        match (&self.template, &self.template_text) {
            (Some(path), _) => {
                let s = read_input(path)?;
                Ok(strip_final_line_break(&s).to_owned())
            }
            (None, Some(text)) => Ok(text.clone()),
            (None, None) => anyhow::bail!("no template given"),
        }
    }
}

/// Editors end files with a line break that is not part of the template.
fn strip_final_line_break(s: &str) -> &str {
    s.strip_suffix("\r\n")
        .or_else(|| s.strip_suffix('\n'))
        .unwrap_or(s)
}
