mod headless;

use crate::options::Options;
use anyhow::Result;

pub(crate) fn set_up(options: &Options) -> Result<()> {
    headless::set_up(&headless::LogOptions {
        verbose: options.verbose,
        color: options.use_color(),
    })
}
