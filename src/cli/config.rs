use anyhow::Result;
use clap::Args;

use crate::cli::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    /// Validate the configuration and print nothing on success
    #[arg(long)]
    pub check: bool,
}

pub fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    config.validate()?;
    if args.check {
        return Ok(());
    }
    println!("# {}", ctx.config_path().display());
    print!("{}", serde_yaml::to_string(config)?);
    Ok(())
}
